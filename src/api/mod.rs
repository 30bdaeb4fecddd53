use rocket::{http::Status, serde::json::Json, Catcher, Request, Route};

use crate::error::ErrorBody;

mod admin;
mod public;
mod voting;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(admin::routes());
    routes.extend(public::routes());
    routes.extend(voting::routes());
    routes
}

pub fn catchers() -> Vec<Catcher> {
    catchers![default_catcher]
}

/// Give guard and routing failures the same JSON shape as handler errors.
#[catch(default)]
fn default_catcher(status: Status, _req: &Request) -> Json<ErrorBody> {
    let error = match status.code {
        400 | 422 => "bad_request",
        401 => "unauthorized",
        403 => "forbidden",
        404 => "not_found",
        _ => "error",
    };
    Json(ErrorBody {
        error: error.to_string(),
        message: status.reason().unwrap_or("Unknown error").to_string(),
    })
}

#[cfg(test)]
pub(crate) mod test_util {
    use rocket::{http::Header, local::asynchronous::LocalResponse, serde::json::serde_json};
    use serde::de::DeserializeOwned;

    use crate::error::ErrorBody;
    use crate::model::auth::VOTER_ID_HEADER;

    /// Identify a request as coming from `id`.
    pub fn as_voter(id: &str) -> Header<'static> {
        Header::new(VOTER_ID_HEADER, id.to_string())
    }

    /// Identify a request as coming from the example admin.
    pub fn as_admin() -> Header<'static> {
        as_voter("admin")
    }

    /// Decode a JSON response body.
    pub async fn json<T: DeserializeOwned>(response: LocalResponse<'_>) -> T {
        let raw = response.into_string().await.unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    /// Decode an error response body and return its kind.
    pub async fn error_kind(response: LocalResponse<'_>) -> String {
        json::<ErrorBody>(response).await.error
    }
}
