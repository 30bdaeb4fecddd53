use rocket::{
    http::Status,
    outcome::try_outcome,
    request::{FromRequest, Outcome},
    Request, State,
};

use crate::config::Config;
use crate::error::Error;
use crate::model::ballot::VoterId;

/// Header through which the inbound collaborator identifies the acting user.
pub const VOTER_ID_HEADER: &str = "X-Voter-Id";

/// An identified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voter(pub VoterId);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Voter {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match req.headers().get_one(VOTER_ID_HEADER).map(str::trim) {
            Some(id) if !id.is_empty() => Outcome::Success(Voter(VoterId::new(id))),
            _ => Outcome::Failure((
                Status::Unauthorized,
                Error::Unauthorized(format!("missing `{VOTER_ID_HEADER}` header")),
            )),
        }
    }
}

/// An identified caller holding admin privilege.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admin(pub VoterId);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Admin {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Voter(id) = try_outcome!(req.guard::<Voter>().await);

        // Unwrap is safe as `Config` is always managed.
        let config = req.guard::<&State<Config>>().await.unwrap();
        if config.is_admin(&id) {
            Outcome::Success(Admin(id))
        } else {
            Outcome::Failure((
                Status::Forbidden,
                Error::Unauthorized(format!("{id} is not an admin")),
            ))
        }
    }
}
