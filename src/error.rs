use log::{error, warn};
use mongodb::error::Error as DbError;
use rocket::{
    http::Status,
    response::{status::Custom, Responder},
    serde::json::Json,
    Request,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Candidate already exists: {0}")]
    DuplicateCandidate(String),
    #[error("Candidate not found: {0}")]
    NotFound(String),
    #[error("No such candidate to vote for: {0}")]
    UnknownCandidate(String),
    #[error("Voting is closed")]
    VotingClosed,
    #[error("Voter has already voted")]
    AlreadyVoted,
    #[error("There are no candidates")]
    NoCandidates,
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl Error {
    /// Short machine-readable name of this error, for the inbound collaborator to dispatch on.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateCandidate(_) => "duplicate_candidate",
            Self::NotFound(_) => "not_found",
            Self::UnknownCandidate(_) => "unknown_candidate",
            Self::VotingClosed => "voting_closed",
            Self::AlreadyVoted => "already_voted",
            Self::NoCandidates => "no_candidates",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::DuplicateCandidate(_) | Self::AlreadyVoted => Status::Conflict,
            Self::NotFound(_) | Self::UnknownCandidate(_) | Self::NoCandidates => Status::NotFound,
            Self::VotingClosed => Status::Forbidden,
            Self::StoreUnavailable(_) => Status::ServiceUnavailable,
            Self::BadRequest(_) => Status::BadRequest,
            Self::Unauthorized(_) => Status::Unauthorized,
        }
    }
}

impl From<DbError> for Error {
    fn from(err: DbError) -> Self {
        error!("Database error: {err}");
        Self::StoreUnavailable(err.to_string())
    }
}

/// The JSON body sent alongside an error status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        Self {
            error: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let status = self.status();
        if status.class().is_server_error() {
            error!("{self}");
        } else {
            warn!("{self}");
        }
        Custom(status, Json(ErrorBody::from(&self))).respond_to(req)
    }
}
