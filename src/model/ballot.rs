use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Opaque identity of a voter, exactly as supplied by the inbound collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoterId(String);

impl VoterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for VoterId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One recorded instance of a voter's choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotRecord {
    pub voter_id: VoterId,
    /// Weak reference to the candidate by name; the candidate may since have been removed.
    pub candidate_name: String,
    pub cast_at: DateTime<Utc>,
}

impl BallotRecord {
    /// Create a ballot cast now.
    pub fn new(voter_id: VoterId, candidate_name: impl Into<String>) -> Self {
        Self {
            voter_id,
            candidate_name: candidate_name.into(),
            cast_at: Utc::now(),
        }
    }
}

/// The durable record of every ballot cast, keyed by voter.
#[rocket::async_trait]
pub trait BallotLedger: Send + Sync {
    /// Does the voter have at least one ballot?
    async fn has_voted(&self, voter_id: &VoterId) -> Result<bool>;

    /// The voter's most recent choice, if any.
    async fn get_vote(&self, voter_id: &VoterId) -> Result<Option<String>>;

    /// Append a ballot unconditionally.
    async fn record(&self, ballot: BallotRecord) -> Result<()>;

    /// Append a ballot only if the voter has none yet, as one atomic step.
    /// Returns `false` without writing anything if the voter already has a ballot.
    async fn record_first(&self, ballot: BallotRecord) -> Result<bool>;

    /// Delete every ballot.
    async fn clear_all(&self) -> Result<()>;
}
