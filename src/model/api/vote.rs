use serde::{Deserialize, Serialize};

/// A ballot that the voter wishes to cast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotSpec {
    pub candidate: String,
}

/// Confirmation of an accepted vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub candidate: String,
}

/// The caller's most recent choice, or `null` if they have not voted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MyVote {
    pub candidate: Option<String>,
}
