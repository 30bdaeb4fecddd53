use serde::{Deserialize, Serialize};

use crate::model::candidate::Candidate;

/// A candidate that an admin wishes to add.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub name: String,
}

/// API-friendly representation of a candidate's live tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTally {
    pub name: String,
    pub votes: u64,
}

impl From<Candidate> for CandidateTally {
    fn from(candidate: Candidate) -> Self {
        Self {
            name: candidate.name,
            votes: candidate.votes,
        }
    }
}
