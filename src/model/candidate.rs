use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A candidate and its running tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Unique, case-sensitive.
    pub name: String,
    pub votes: u64,
    /// Insertion sequence number, used to break leaderboard ties.
    pub seq: u64,
}

impl Candidate {
    pub fn new(name: impl Into<String>, seq: u64) -> Self {
        Self {
            name: name.into(),
            votes: 0,
            seq,
        }
    }
}

/// The durable collection of candidates and their tallies.
#[rocket::async_trait]
pub trait CandidateRegistry: Send + Sync {
    /// Insert a new candidate with zero votes.
    /// Fails with `DuplicateCandidate` if the name is taken.
    async fn add(&self, name: &str) -> Result<Candidate>;

    /// Fails with `NotFound` if absent. Ballots are left alone.
    async fn remove(&self, name: &str) -> Result<()>;

    /// Atomically add one vote. Fails with `NotFound` if absent.
    async fn increment(&self, name: &str) -> Result<()>;

    async fn get(&self, name: &str) -> Result<Option<Candidate>>;

    /// Every candidate, in insertion order.
    async fn list(&self) -> Result<Vec<Candidate>>;

    /// Zero every tally, keeping the candidates.
    async fn reset_all(&self) -> Result<()>;
}
