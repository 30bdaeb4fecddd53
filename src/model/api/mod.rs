//! API-friendly types.
//!
//! These are the request and response bodies exchanged with the inbound
//! collaborator, serialised as plain JSON.

mod candidate;
pub use candidate::{CandidateSpec, CandidateTally};

mod vote;
pub use vote::{BallotSpec, MyVote, VoteReceipt};
