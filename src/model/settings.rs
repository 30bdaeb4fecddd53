use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Process-wide voting toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingSettings {
    pub voting_open: bool,
    pub multi_vote_allowed: bool,
}

impl Default for VotingSettings {
    fn default() -> Self {
        Self {
            voting_open: true,
            multi_vote_allowed: false,
        }
    }
}

/// Storage for the [`VotingSettings`] singleton.
///
/// A read must observe the most recently completed write.
#[rocket::async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self) -> Result<VotingSettings>;

    async fn set_voting_open(&self, open: bool) -> Result<()>;

    async fn set_multi_vote_allowed(&self, allowed: bool) -> Result<()>;
}
