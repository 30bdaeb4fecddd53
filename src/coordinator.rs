//! The vote coordinator: the single entry point through which ballots are cast and
//! through which admins steer the election.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use mongodb::Database;
use rocket::tokio::time::timeout;

use crate::error::{Error, Result};
use crate::model::{
    api::CandidateTally,
    ballot::{BallotLedger, BallotRecord, VoterId},
    candidate::{Candidate, CandidateRegistry},
    memory::{MemoryLedger, MemoryRegistry, MemorySettings},
    mongodb::{MongoLedger, MongoRegistry, MongoSettings},
    results::{self, Standing},
    settings::{SettingsStore, VotingSettings},
};

/// How long any single store operation may take before it is reported as unavailable.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Coordinates the candidate registry, the ballot ledger and the voting settings.
///
/// Cheap to clone; clones share the same stores.
#[derive(Clone)]
pub struct VoteCoordinator {
    candidates: Arc<dyn CandidateRegistry>,
    ballots: Arc<dyn BallotLedger>,
    settings: Arc<dyn SettingsStore>,
    store_timeout: Duration,
}

impl VoteCoordinator {
    pub fn new(
        candidates: Arc<dyn CandidateRegistry>,
        ballots: Arc<dyn BallotLedger>,
        settings: Arc<dyn SettingsStore>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            candidates,
            ballots,
            settings,
            store_timeout,
        }
    }

    /// A coordinator over fresh volatile stores with default settings.
    pub fn in_memory(store_timeout: Duration) -> Self {
        Self::new(
            Arc::new(MemoryRegistry::new()),
            Arc::new(MemoryLedger::new()),
            Arc::new(MemorySettings::default()),
            store_timeout,
        )
    }

    /// A coordinator over the MongoDB collections in `db`.
    /// The database must already be prepared, see [`crate::model::mongodb::prepare_database`].
    pub fn from_db(db: &Database, store_timeout: Duration) -> Self {
        Self::new(
            Arc::new(MongoRegistry::from_db(db)),
            Arc::new(MongoLedger::from_db(db)),
            Arc::new(MongoSettings::from_db(db)),
            store_timeout,
        )
    }

    /// Run a store operation, failing with `StoreUnavailable` if it takes too long.
    async fn bounded<T>(&self, what: &str, op: impl Future<Output = Result<T>>) -> Result<T> {
        match timeout(self.store_timeout, op).await {
            Ok(result) => result,
            Err(_) => {
                error!("Store operation `{what}` timed out after {:?}", self.store_timeout);
                Err(Error::StoreUnavailable(format!("{what} timed out")))
            }
        }
    }

    /// Cast a ballot for `candidate_name` on behalf of `voter_id`, returning the accepted
    /// candidate name.
    ///
    /// In single-vote mode the ledger write is an atomic insert-if-absent, so of any number
    /// of concurrent calls for the same voter at most one succeeds. The tally is only
    /// incremented once that write is confirmed: a failure in between leaves the ballot
    /// recorded and the tally one short, and a retry is rejected with `AlreadyVoted`.
    pub async fn cast_vote(&self, voter_id: &VoterId, candidate_name: &str) -> Result<String> {
        let settings = self.bounded("read settings", self.settings.get()).await?;
        if !settings.voting_open {
            debug!("Rejected vote from {voter_id}: voting closed");
            return Err(Error::VotingClosed);
        }

        let candidate = self
            .bounded("look up candidate", self.candidates.get(candidate_name))
            .await?;
        if candidate.is_none() {
            debug!("Rejected vote from {voter_id}: unknown candidate {candidate_name}");
            return Err(Error::UnknownCandidate(candidate_name.to_string()));
        }

        let ballot = BallotRecord::new(voter_id.clone(), candidate_name);
        if settings.multi_vote_allowed {
            self.bounded("record ballot", self.ballots.record(ballot))
                .await?;
        } else {
            let recorded = self
                .bounded("record ballot", self.ballots.record_first(ballot))
                .await?;
            if !recorded {
                debug!("Rejected vote from {voter_id}: already voted");
                return Err(Error::AlreadyVoted);
            }
        }

        match self
            .bounded("increment tally", self.candidates.increment(candidate_name))
            .await
        {
            Ok(()) => {}
            Err(Error::NotFound(_)) => {
                warn!("Candidate {candidate_name} was removed while {voter_id} was voting; ballot kept, not counted");
                return Err(Error::UnknownCandidate(candidate_name.to_string()));
            }
            Err(e) => {
                error!("Ballot from {voter_id} recorded but not counted: {e}");
                return Err(e);
            }
        }

        info!("Accepted vote from {voter_id} for {candidate_name}");
        Ok(candidate_name.to_string())
    }

    /// The caller's most recent choice.
    pub async fn my_vote(&self, voter_id: &VoterId) -> Result<Option<String>> {
        self.bounded("read ballot", self.ballots.get_vote(voter_id))
            .await
    }

    pub async fn has_voted(&self, voter_id: &VoterId) -> Result<bool> {
        self.bounded("read ballot", self.ballots.has_voted(voter_id))
            .await
    }

    pub async fn add_candidate(&self, name: &str) -> Result<Candidate> {
        let candidate = self
            .bounded("add candidate", self.candidates.add(name))
            .await?;
        info!("Added candidate {name}");
        Ok(candidate)
    }

    /// Remove a candidate. Ballots already cast for it are kept.
    pub async fn remove_candidate(&self, name: &str) -> Result<()> {
        self.bounded("remove candidate", self.candidates.remove(name))
            .await?;
        info!("Removed candidate {name}");
        Ok(())
    }

    /// Every candidate and its tally, in insertion order.
    pub async fn live_tally(&self) -> Result<Vec<CandidateTally>> {
        let candidates = self
            .bounded("list candidates", self.candidates.list())
            .await?;
        Ok(candidates.into_iter().map(Into::into).collect())
    }

    pub async fn leaderboard(&self) -> Result<Vec<Standing>> {
        let candidates = self
            .bounded("list candidates", self.candidates.list())
            .await?;
        Ok(results::leaderboard(candidates))
    }

    pub async fn winner(&self) -> Result<Standing> {
        let candidates = self
            .bounded("list candidates", self.candidates.list())
            .await?;
        results::winner(candidates)
    }

    /// The live tally rendered as CSV.
    pub async fn export_csv(&self) -> Result<String> {
        Ok(results::to_csv(&self.live_tally().await?))
    }

    pub async fn settings(&self) -> Result<VotingSettings> {
        self.bounded("read settings", self.settings.get()).await
    }

    pub async fn set_voting_open(&self, open: bool) -> Result<()> {
        self.bounded("update settings", self.settings.set_voting_open(open))
            .await?;
        info!("Voting {}", if open { "opened" } else { "closed" });
        Ok(())
    }

    pub async fn set_multi_vote(&self, allowed: bool) -> Result<()> {
        self.bounded(
            "update settings",
            self.settings.set_multi_vote_allowed(allowed),
        )
        .await?;
        info!(
            "Multi-vote mode {}",
            if allowed { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    /// Delete every ballot and zero every tally. Every voter goes back to not having voted.
    pub async fn reset_all(&self) -> Result<()> {
        self.bounded("clear ballots", self.ballots.clear_all())
            .await?;
        self.bounded("reset tallies", self.candidates.reset_all())
            .await?;
        warn!("All ballots and tallies reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rocket::tokio;

    fn voter(id: &str) -> VoterId {
        VoterId::new(id)
    }

    async fn alice_and_bob() -> VoteCoordinator {
        let coordinator = VoteCoordinator::in_memory(DEFAULT_STORE_TIMEOUT);
        coordinator.add_candidate("Alice").await.unwrap();
        coordinator.add_candidate("Bob").await.unwrap();
        coordinator
    }

    fn tally_of(tally: &[CandidateTally]) -> Vec<(&str, u64)> {
        tally.iter().map(|t| (t.name.as_str(), t.votes)).collect()
    }

    #[rocket::async_test]
    async fn three_voters_two_candidates() {
        let coordinator = alice_and_bob().await;
        assert_eq!(
            coordinator.cast_vote(&voter("u1"), "Alice").await.unwrap(),
            "Alice"
        );
        coordinator.cast_vote(&voter("u2"), "Alice").await.unwrap();
        coordinator.cast_vote(&voter("u3"), "Bob").await.unwrap();

        let tally = coordinator.live_tally().await.unwrap();
        assert_eq!(tally_of(&tally), [("Alice", 2), ("Bob", 1)]);
        assert_eq!(coordinator.winner().await.unwrap().name, "Alice");
    }

    #[rocket::async_test]
    async fn second_vote_is_rejected() {
        let coordinator = alice_and_bob().await;
        coordinator.cast_vote(&voter("u1"), "Alice").await.unwrap();
        assert!(matches!(
            coordinator.cast_vote(&voter("u1"), "Bob").await,
            Err(Error::AlreadyVoted)
        ));

        let tally = coordinator.live_tally().await.unwrap();
        assert_eq!(tally_of(&tally), [("Alice", 1), ("Bob", 0)]);
        assert_eq!(
            coordinator.my_vote(&voter("u1")).await.unwrap().as_deref(),
            Some("Alice")
        );
    }

    #[rocket::async_test]
    async fn multi_vote_allows_repeats() {
        let coordinator = alice_and_bob().await;
        coordinator.set_multi_vote(true).await.unwrap();
        coordinator.cast_vote(&voter("u1"), "Alice").await.unwrap();
        coordinator.cast_vote(&voter("u1"), "Alice").await.unwrap();

        let tally = coordinator.live_tally().await.unwrap();
        assert_eq!(tally_of(&tally), [("Alice", 2), ("Bob", 0)]);
    }

    #[rocket::async_test]
    async fn leaving_multi_vote_mode_blocks_repeat_voters() {
        let coordinator = alice_and_bob().await;
        coordinator.set_multi_vote(true).await.unwrap();
        coordinator.cast_vote(&voter("u1"), "Alice").await.unwrap();
        coordinator.set_multi_vote(false).await.unwrap();

        assert!(matches!(
            coordinator.cast_vote(&voter("u1"), "Bob").await,
            Err(Error::AlreadyVoted)
        ));
    }

    #[rocket::async_test]
    async fn closed_voting_rejects_everything() {
        let coordinator = alice_and_bob().await;
        coordinator.set_voting_open(false).await.unwrap();
        assert!(matches!(
            coordinator.cast_vote(&voter("u1"), "Alice").await,
            Err(Error::VotingClosed)
        ));
        // Closure is checked before anything else.
        assert!(matches!(
            coordinator.cast_vote(&voter("u1"), "Nobody").await,
            Err(Error::VotingClosed)
        ));
        coordinator.set_multi_vote(true).await.unwrap();
        assert!(matches!(
            coordinator.cast_vote(&voter("u1"), "Alice").await,
            Err(Error::VotingClosed)
        ));
        assert!(!coordinator.has_voted(&voter("u1")).await.unwrap());

        coordinator.set_voting_open(true).await.unwrap();
        coordinator.cast_vote(&voter("u1"), "Alice").await.unwrap();
    }

    #[rocket::async_test]
    async fn unknown_candidate_leaves_voter_free() {
        let coordinator = alice_and_bob().await;
        assert!(matches!(
            coordinator.cast_vote(&voter("u1"), "alice").await,
            Err(Error::UnknownCandidate(name)) if name == "alice"
        ));
        assert!(!coordinator.has_voted(&voter("u1")).await.unwrap());
        coordinator.cast_vote(&voter("u1"), "Alice").await.unwrap();
    }

    #[rocket::async_test]
    async fn reset_returns_everyone_to_not_voted() {
        let coordinator = alice_and_bob().await;
        for (id, name) in [("u1", "Alice"), ("u2", "Bob"), ("u3", "Bob")] {
            coordinator.cast_vote(&voter(id), name).await.unwrap();
        }

        coordinator.reset_all().await.unwrap();

        let tally = coordinator.live_tally().await.unwrap();
        assert_eq!(tally_of(&tally), [("Alice", 0), ("Bob", 0)]);
        for id in ["u1", "u2", "u3"] {
            assert!(!coordinator.has_voted(&voter(id)).await.unwrap());
            assert_eq!(coordinator.my_vote(&voter(id)).await.unwrap(), None);
        }
        coordinator.cast_vote(&voter("u1"), "Bob").await.unwrap();
    }

    #[rocket::async_test]
    async fn removed_candidate_keeps_its_ballots() {
        let coordinator = alice_and_bob().await;
        coordinator.cast_vote(&voter("u1"), "Bob").await.unwrap();
        coordinator.remove_candidate("Bob").await.unwrap();

        assert_eq!(
            coordinator.my_vote(&voter("u1")).await.unwrap().as_deref(),
            Some("Bob")
        );
        assert!(matches!(
            coordinator.cast_vote(&voter("u2"), "Bob").await,
            Err(Error::UnknownCandidate(_))
        ));
        assert!(matches!(
            coordinator.remove_candidate("Bob").await,
            Err(Error::NotFound(_))
        ));
    }

    #[rocket::async_test]
    async fn leaderboard_ties_keep_insertion_order() {
        let coordinator = VoteCoordinator::in_memory(DEFAULT_STORE_TIMEOUT);
        for name in ["Carol", "Alice", "Bob"] {
            coordinator.add_candidate(name).await.unwrap();
        }
        coordinator.cast_vote(&voter("u1"), "Bob").await.unwrap();

        let names: Vec<_> = coordinator
            .leaderboard()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, ["Bob", "Carol", "Alice"]);
    }

    #[rocket::async_test]
    async fn no_winner_without_candidates() {
        let coordinator = VoteCoordinator::in_memory(DEFAULT_STORE_TIMEOUT);
        assert!(matches!(
            coordinator.winner().await,
            Err(Error::NoCandidates)
        ));
        assert!(coordinator.leaderboard().await.unwrap().is_empty());
    }

    #[rocket::async_test]
    async fn duplicate_candidates_rejected() {
        let coordinator = alice_and_bob().await;
        assert!(matches!(
            coordinator.add_candidate("Alice").await,
            Err(Error::DuplicateCandidate(_))
        ));
    }

    /// Settings that never answer in time.
    struct StalledSettings;

    #[rocket::async_trait]
    impl SettingsStore for StalledSettings {
        async fn get(&self) -> Result<VotingSettings> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(VotingSettings::default())
        }

        async fn set_voting_open(&self, _open: bool) -> Result<()> {
            Ok(())
        }

        async fn set_multi_vote_allowed(&self, _allowed: bool) -> Result<()> {
            Ok(())
        }
    }

    #[rocket::async_test]
    async fn slow_store_is_unavailable() {
        let coordinator = VoteCoordinator::new(
            Arc::new(MemoryRegistry::new()),
            Arc::new(MemoryLedger::new()),
            Arc::new(StalledSettings),
            Duration::from_millis(20),
        );
        assert!(matches!(
            coordinator.cast_vote(&voter("u1"), "Alice").await,
            Err(Error::StoreUnavailable(_))
        ));
    }

    /// A registry whose increments fail while `broken` is set.
    #[derive(Default)]
    struct FlakyRegistry {
        inner: MemoryRegistry,
        broken: std::sync::atomic::AtomicBool,
    }

    #[rocket::async_trait]
    impl CandidateRegistry for FlakyRegistry {
        async fn add(&self, name: &str) -> Result<Candidate> {
            self.inner.add(name).await
        }

        async fn remove(&self, name: &str) -> Result<()> {
            self.inner.remove(name).await
        }

        async fn increment(&self, name: &str) -> Result<()> {
            if self.broken.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::StoreUnavailable("connection reset".to_string()));
            }
            self.inner.increment(name).await
        }

        async fn get(&self, name: &str) -> Result<Option<Candidate>> {
            self.inner.get(name).await
        }

        async fn list(&self) -> Result<Vec<Candidate>> {
            self.inner.list().await
        }

        async fn reset_all(&self) -> Result<()> {
            self.inner.reset_all().await
        }
    }

    #[rocket::async_test]
    async fn failed_increment_undercounts_but_never_double_counts() {
        log4rs_test_utils::test_logging::init_logging_once_for(["vote_ledger"], None, None);

        let registry = Arc::new(FlakyRegistry::default());
        let coordinator = VoteCoordinator::new(
            registry.clone(),
            Arc::new(MemoryLedger::new()),
            Arc::new(MemorySettings::default()),
            DEFAULT_STORE_TIMEOUT,
        );
        coordinator.add_candidate("Alice").await.unwrap();

        registry
            .broken
            .store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(matches!(
            coordinator.cast_vote(&voter("u1"), "Alice").await,
            Err(Error::StoreUnavailable(_))
        ));
        assert!(coordinator.has_voted(&voter("u1")).await.unwrap());

        // The retry sees the recorded ballot.
        registry
            .broken
            .store(false, std::sync::atomic::Ordering::SeqCst);
        assert!(matches!(
            coordinator.cast_vote(&voter("u1"), "Alice").await,
            Err(Error::AlreadyVoted)
        ));
        let tally = coordinator.live_tally().await.unwrap();
        assert_eq!(tally_of(&tally), [("Alice", 0)]);
    }

    /// Race 64 votes from one voter across Alice and Bob; exactly one may be accepted.
    async fn race_one_voter(coordinator: &VoteCoordinator) {
        let attempts: Vec<_> = (0..64)
            .map(|i| {
                let coordinator = coordinator.clone();
                let choice = if i % 2 == 0 { "Alice" } else { "Bob" };
                tokio::spawn(async move { coordinator.cast_vote(&voter("u1"), choice).await })
            })
            .collect();

        let mut accepted = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(Error::AlreadyVoted) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(accepted, 1);

        let total: u64 = coordinator
            .live_tally()
            .await
            .unwrap()
            .iter()
            .map(|t| t.votes)
            .sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn concurrent_votes_from_one_voter() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(8)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let coordinator = alice_and_bob().await;
            race_one_voter(&coordinator).await;
        });
    }

    #[backend_test(mongodb)]
    async fn concurrent_votes_from_one_voter_on_mongodb(coordinator: VoteCoordinator) {
        coordinator.add_candidate("Alice").await.unwrap();
        coordinator.add_candidate("Bob").await.unwrap();
        race_one_voter(&coordinator).await;
        assert!(coordinator.has_voted(&voter("u1")).await.unwrap());
    }

    #[backend_test]
    async fn injected_coordinator_starts_empty(coordinator: VoteCoordinator) {
        assert!(coordinator.live_tally().await.unwrap().is_empty());
        assert_eq!(
            coordinator.settings().await.unwrap(),
            VotingSettings::default()
        );
        assert!(!coordinator.has_voted(&voter("u1")).await.unwrap());
    }

    #[test]
    fn concurrent_votes_from_many_voters() {
        const VOTERS: usize = 300;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(8)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let coordinator = alice_and_bob().await;
            let attempts: Vec<_> = (0..VOTERS)
                .map(|i| {
                    let coordinator = coordinator.clone();
                    let choice = if i % 3 == 0 { "Bob" } else { "Alice" };
                    tokio::spawn(async move {
                        coordinator.cast_vote(&voter(&format!("u{i}")), choice).await
                    })
                })
                .collect();
            for attempt in attempts {
                attempt.await.unwrap().unwrap();
            }

            let tally = coordinator.live_tally().await.unwrap();
            assert_eq!(tally_of(&tally), [("Alice", 200), ("Bob", 100)]);
        });
    }
}
