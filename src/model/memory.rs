//! Volatile stores with the same guarantees as the MongoDB ones.
//!
//! Locks are only ever held for the duration of a map operation, never across an `.await`.

use std::collections::{
    hash_map::{DefaultHasher, Entry},
    HashMap,
};
use std::hash::{Hash, Hasher};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, RwLock,
};

use log::debug;

use crate::error::{Error, Result};
use crate::model::{
    ballot::{BallotLedger, BallotRecord, VoterId},
    candidate::{Candidate, CandidateRegistry},
    settings::{SettingsStore, VotingSettings},
};

fn poisoned(what: &str) -> Error {
    Error::StoreUnavailable(format!("{what} lock poisoned"))
}

/// A live candidate entry. The tally is atomic so increments only need a read lock.
#[derive(Debug)]
struct Slot {
    seq: u64,
    votes: AtomicU64,
}

#[derive(Debug, Default)]
struct Table {
    slots: HashMap<String, Arc<Slot>>,
    next_seq: u64,
}

/// In-memory [`CandidateRegistry`].
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    table: RwLock<Table>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, name: &str) -> Result<Option<Arc<Slot>>> {
        let table = self.table.read().map_err(|_| poisoned("registry"))?;
        Ok(table.slots.get(name).cloned())
    }
}

#[rocket::async_trait]
impl CandidateRegistry for MemoryRegistry {
    async fn add(&self, name: &str) -> Result<Candidate> {
        let mut table = self.table.write().map_err(|_| poisoned("registry"))?;
        if table.slots.contains_key(name) {
            return Err(Error::DuplicateCandidate(name.to_string()));
        }
        table.next_seq += 1;
        let seq = table.next_seq;
        table.slots.insert(
            name.to_string(),
            Arc::new(Slot {
                seq,
                votes: AtomicU64::new(0),
            }),
        );
        Ok(Candidate::new(name, seq))
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let mut table = self.table.write().map_err(|_| poisoned("registry"))?;
        table
            .slots
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    async fn increment(&self, name: &str) -> Result<()> {
        let slot = self
            .slot(name)?
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        slot.votes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Candidate>> {
        Ok(self.slot(name)?.map(|slot| Candidate {
            name: name.to_string(),
            votes: slot.votes.load(Ordering::Acquire),
            seq: slot.seq,
        }))
    }

    async fn list(&self) -> Result<Vec<Candidate>> {
        let table = self.table.read().map_err(|_| poisoned("registry"))?;
        let mut candidates: Vec<_> = table
            .slots
            .iter()
            .map(|(name, slot)| Candidate {
                name: name.clone(),
                votes: slot.votes.load(Ordering::Acquire),
                seq: slot.seq,
            })
            .collect();
        candidates.sort_by_key(|c| c.seq);
        Ok(candidates)
    }

    async fn reset_all(&self) -> Result<()> {
        let table = self.table.read().map_err(|_| poisoned("registry"))?;
        for slot in table.slots.values() {
            slot.votes.store(0, Ordering::Release);
        }
        Ok(())
    }
}

const LEDGER_SHARDS: usize = 16;

/// In-memory [`BallotLedger`].
///
/// Voters are spread over independently locked shards, so unrelated voters rarely contend;
/// every operation for a given voter goes through that voter's shard lock.
#[derive(Debug)]
pub struct MemoryLedger {
    shards: Vec<Mutex<HashMap<VoterId, Vec<BallotRecord>>>>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self {
            shards: (0..LEDGER_SHARDS)
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
        }
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn shard(&self, voter_id: &VoterId) -> &Mutex<HashMap<VoterId, Vec<BallotRecord>>> {
        let mut hasher = DefaultHasher::new();
        voter_id.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % self.shards.len()]
    }
}

#[rocket::async_trait]
impl BallotLedger for MemoryLedger {
    async fn has_voted(&self, voter_id: &VoterId) -> Result<bool> {
        let shard = self.shard(voter_id).lock().map_err(|_| poisoned("ledger"))?;
        Ok(shard.contains_key(voter_id))
    }

    async fn get_vote(&self, voter_id: &VoterId) -> Result<Option<String>> {
        let shard = self.shard(voter_id).lock().map_err(|_| poisoned("ledger"))?;
        Ok(shard
            .get(voter_id)
            .and_then(|ballots| ballots.last())
            .map(|ballot| ballot.candidate_name.clone()))
    }

    async fn record(&self, ballot: BallotRecord) -> Result<()> {
        let mut shard = self
            .shard(&ballot.voter_id)
            .lock()
            .map_err(|_| poisoned("ledger"))?;
        shard.entry(ballot.voter_id.clone()).or_default().push(ballot);
        Ok(())
    }

    async fn record_first(&self, ballot: BallotRecord) -> Result<bool> {
        let mut shard = self
            .shard(&ballot.voter_id)
            .lock()
            .map_err(|_| poisoned("ledger"))?;
        match shard.entry(ballot.voter_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                entry.insert(vec![ballot]);
                Ok(true)
            }
        }
    }

    async fn clear_all(&self) -> Result<()> {
        for shard in &self.shards {
            shard.lock().map_err(|_| poisoned("ledger"))?.clear();
        }
        debug!("Cleared in-memory ledger");
        Ok(())
    }
}

/// In-memory [`SettingsStore`].
#[derive(Debug, Default)]
pub struct MemorySettings {
    settings: RwLock<VotingSettings>,
}

#[rocket::async_trait]
impl SettingsStore for MemorySettings {
    async fn get(&self) -> Result<VotingSettings> {
        Ok(*self.settings.read().map_err(|_| poisoned("settings"))?)
    }

    async fn set_voting_open(&self, open: bool) -> Result<()> {
        self.settings
            .write()
            .map_err(|_| poisoned("settings"))?
            .voting_open = open;
        Ok(())
    }

    async fn set_multi_vote_allowed(&self, allowed: bool) -> Result<()> {
        self.settings
            .write()
            .map_err(|_| poisoned("settings"))?
            .multi_vote_allowed = allowed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rocket::async_test]
    async fn registry_rejects_duplicates() {
        let registry = MemoryRegistry::new();
        registry.add("Alice").await.unwrap();
        assert!(matches!(
            registry.add("Alice").await,
            Err(Error::DuplicateCandidate(name)) if name == "Alice"
        ));
        // Names are case-sensitive.
        registry.add("alice").await.unwrap();
        assert_eq!(registry.list().await.unwrap().len(), 2);
    }

    #[rocket::async_test]
    async fn registry_missing_candidates() {
        let registry = MemoryRegistry::new();
        assert!(matches!(
            registry.remove("Bob").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            registry.increment("Bob").await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(registry.get("Bob").await.unwrap(), None);
    }

    #[rocket::async_test]
    async fn registry_lists_in_insertion_order() {
        let registry = MemoryRegistry::new();
        for name in ["Carol", "Alice", "Bob"] {
            registry.add(name).await.unwrap();
        }
        registry.remove("Alice").await.unwrap();
        registry.add("Alice").await.unwrap();

        let names: Vec<_> = registry
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, ["Carol", "Bob", "Alice"]);
    }

    #[rocket::async_test]
    async fn registry_reset_keeps_candidates() {
        let registry = MemoryRegistry::new();
        registry.add("Alice").await.unwrap();
        registry.increment("Alice").await.unwrap();
        registry.increment("Alice").await.unwrap();
        assert_eq!(registry.get("Alice").await.unwrap().unwrap().votes, 2);

        registry.reset_all().await.unwrap();
        let alice = registry.get("Alice").await.unwrap().unwrap();
        assert_eq!(alice.votes, 0);
        assert_eq!(alice.seq, 1);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let registry = Arc::new(MemoryRegistry::new());
        let runtime = rocket::tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .build()
            .unwrap();
        runtime.block_on(async {
            registry.add("Alice").await.unwrap();
            let tasks: Vec<_> = (0..200)
                .map(|_| {
                    let registry = registry.clone();
                    rocket::tokio::spawn(async move { registry.increment("Alice").await })
                })
                .collect();
            for task in tasks {
                task.await.unwrap().unwrap();
            }
            assert_eq!(registry.get("Alice").await.unwrap().unwrap().votes, 200);
        });
    }

    #[rocket::async_test]
    async fn ledger_record_first_is_exclusive() {
        let ledger = MemoryLedger::new();
        let voter = VoterId::new("u1");
        assert!(!ledger.has_voted(&voter).await.unwrap());

        assert!(ledger
            .record_first(BallotRecord::new(voter.clone(), "Alice"))
            .await
            .unwrap());
        assert!(!ledger
            .record_first(BallotRecord::new(voter.clone(), "Bob"))
            .await
            .unwrap());

        assert!(ledger.has_voted(&voter).await.unwrap());
        assert_eq!(
            ledger.get_vote(&voter).await.unwrap().as_deref(),
            Some("Alice")
        );
    }

    #[rocket::async_test]
    async fn ledger_record_appends() {
        let ledger = MemoryLedger::new();
        let voter = VoterId::new("u1");
        ledger
            .record(BallotRecord::new(voter.clone(), "Alice"))
            .await
            .unwrap();
        ledger
            .record(BallotRecord::new(voter.clone(), "Bob"))
            .await
            .unwrap();
        assert_eq!(
            ledger.get_vote(&voter).await.unwrap().as_deref(),
            Some("Bob")
        );

        // A voter with multi-mode ballots still counts as having voted.
        assert!(!ledger
            .record_first(BallotRecord::new(voter.clone(), "Carol"))
            .await
            .unwrap());
    }

    #[rocket::async_test]
    async fn ledger_clear_all() {
        let ledger = MemoryLedger::new();
        for id in ["u1", "u2", "u3"] {
            ledger
                .record_first(BallotRecord::new(VoterId::new(id), "Alice"))
                .await
                .unwrap();
        }
        ledger.clear_all().await.unwrap();
        for id in ["u1", "u2", "u3"] {
            assert!(!ledger.has_voted(&VoterId::new(id)).await.unwrap());
        }
    }

    #[rocket::async_test]
    async fn settings_read_your_writes() {
        let settings = MemorySettings::default();
        assert_eq!(settings.get().await.unwrap(), VotingSettings::default());

        settings.set_voting_open(false).await.unwrap();
        settings.set_multi_vote_allowed(true).await.unwrap();
        assert_eq!(
            settings.get().await.unwrap(),
            VotingSettings {
                voting_open: false,
                multi_vote_allowed: true,
            }
        );
    }
}
