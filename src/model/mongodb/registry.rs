use mongodb::{bson::doc, options::FindOptions, Database};
use rocket::futures::TryStreamExt;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::candidate::{Candidate, CandidateRegistry};

use super::{
    counter::{Counter, CANDIDATE_SEQ_COUNTER_ID},
    errors::is_duplicate_key_error,
    Coll,
};

/// A candidate as stored in the database. The `_id` is left to MongoDB;
/// the unique `name` index is the identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbCandidate {
    pub name: String,
    pub votes: u64,
    pub seq: u64,
}

impl From<DbCandidate> for Candidate {
    fn from(candidate: DbCandidate) -> Self {
        Self {
            name: candidate.name,
            votes: candidate.votes,
            seq: candidate.seq,
        }
    }
}

/// [`CandidateRegistry`] backed by the `candidates` collection.
#[derive(Clone)]
pub struct MongoRegistry {
    candidates: Coll<DbCandidate>,
    counters: Coll<Counter>,
}

impl MongoRegistry {
    pub fn from_db(db: &Database) -> Self {
        Self {
            candidates: Coll::from_db(db),
            counters: Coll::from_db(db),
        }
    }
}

#[rocket::async_trait]
impl CandidateRegistry for MongoRegistry {
    async fn add(&self, name: &str) -> Result<Candidate> {
        // A sequence number burnt by a rejected duplicate leaves a harmless gap.
        let seq = Counter::next(&self.counters, CANDIDATE_SEQ_COUNTER_ID).await?;
        let candidate = DbCandidate {
            name: name.to_string(),
            votes: 0,
            seq,
        };
        match self.candidates.insert_one(&candidate, None).await {
            Ok(_) => Ok(candidate.into()),
            Err(e) if is_duplicate_key_error(&e) => {
                Err(Error::DuplicateCandidate(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let result = self
            .candidates
            .delete_one(doc! { "name": name }, None)
            .await?;
        if result.deleted_count == 0 {
            Err(Error::NotFound(name.to_string()))
        } else {
            Ok(())
        }
    }

    async fn increment(&self, name: &str) -> Result<()> {
        let update = doc! {
            "$inc": { "votes": 1_i64 }
        };
        let result = self
            .candidates
            .update_one(doc! { "name": name }, update, None)
            .await?;
        if result.matched_count == 0 {
            Err(Error::NotFound(name.to_string()))
        } else {
            Ok(())
        }
    }

    async fn get(&self, name: &str) -> Result<Option<Candidate>> {
        let candidate = self
            .candidates
            .find_one(doc! { "name": name }, None)
            .await?;
        Ok(candidate.map(Into::into))
    }

    async fn list(&self) -> Result<Vec<Candidate>> {
        let options = FindOptions::builder().sort(doc! { "seq": 1 }).build();
        let candidates: Vec<DbCandidate> = self
            .candidates
            .find(None, options)
            .await?
            .try_collect()
            .await?;
        Ok(candidates.into_iter().map(Into::into).collect())
    }

    async fn reset_all(&self) -> Result<()> {
        let update = doc! {
            "$set": { "votes": 0_i64 }
        };
        self.candidates.update_many(doc! {}, update, None).await?;
        Ok(())
    }
}
