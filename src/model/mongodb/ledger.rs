use chrono::{DateTime, Utc};
use log::debug;
use mongodb::{
    bson::{doc, serde_helpers::chrono_datetime_as_bson_datetime, DateTime as BsonDateTime},
    options::UpdateOptions,
    Database,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::ballot::{BallotLedger, BallotRecord, VoterId};

use super::{errors::is_duplicate_key_error, Coll};

/// A single ballot inside a voter's ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbBallot {
    pub candidate_name: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub cast_at: DateTime<Utc>,
}

/// Every ballot cast by one voter, oldest first.
///
/// Keying the document by voter makes "insert only if this voter has no ballot" a plain
/// `insert_one` that the `_id` uniqueness constraint either accepts or rejects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(rename = "_id")]
    pub voter_id: VoterId,
    pub ballots: Vec<DbBallot>,
}

impl LedgerEntry {
    fn first(ballot: BallotRecord) -> Self {
        Self {
            voter_id: ballot.voter_id,
            ballots: vec![DbBallot {
                candidate_name: ballot.candidate_name,
                cast_at: ballot.cast_at,
            }],
        }
    }
}

/// [`BallotLedger`] backed by the `ballots` collection.
#[derive(Clone)]
pub struct MongoLedger {
    ballots: Coll<LedgerEntry>,
}

impl MongoLedger {
    pub fn from_db(db: &Database) -> Self {
        Self {
            ballots: Coll::from_db(db),
        }
    }
}

#[rocket::async_trait]
impl BallotLedger for MongoLedger {
    async fn has_voted(&self, voter_id: &VoterId) -> Result<bool> {
        let count = self
            .ballots
            .count_documents(doc! { "_id": voter_id.as_str() }, None)
            .await?;
        Ok(count > 0)
    }

    async fn get_vote(&self, voter_id: &VoterId) -> Result<Option<String>> {
        let entry = self
            .ballots
            .find_one(doc! { "_id": voter_id.as_str() }, None)
            .await?;
        Ok(entry
            .and_then(|entry| entry.ballots.into_iter().last())
            .map(|ballot| ballot.candidate_name))
    }

    async fn record(&self, ballot: BallotRecord) -> Result<()> {
        let filter = doc! { "_id": ballot.voter_id.as_str() };
        let update = doc! {
            "$push": {
                "ballots": {
                    "candidate_name": &ballot.candidate_name,
                    "cast_at": BsonDateTime::from_chrono(ballot.cast_at),
                }
            }
        };
        let upsert = UpdateOptions::builder().upsert(true).build();
        match self
            .ballots
            .update_one(filter.clone(), update.clone(), upsert)
            .await
        {
            Ok(_) => Ok(()),
            // Two concurrent upserts for a new voter: the loser now has a document to push to.
            Err(e) if is_duplicate_key_error(&e) => {
                debug!("Upsert race for voter {}, retrying", ballot.voter_id);
                self.ballots.update_one(filter, update, None).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn record_first(&self, ballot: BallotRecord) -> Result<bool> {
        match self
            .ballots
            .insert_one(LedgerEntry::first(ballot), None)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key_error(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear_all(&self) -> Result<()> {
        let result = self.ballots.delete_many(doc! {}, None).await?;
        debug!("Cleared {} ledger entries", result.deleted_count);
        Ok(())
    }
}
