use log::debug;
use mongodb::{
    bson::doc,
    error::Error as DbError,
    options::{FindOneAndUpdateOptions, ReturnDocument, UpdateOptions},
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::mongodb::Coll;

/// ID of the counter that hands out candidate insertion sequence numbers.
pub const CANDIDATE_SEQ_COUNTER_ID: &str = "candidate_seq";

/// A counter object used to implement auto-increment fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
    #[serde(rename = "_id")]
    pub id: String,
    pub next: u64,
}

impl Counter {
    /// Create a new `Counter` with the given ID, starting at the given value.
    pub fn new(id: impl Into<String>, start: u64) -> Self {
        Self {
            id: id.into(),
            next: start,
        }
    }

    /// Atomically retrieve the next value of the counter with the given ID.
    pub async fn next(counters: &Coll<Counter>, id: &str) -> Result<u64> {
        let update = doc! {
            "$inc": { "next": 1_i64 }
        };
        let options: FindOneAndUpdateOptions = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::Before)
            .build();
        let counter = counters
            .find_one_and_update(doc! { "_id": id }, update, options)
            .await?
            .ok_or_else(|| Error::StoreUnavailable(format!("Failed to find counter with ID {id}")))?;
        Ok(counter.next)
    }
}

/// Create the candidate sequence counter if it does not exist yet.
///
/// This operation is idempotent.
pub async fn ensure_candidate_seq_counter_exists(
    counters: &Coll<Counter>,
) -> std::result::Result<(), DbError> {
    debug!("Ensuring candidate sequence counter exists");
    let update = doc! {
        "$setOnInsert": { "next": 1_i64 }
    };
    let options = UpdateOptions::builder().upsert(true).build();
    counters
        .update_one(doc! { "_id": CANDIDATE_SEQ_COUNTER_ID }, update, options)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use mongodb::Database;

    #[backend_test(mongodb)]
    async fn counter_increment(db: Database) {
        const START: u64 = 5;

        // Create a counter and insert it.
        let counters = Coll::<Counter>::from_db(&db);
        counters
            .insert_one(Counter::new("test_counter", START), None)
            .await
            .unwrap();

        // Get the next value.
        let next = Counter::next(&counters, "test_counter").await.unwrap();
        assert_eq!(next, START);

        // Check the counter was incremented.
        let counter = counters
            .find_one(doc! { "_id": "test_counter" }, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counter.next, START + 1);
    }

    #[backend_test(mongodb)]
    async fn ensure_counter_is_idempotent(counters: Coll<Counter>) {
        ensure_candidate_seq_counter_exists(&counters).await.unwrap();
        assert_eq!(
            Counter::next(&counters, CANDIDATE_SEQ_COUNTER_ID).await.unwrap(),
            1
        );

        // Must not reset an existing counter.
        ensure_candidate_seq_counter_exists(&counters).await.unwrap();
        assert_eq!(
            Counter::next(&counters, CANDIDATE_SEQ_COUNTER_ID).await.unwrap(),
            2
        );
    }

    #[backend_test(mongodb)]
    async fn missing_counter(counters: Coll<Counter>) {
        assert!(matches!(
            Counter::next(&counters, "no_such_counter").await,
            Err(Error::StoreUnavailable(_))
        ));
    }
}
