//! MongoDB-backed stores.
//!
//! Collections: `candidates` (the registry), `ballots` (the ledger, one document per voter),
//! `settings` (a single document) and `counters` (candidate insertion sequence).

mod collection;
mod counter;
mod errors;
mod ledger;
mod registry;
mod settings;

pub use collection::{ensure_indexes_exist, Coll, MongoCollection};
pub use counter::{ensure_candidate_seq_counter_exists, Counter, CANDIDATE_SEQ_COUNTER_ID};
pub use errors::is_duplicate_key_error;
pub use ledger::{DbBallot, LedgerEntry, MongoLedger};
pub use registry::{DbCandidate, MongoRegistry};
pub use settings::{ensure_settings_exist, DbSettings, MongoSettings, SETTINGS_ID};

use mongodb::{error::Error as DbError, Database};

/// Perform all idempotent setup the stores rely on: indexes, the settings singleton
/// and the candidate sequence counter.
pub async fn prepare_database(db: &Database) -> Result<(), DbError> {
    ensure_indexes_exist(db).await?;
    ensure_settings_exist(&Coll::from_db(db)).await?;
    ensure_candidate_seq_counter_exists(&Coll::from_db(db)).await?;
    Ok(())
}
