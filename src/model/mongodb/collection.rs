use std::ops::Deref;

use log::debug;
use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};

use super::{
    counter::Counter, ledger::LedgerEntry, registry::DbCandidate, settings::DbSettings,
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MongoCollection for DbCandidate {
    const NAME: &'static str = "candidates";
}

impl MongoCollection for LedgerEntry {
    const NAME: &'static str = "ballots";
}

impl MongoCollection for DbSettings {
    const NAME: &'static str = "settings";
}

impl MongoCollection for Counter {
    const NAME: &'static str = "counters";
}

/// Ensure that all the required indexes exist on the given database.
///
/// Ballots need no extra index: each voter's ledger entry is keyed by `_id`.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Candidate names are the registry's identity key.
    let name_index = IndexModel::builder()
        .keys(doc! {"name": 1})
        .options(unique)
        .build();
    Coll::<DbCandidate>::from_db(db)
        .create_index(name_index, None)
        .await?;

    // Listing is always in insertion order.
    let seq_index = IndexModel::builder().keys(doc! {"seq": 1}).build();
    Coll::<DbCandidate>::from_db(db)
        .create_index(seq_index, None)
        .await?;

    Ok(())
}
