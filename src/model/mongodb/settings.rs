use log::{debug, warn};
use mongodb::{
    bson::{doc, Document},
    error::Error as DbError,
    options::UpdateOptions,
    Database,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::settings::{SettingsStore, VotingSettings};

use super::Coll;

/// `_id` of the settings singleton.
pub const SETTINGS_ID: &str = "config";

/// The settings singleton as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbSettings {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(flatten)]
    pub settings: VotingSettings,
}

/// Every settings field at its default value.
fn default_fields() -> Document {
    let defaults = VotingSettings::default();
    doc! {
        "voting_open": defaults.voting_open,
        "multi_vote_allowed": defaults.multi_vote_allowed,
    }
}

/// Create the settings singleton with default values if it does not exist yet.
///
/// This operation is idempotent.
pub async fn ensure_settings_exist(
    settings: &Coll<DbSettings>,
) -> std::result::Result<(), DbError> {
    debug!("Ensuring voting settings exist");
    let update = doc! { "$setOnInsert": default_fields() };
    let options = UpdateOptions::builder().upsert(true).build();
    settings
        .update_one(doc! { "_id": SETTINGS_ID }, update, options)
        .await?;
    Ok(())
}

/// [`SettingsStore`] backed by the single document in the `settings` collection.
#[derive(Clone)]
pub struct MongoSettings {
    settings: Coll<DbSettings>,
}

impl MongoSettings {
    pub fn from_db(db: &Database) -> Self {
        Self {
            settings: Coll::from_db(db),
        }
    }

    /// Set one field. If the document has gone missing it is recreated with every
    /// other field at its default, so reads never see a partial document.
    async fn set(&self, field: &str, value: bool) -> Result<()> {
        let mut fields = Document::new();
        fields.insert(field, value);
        let mut defaults = default_fields();
        defaults.remove(field);
        let update = doc! { "$set": fields, "$setOnInsert": defaults };
        let options = UpdateOptions::builder().upsert(true).build();
        self.settings
            .update_one(doc! { "_id": SETTINGS_ID }, update, options)
            .await?;
        Ok(())
    }
}

#[rocket::async_trait]
impl SettingsStore for MongoSettings {
    async fn get(&self) -> Result<VotingSettings> {
        let stored = self
            .settings
            .find_one(doc! { "_id": SETTINGS_ID }, None)
            .await?;
        Ok(match stored {
            Some(stored) => stored.settings,
            None => {
                warn!("Voting settings missing from database, using defaults");
                VotingSettings::default()
            }
        })
    }

    async fn set_voting_open(&self, open: bool) -> Result<()> {
        self.set("voting_open", open).await
    }

    async fn set_multi_vote_allowed(&self, allowed: bool) -> Result<()> {
        self.set("multi_vote_allowed", allowed).await
    }
}
