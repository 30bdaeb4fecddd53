use std::time::Duration;

use log::{error, info, warn};
use mongodb::{options::ClientOptions, Client as MongoClient};
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::coordinator::{VoteCoordinator, DEFAULT_STORE_TIMEOUT};
use crate::model::{ballot::VoterId, mongodb::prepare_database};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Identities allowed to use admin routes.
    #[serde(default)]
    admins: Vec<String>,
}

impl Config {
    pub fn new(admins: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            admins: admins.into_iter().map(Into::into).collect(),
        }
    }

    /// Does this identity hold admin privilege?
    pub fn is_admin(&self, id: &VoterId) -> bool {
        self.admins.iter().any(|admin| admin == id.as_str())
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the store fairing and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        if config.admins.is_empty() {
            warn!("No admins configured; admin routes are unreachable");
        }

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Which backend holds the candidates, ballots and settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Volatile; everything is lost on shutdown.
    #[default]
    Memory,
    Mongodb,
}

/// Configuration for the store.
#[derive(Deserialize)]
struct StoreConfig {
    #[serde(default)]
    store: StoreKind,
    // secrets
    db_uri: Option<String>,
    #[serde(default = "default_db_name")]
    db_name: String,
    /// Bound on connecting, server selection and every individual store operation.
    db_timeout_ms: Option<u64>,
}

fn default_db_name() -> String {
    "voting".to_string()
}

impl StoreConfig {
    fn timeout(&self) -> Duration {
        self.db_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_STORE_TIMEOUT)
    }
}

/// A fairing that loads the store config, connects to the database if needed,
/// performs any setup necessary, and places the [`VoteCoordinator`] into managed state.
/// With MongoDB, the `Client` and `Database` are managed too.
pub struct StoreFairing;

#[rocket::async_trait]
impl Fairing for StoreFairing {
    fn info(&self) -> Info {
        Info {
            name: "Vote store",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<StoreConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load store config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        let timeout = config.timeout();

        let db_uri = match (config.store, &config.db_uri) {
            (StoreKind::Memory, _) => {
                info!("Using volatile in-memory store");
                return Ok(rocket.manage(VoteCoordinator::in_memory(timeout)));
            }
            (StoreKind::Mongodb, Some(uri)) => uri,
            (StoreKind::Mongodb, None) => {
                error!("`store` is `mongodb` but `db_uri` is not set");
                return Err(rocket);
            }
        };

        info!("Loaded database config, connecting...");
        // Construct the connection.
        let client = match connect(db_uri, timeout).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db = client.database(&get_database_name(&config.db_name));

        // Ensure the required indexes, the settings singleton and the candidate counter exist.
        if let Err(e) = prepare_database(&db).await {
            error!("Failed to prepare database: {e}");
            return Err(rocket);
        }
        info!("...database connection online!");

        // Manage the state.
        let coordinator = VoteCoordinator::from_db(&db, timeout);
        rocket = rocket.manage(client).manage(db).manage(coordinator);
        Ok(rocket)
    }
}

/// Connect to MongoDB, bounding both connection establishment and server selection.
pub async fn connect(uri: &str, timeout: Duration) -> Result<MongoClient, mongodb::error::Error> {
    let mut options = ClientOptions::parse(uri).await?;
    options.app_name = Some("vote-ledger".to_string());
    options.connect_timeout = Some(timeout);
    options.server_selection_timeout = Some(timeout);
    MongoClient::with_options(options)
}

/// Get the name of the database to use (production version).
#[cfg(not(test))]
fn get_database_name(configured: &str) -> String {
    configured.to_string()
}

/// Get the name of the database to use (test version).
/// Use a random name to avoid collisions between tests.
#[cfg(test)]
pub(crate) fn get_database_name(_configured: &str) -> String {
    let random: u32 = rand::random();
    let db = format!("test{random}");
    info!("Using database {db}");
    db
}
