#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

pub mod api;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod model;

pub use config::Config;
pub use coordinator::VoteCoordinator;

use config::{ConfigFairing, StoreFairing};
use logging::LoggerFairing;

/// Build the server: config and store come from `Rocket.toml` / `ROCKET_*` variables.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(StoreFairing)
        .mount("/", api::routes())
        .register("/", api::catchers())
}

/// Build the server around an existing coordinator and config, bypassing the store fairing.
pub fn rocket_for_coordinator(coordinator: VoteCoordinator, config: Config) -> Rocket<Build> {
    rocket::build()
        .attach(LoggerFairing)
        .manage(config)
        .manage(coordinator)
        .mount("/", api::routes())
        .register("/", api::catchers())
}

/// Environment variable holding the MongoDB URI that database-backed tests run against.
#[cfg(test)]
const TEST_DB_URI_VAR: &str = "VOTE_LEDGER_TEST_DB_URI";

/// Connect to the test MongoDB deployment, or `None` if none is configured.
#[cfg(test)]
async fn test_db_client() -> Option<mongodb::Client> {
    let uri = std::env::var(TEST_DB_URI_VAR).ok()?;
    Some(
        config::connect(&uri, coordinator::DEFAULT_STORE_TIMEOUT)
            .await
            .expect("could not connect to test database"),
    )
}
