#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

use crate::config::{ConfigFairing, DatabaseFairing, ServicesFairing};
use crate::election::ElectionMonitorFairing;
use crate::logging::LoggerFairing;

pub mod api;
pub mod clock;
pub mod config;
pub mod election;
pub mod error;
pub mod events;
pub mod gate;
pub mod lock;
pub mod logging;
pub mod model;
pub mod verification;
pub mod voting;

pub use crate::config::Config;

/// Build the server, connecting to the database named by `db_uri`.
pub async fn build() -> Rocket<Build> {
    rocket_with_database(DatabaseFairing::FromConfig)
}

fn rocket_with_database(database: DatabaseFairing) -> Rocket<Build> {
    rocket::build()
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(database)
        .attach(ServicesFairing)
        .attach(ElectionMonitorFairing)
        .mount("/", api::routes())
}

/// Connect to the database named in the config, for tests.
#[cfg(test)]
async fn db_client() -> mongodb::Client {
    let db_uri = rocket::Config::figment()
        .extract_inner::<String>("db_uri")
        .unwrap();
    mongodb::Client::with_uri_str(db_uri).await.unwrap()
}

/// A fresh database name, for tests.
#[cfg(test)]
fn database() -> String {
    config::get_database_name()
}

/// Build the server over an existing connection and database, for tests.
#[cfg(test)]
async fn rocket_for_db(db_client: mongodb::Client, db_name: &str) -> Rocket<Build> {
    rocket_with_database(DatabaseFairing::Existing(db_client, db_name.to_string()))
}
