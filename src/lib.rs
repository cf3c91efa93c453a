#[macro_use]
extern crate log;

#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use std::time::Duration;

use rocket::{Build, Rocket};

use config::{ConfigFairing, LedgerFairing, ServiceFairing};
use logging::LoggerFairing;
use model::{service::SharedService, session::SessionStore};

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod schedule;

pub use config::Config;

/// Build a rocket whose ledger, registry and service are all assembled from
/// the figment at ignition.
pub fn build() -> Rocket<Build> {
    mount(rocket::build())
        .attach(ConfigFairing)
        .attach(LedgerFairing)
        .attach(ServiceFairing)
}

/// Build a rocket around an already-assembled service.
pub fn build_for_service(service: SharedService, session_ttl: Duration) -> Rocket<Build> {
    mount(rocket::build())
        .manage(service)
        .manage(SessionStore::new(session_ttl))
}

fn mount(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/", api::routes()).attach(LoggerFairing)
}
