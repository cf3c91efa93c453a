use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::model::{
    ballot::ChoiceId,
    election::ElectionPhase,
    identity::Fingerprinter,
    ledger::{BallotLedger, MemoryLedger, MongoLedger},
    registry::EligibilityRegistry,
    service::{SharedService, VerificationService},
    session::SessionStore,
};
use crate::schedule::PhaseSchedule;

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    registry_file: PathBuf,
    choices: Vec<ChoiceId>,
    election_phase: ElectionPhase,
    voting_closes_at: Option<DateTime<Utc>>,
    step_timeout: u64,
    session_ttl: u64,
    // secrets
    fingerprint_secret: String,
}

impl Config {
    /// Voter roll snapshot, one identity number per line.
    pub fn registry_file(&self) -> &Path {
        &self.registry_file
    }

    /// The options on the ballot.
    pub fn choices(&self) -> &[ChoiceId] {
        &self.choices
    }

    /// Phase the election starts in when the server launches.
    pub fn election_phase(&self) -> ElectionPhase {
        self.election_phase
    }

    /// If set, voting closes automatically at this time.
    pub fn voting_closes_at(&self) -> Option<DateTime<Utc>> {
        self.voting_closes_at
    }

    /// Longest a verification or commit step may take, from milliseconds.
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout)
    }

    /// Idle lifetime of a verification session, from seconds.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl)
    }

    /// Secret key for identity fingerprints. Changing it orphans every
    /// existing ledger entry.
    pub fn fingerprint_secret(&self) -> &[u8] {
        self.fingerprint_secret.as_bytes()
    }
}

/// A fairing that loads the application config and puts it in managed state.
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
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        if config.choices.is_empty() {
            error!("No ballot choices configured");
            return Err(rocket);
        }
        if config.step_timeout == 0 {
            error!("`step_timeout` must be greater than zero");
            return Err(rocket);
        }

        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LedgerBackend {
    Memory,
    Mongodb,
}

/// Configuration for ballot storage.
#[derive(Deserialize)]
struct LedgerConfig {
    ledger: LedgerBackend,
    db_name: Option<String>,
    // secrets
    db_uri: Option<String>,
}

const DEFAULT_DB_NAME: &str = "votecheck";

/// A fairing that opens the configured ballot ledger and places it into
/// managed state as an `Arc<dyn BallotLedger>`.
pub struct LedgerFairing;

#[rocket::async_trait]
impl Fairing for LedgerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Ballot ledger",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<LedgerConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load ledger config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        let ledger: Arc<dyn BallotLedger> = match config.ledger {
            LedgerBackend::Memory => {
                warn!("Using the in-memory ledger; ballots will not survive a restart");
                Arc::new(MemoryLedger::new())
            }
            LedgerBackend::Mongodb => {
                let Some(db_uri) = config.db_uri else {
                    error!("`db_uri` must be set to use the mongodb ledger");
                    return Err(rocket);
                };
                info!("Loaded database config, connecting...");
                let client = match MongoClient::with_uri_str(db_uri).await {
                    Ok(client) => client,
                    Err(e) => {
                        error!("Failed to connect to database: {e}");
                        return Err(rocket);
                    }
                };
                let db_name = config.db_name.as_deref().unwrap_or(DEFAULT_DB_NAME);
                match MongoLedger::open(&client.database(db_name)).await {
                    Ok(ledger) => {
                        info!("...database connection online!");
                        Arc::new(ledger)
                    }
                    Err(e) => {
                        error!("Failed to open ballot ledger: {e}");
                        return Err(rocket);
                    }
                }
            }
        };

        rocket = rocket.manage(ledger);
        Ok(rocket)
    }
}

/// A fairing that loads the eligibility registry and assembles the
/// verification service and session store from the config and ledger.
/// Must be attached after [`ConfigFairing`] and [`LedgerFairing`].
pub struct ServiceFairing;

#[rocket::async_trait]
impl Fairing for ServiceFairing {
    fn info(&self) -> Info {
        Info {
            name: "Verification service",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let (service, sessions, closes_at) = {
            let (Some(config), Some(ledger)) = (
                rocket.state::<Config>(),
                rocket.state::<Arc<dyn BallotLedger>>(),
            ) else {
                error!("Verification service needs the config and ledger fairings");
                return Err(rocket);
            };

            let fingerprinter = Fingerprinter::new(config.fingerprint_secret());
            let registry = match EligibilityRegistry::load(config.registry_file(), &fingerprinter) {
                Ok(registry) => registry,
                Err(e) => {
                    error!("{e} ({})", config.registry_file().display());
                    return Err(rocket);
                }
            };
            if registry.is_empty() {
                warn!("Eligibility registry is empty; nobody will be able to vote");
            }
            info!("Loaded {} eligible voters", registry.len());

            let service: SharedService = Arc::new(VerificationService::new(
                fingerprinter,
                registry,
                ledger.clone(),
                config.choices().to_vec(),
                config.election_phase(),
                config.step_timeout(),
            ));
            let sessions = SessionStore::new(config.session_ttl());
            (service, sessions, config.voting_closes_at())
        };

        if let Some(closes_at) = closes_at {
            let schedule = PhaseSchedule::new(service.clone(), ElectionPhase::Post, closes_at);
            rocket = rocket.manage(schedule);
        }

        rocket = rocket.manage(service).manage(sessions);
        Ok(rocket)
    }
}
