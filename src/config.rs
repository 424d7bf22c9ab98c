use std::sync::Arc;
use std::time::Duration;

use mongodb::{Client as MongoClient, Database};
use rocket::{
    data::ByteUnit,
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::clock::{Clock, SystemClock};
use crate::election::ElectionLifecycle;
use crate::events::Notifier;
use crate::gate::OcrGate;
use crate::lock::{LockManager, LockPolicy};
use crate::model::mongodb::{ensure_indexes_exist, MongoStore};
use crate::verification::{
    DocumentVerifier, GeminiOcr, OcrEngine, TesseractCli, VerificationService,
};
use crate::voting::VoteService;

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Debug, Deserialize)]
pub struct Config {
    // non-secrets
    #[serde(default = "default_ocr_max_concurrency")]
    ocr_max_concurrency: usize,
    #[serde(default = "default_ocr_confidence_threshold")]
    ocr_confidence_threshold: f64,
    #[serde(default = "default_true")]
    ocr_fallback_enabled: bool,
    #[serde(default = "default_tesseract_path")]
    tesseract_path: String,
    #[serde(default = "default_tesseract_language")]
    tesseract_language: String,
    #[serde(default = "default_gemini_model")]
    gemini_model: String,
    #[serde(default = "default_gemini_endpoint")]
    gemini_endpoint: String,
    #[serde(default = "default_lock_ttl_ms")]
    lock_ttl_ms: u64,
    #[serde(default = "default_lock_retries")]
    lock_retries: u32,
    #[serde(default = "default_lock_retry_delay_ms")]
    lock_retry_delay_ms: u64,
    #[serde(default = "default_election_monitor_interval_secs")]
    election_monitor_interval_secs: u64,
    #[serde(default = "default_max_document_size")]
    max_document_size: u64,
    // secrets
    #[serde(default)]
    gemini_api_key: Option<String>,
}

fn default_ocr_max_concurrency() -> usize {
    2
}

fn default_ocr_confidence_threshold() -> f64 {
    0.7
}

fn default_true() -> bool {
    true
}

fn default_tesseract_path() -> String {
    "tesseract".to_string()
}

fn default_tesseract_language() -> String {
    "eng".to_string()
}

fn default_gemini_model() -> String {
    "gemini-3-flash-preview".to_string()
}

fn default_gemini_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_lock_ttl_ms() -> u64 {
    8000
}

fn default_lock_retries() -> u32 {
    6
}

fn default_lock_retry_delay_ms() -> u64 {
    200
}

fn default_election_monitor_interval_secs() -> u64 {
    60
}

fn default_max_document_size() -> u64 {
    10 * 1024 * 1024
}

impl Config {
    /// How many document verifications may run at once. At least one.
    pub fn ocr_max_concurrency(&self) -> usize {
        self.ocr_max_concurrency.max(1)
    }

    /// Local OCR confidence below which the remote engine is consulted.
    pub fn ocr_confidence_threshold(&self) -> f64 {
        self.ocr_confidence_threshold
    }

    /// Whether to fall back to the remote engine at all.
    pub fn ocr_fallback_enabled(&self) -> bool {
        self.ocr_fallback_enabled
    }

    /// Path to the `tesseract` binary.
    pub fn tesseract_path(&self) -> &str {
        &self.tesseract_path
    }

    /// Tesseract language pack(s), e.g. `eng`.
    pub fn tesseract_language(&self) -> &str {
        &self.tesseract_language
    }

    pub fn gemini_model(&self) -> &str {
        &self.gemini_model
    }

    /// Base URL of the Generative Language API.
    pub fn gemini_endpoint(&self) -> &str {
        &self.gemini_endpoint
    }

    /// API key for the remote engine. Without one there is no fallback.
    pub fn gemini_api_key(&self) -> Option<&str> {
        self.gemini_api_key.as_deref().filter(|key| !key.is_empty())
    }

    /// Lease settings for per-voter locks.
    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            ttl: chrono::Duration::milliseconds(self.lock_ttl_ms as i64),
            max_retries: self.lock_retries,
            retry_delay: Duration::from_millis(self.lock_retry_delay_ms),
        }
    }

    /// How often the election monitor checks for expiry.
    pub fn election_monitor_interval(&self) -> Duration {
        Duration::from_secs(self.election_monitor_interval_secs.max(1))
    }

    /// Largest accepted ID document upload.
    pub fn max_document_size(&self) -> ByteUnit {
        ByteUnit::from(self.max_document_size)
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
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

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    // secrets
    db_uri: String,
}

/// A fairing that connects to MongoDB (or adopts an existing connection),
/// ensures indexes exist, and places both a `Client` and a `Database` into
/// managed state.
pub enum DatabaseFairing {
    /// Connect using `db_uri` from the config.
    FromConfig,
    /// Use an already-connected client and the named database.
    #[allow(dead_code)]
    Existing(MongoClient, String),
}

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "MongoDB",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let (client, db_name) = match self {
            Self::FromConfig => {
                // Load the config.
                let config = match rocket.figment().extract::<DbConfig>() {
                    Ok(config) => config,
                    Err(e) => {
                        error!("Failed to load database config");
                        rocket::config::pretty_print_error(e);
                        return Err(rocket);
                    }
                };
                info!("Loaded database config, connecting...");
                // Construct the connection.
                match MongoClient::with_uri_str(config.db_uri).await {
                    Ok(client) => (client, get_database_name()),
                    Err(e) => {
                        error!("Failed to connect to database: {e}");
                        return Err(rocket);
                    }
                }
            }
            Self::Existing(client, db_name) => (client.clone(), db_name.clone()),
        };
        let db = client.database(&db_name);

        // Ensure the required indexes exist.
        if let Err(e) = ensure_indexes_exist(&db).await {
            error!("Failed to connect to database: {e}");
            return Err(rocket);
        }
        info!("...database connection online!");

        // Manage the state.
        rocket = rocket.manage(client).manage(db);
        Ok(rocket)
    }
}

/// Get the name of the database to use (production version).
#[cfg(not(test))]
fn get_database_name() -> String {
    "idvote".to_string()
}

/// Get the name of the database to use (test version).
/// Use a random name to avoid collisions between tests.
#[cfg(test)]
pub(crate) fn get_database_name() -> String {
    let random: u32 = rand::random();
    let db = format!("test{random}");
    info!("Using database {db}");
    db
}

/// A fairing that builds the stores, engines and services from the config
/// and database connection, and places them into managed state.
pub struct ServicesFairing;

#[rocket::async_trait]
impl Fairing for ServicesFairing {
    fn info(&self) -> Info {
        Info {
            name: "Services",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let (config, client, db) = match (
            rocket.state::<Config>(),
            rocket.state::<MongoClient>(),
            rocket.state::<Database>(),
        ) {
            (Some(config), Some(client), Some(db)) => (config, client.clone(), db.clone()),
            _ => {
                error!("Services need the config and database fairings to run first");
                return Err(rocket);
            }
        };

        let store = Arc::new(MongoStore::new(client, db));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let notifier = Notifier::new();
        let locks = LockManager::new(store.clone(), clock.clone());

        let local: Arc<dyn OcrEngine> = Arc::new(TesseractCli::new(
            config.tesseract_path(),
            config.tesseract_language(),
        ));
        let remote: Option<Arc<dyn OcrEngine>> = match config.gemini_api_key() {
            Some(key) if config.ocr_fallback_enabled() => Some(Arc::new(GeminiOcr::new(
                config.gemini_endpoint(),
                config.gemini_model(),
                key,
            ))),
            None if config.ocr_fallback_enabled() => {
                warn!("OCR fallback enabled but no Gemini API key set; running without it");
                None
            }
            _ => None,
        };
        let verifier =
            DocumentVerifier::new(local, remote, config.ocr_confidence_threshold());
        let gate = OcrGate::new(config.ocr_max_concurrency());
        info!(
            "OCR gate admits {} verification(s) at a time",
            gate.capacity()
        );

        let lifecycle = ElectionLifecycle::new(store.clone(), clock.clone(), notifier.clone());
        let votes = VoteService::new(
            store.clone(),
            store.clone(),
            locks.clone(),
            config.lock_policy(),
            notifier.clone(),
            clock.clone(),
        );
        let verification = VerificationService::new(
            gate,
            verifier,
            store.clone(),
            locks,
            config.lock_policy(),
            notifier.clone(),
            clock,
        );

        Ok(rocket
            .manage(MongoStore::clone(&store))
            .manage(notifier)
            .manage(lifecycle)
            .manage(votes)
            .manage(verification))
    }
}

#[cfg(test)]
mod tests {
    use rocket::figment::{providers::Serialized, Figment};

    use super::*;

    #[test]
    fn defaults() {
        let config: Config = Figment::new().extract().unwrap();
        assert_eq!(config.ocr_max_concurrency(), 2);
        assert_eq!(config.ocr_confidence_threshold(), 0.7);
        assert!(config.ocr_fallback_enabled());
        assert_eq!(config.gemini_api_key(), None);
        assert_eq!(config.lock_policy(), LockPolicy::default());
        assert_eq!(config.election_monitor_interval(), Duration::from_secs(60));
        assert_eq!(config.max_document_size(), ByteUnit::Mebibyte(10));
    }

    #[test]
    fn overrides() {
        let config: Config = Figment::new()
            .merge(Serialized::default("ocr_max_concurrency", 0))
            .merge(Serialized::default("gemini_api_key", ""))
            .merge(Serialized::default("lock_retries", 2))
            .extract()
            .unwrap();
        assert_eq!(config.ocr_max_concurrency(), 1);
        assert_eq!(config.gemini_api_key(), None);
        assert_eq!(config.lock_policy().max_retries, 2);
    }
}
