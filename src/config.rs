use std::sync::Arc;

use aws_config::{BehaviorVersion, SdkConfig};
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_sdk_sns::{
    config::{Credentials, Region},
    Client as SnsClient,
};
use chrono::Duration;
use lettre::message::Mailbox;
use log::{error, info, warn};
use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::model::mongodb::ensure_indexes_exist;
use crate::notify::{SmtpNotifier, SnsNotifier};
use crate::store::{MongoOtpStore, SharedStore};

/// Name of the production database.
const DATABASE: &str = "ourwill";

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // non-secrets
    otp_ttl: u32,
    max_resends: u32,
    delivery_timeout_ms: u64,
    otp_retention: u32,
    expose_codes: bool,
    // secrets
    hmac_secret: String,
}

impl Config {
    /// Valid lifetime of an OTP in seconds.
    pub fn otp_ttl(&self) -> Duration {
        Duration::seconds(self.otp_ttl.into())
    }

    /// How many times a code may be reissued before registration must restart.
    pub fn max_resends(&self) -> u32 {
        self.max_resends
    }

    /// Upper bound on a single delivery attempt.
    pub fn delivery_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.delivery_timeout_ms)
    }

    /// How long expired OTP records are kept before the database removes them.
    pub fn otp_retention(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.otp_retention.into())
    }

    /// Whether issued codes are echoed back to the caller. Only for demos and test harnesses.
    pub fn expose_codes(&self) -> bool {
        self.expose_codes
    }

    /// Secret key used to sign code HMACs.
    pub fn hmac_secret(&self) -> &[u8] {
        self.hmac_secret.as_bytes()
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

/// A fairing that loads the MongoDB config, connects to the database,
/// ensures the OTP indexes exist, and places a `MongoClient` and the OTP store
/// into managed state.
/// This fairing depends on `Config` being in managed state.
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "MongoDB",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        let retention = match rocket.state::<Config>() {
            Some(config) => config.otp_retention(),
            None => {
                error!("Application config was not available when connecting to the database");
                return Err(rocket);
            }
        };
        info!("Loaded database config, connecting...");
        // Construct the connection.
        let client = match MongoClient::with_uri_str(config.db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db = client.database(DATABASE);

        // Ensure the required indexes exist.
        if let Err(e) = ensure_indexes_exist(&db, retention).await {
            error!("Failed to connect to database: {e}");
            return Err(rocket);
        }
        info!("...database connection online!");

        // Manage the state.
        let store: SharedStore = Arc::new(MongoOtpStore::new(&db));
        rocket = rocket.manage(client).manage(store);
        Ok(rocket)
    }
}

/// Configuration for the AWS connection.
#[derive(Deserialize)]
struct AwsConfig {
    // non-secrets
    aws_region: String,
    aws_access_key_id: String,
    // secrets
    aws_secret_access_key: String,
}

/// A fairing that loads the AWS config and places an `SnsNotifier` into
/// managed state. Without AWS config, SMS delivery is disabled.
pub struct AwsFairing;

#[rocket::async_trait]
impl Fairing for AwsFairing {
    fn info(&self) -> Info {
        Info {
            name: "AWS SNS",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<AwsConfig>() {
            Ok(config) => config,
            Err(e) => {
                warn!("No usable AWS config ({e}), SMS delivery disabled");
                return Ok(rocket);
            }
        };
        // Construct the connection.
        let aws_config = SdkConfig::builder()
            .region(Region::new(config.aws_region))
            .credentials_provider(SharedCredentialsProvider::new(Credentials::new(
                config.aws_access_key_id,
                config.aws_secret_access_key,
                None,
                None,
                "rocket config",
            )))
            .behavior_version(BehaviorVersion::latest())
            .build();
        let client = SnsClient::new(&aws_config);
        info!("Loaded Amazon SNS config");

        // Manage the state.
        rocket = rocket.manage(SnsNotifier::new(client));
        Ok(rocket)
    }
}

/// Configuration for the SMTP relay.
#[derive(Deserialize)]
struct MailConfig {
    // non-secrets
    smtp_host: String,
    smtp_username: String,
    mail_from: String,
    // secrets
    smtp_password: String,
}

/// A fairing that loads the SMTP config and places an `SmtpNotifier` into
/// managed state. Without SMTP config, email delivery is disabled.
pub struct MailFairing;

#[rocket::async_trait]
impl Fairing for MailFairing {
    fn info(&self) -> Info {
        Info {
            name: "SMTP",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<MailConfig>() {
            Ok(config) => config,
            Err(e) => {
                warn!("No usable SMTP config ({e}), email delivery disabled");
                return Ok(rocket);
            }
        };
        let from = match config.mail_from.parse::<Mailbox>() {
            Ok(from) => from,
            Err(e) => {
                error!("Invalid `mail_from` address: {e}");
                return Err(rocket);
            }
        };
        // Construct the transport.
        let notifier = match SmtpNotifier::new(
            &config.smtp_host,
            config.smtp_username,
            config.smtp_password,
            from,
        ) {
            Ok(notifier) => notifier,
            Err(e) => {
                error!("Failed to set up SMTP relay: {e}");
                return Err(rocket);
            }
        };
        info!("Loaded SMTP config for {}", config.smtp_host);

        // Manage the state.
        rocket = rocket.manage(notifier);
        Ok(rocket)
    }
}
