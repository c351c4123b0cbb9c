#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{figment::Figment, Build, Rocket};

use crate::config::{AwsFairing, ConfigFairing, DatabaseFairing, MailFairing};
use crate::logging::LoggerFairing;
use crate::notify::SharedNotifier;
use crate::service::OtpServiceFairing;
use crate::store::SharedStore;

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod notify;
pub mod service;
pub mod store;

pub use config::Config;

/// Build the production server: MongoDB storage with SNS and SMTP delivery.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(AwsFairing)
        .attach(MailFairing)
        .attach(OtpServiceFairing)
        .attach(LoggerFairing)
        .mount("/", api::routes())
        .register("/", api::catchers())
}

/// Build a server around an existing store and notifier.
/// Only the application config is read from `figment`.
pub fn rocket_for_store_and_notifier(
    figment: Figment,
    store: SharedStore,
    notifier: SharedNotifier,
) -> Rocket<Build> {
    rocket::custom(figment)
        .manage(store)
        .manage(notifier)
        .attach(ConfigFairing)
        .attach(OtpServiceFairing)
        .attach(LoggerFairing)
        .mount("/", api::routes())
        .register("/", api::catchers())
}

/// Config used by tests, independent of any `Rocket.toml`.
#[cfg(test)]
pub(crate) fn test_figment() -> Figment {
    rocket::Config::figment()
        .merge(("otp_ttl", 900))
        .merge(("max_resends", 3))
        .merge(("delivery_timeout_ms", 1000))
        .merge(("otp_retention", 86400))
        .merge(("expose_codes", false))
        .merge(("hmac_secret", "test secret"))
}
