//! Core types and utilities for the Radiocast server

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]

pub mod config;
pub mod error;
pub mod protocol;
pub mod types;
pub mod utils;

pub use config::Config;
pub use error::{Error, Result};
pub use types::{Call, CallId, ConfigSnapshot, LivefeedMap, Scope, SystemId, TalkgroupId, UnitId};

/// Initialize the logging system
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(logging: &config::LoggingConfig) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(logging.level.clone()));

    let registry = tracing_subscriber::registry().with(filter);

    let result = if logging.format == "text" {
        registry
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    };

    result.map_err(|e| Error::Configuration {
        message: format!("failed to install logger: {e}"),
    })
}
