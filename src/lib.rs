//! jmx-scraper library
//!
//! Connects to a JVM through its Jolokia agent, polls the MBean attributes
//! selected by declarative mapping catalogs on a fixed schedule and hands the
//! resulting metric observations to an emitter.
//!
//! Flow: [`config`] → [`connection`] → [`session`] → [`scheduler`] ⇄
//! [`mapping`] → [`emitter`].

pub mod cli;
pub mod config;
pub mod connection;
pub mod emitter;
pub mod error;
pub mod mapping;
pub mod metrics;
pub mod scheduler;
pub mod session;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging subsystem
///
/// `RUST_LOG` wins over `level` when set. Logs go to stderr so stdout stays
/// free for `--validate` / `--dry-run` output.
///
/// # Errors
/// Returns an error if a global subscriber is already installed
pub fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
