//! Logging initialisation
//!
//! `RUST_LOG` wins over the default filter. `RELAYBUS_LOG_FORMAT=json`
//! selects structured output for production; anything else is pretty.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FORMAT_ENV: &str = "RELAYBUS_LOG_FORMAT";
pub const DEFAULT_FILTER: &str = "relaybus=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }

    pub fn from_env() -> Self {
        std::env::var(LOG_FORMAT_ENV)
            .map(|value| Self::parse(&value))
            .unwrap_or(LogFormat::Pretty)
    }
}

/// Install the global subscriber; a second call is a no-op
///
/// Returns `false` if a subscriber was already installed.
pub fn init_logging(format: LogFormat) -> anyhow::Result<bool> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;

    let installed = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty())
            .try_init(),
    };
    Ok(installed.is_ok())
}
