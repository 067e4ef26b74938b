//! Logging setup
//!
//! `RUST_LOG` selects what is logged (default `fosdem=info`),
//! `FOSDEM_LOG_FORMAT=json` switches to structured output. Logs go to stderr so
//! command output on stdout stays pipeable.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const ENV_LOG_FORMAT: &str = "FOSDEM_LOG_FORMAT";
const DEFAULT_FILTER: &str = "fosdem=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

pub fn init(verbose: bool) -> Result<()> {
    let format = LogFormat::parse(std::env::var(ENV_LOG_FORMAT).ok().as_deref());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(if verbose { "fosdem=debug" } else { DEFAULT_FILTER }))
        .context("Failed to create env filter")?;

    match format {
        LogFormat::Json => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
                .context("Failed to install log subscriber")?;
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .try_init()
                .context("Failed to install log subscriber")?;
        }
    }

    Ok(())
}
