use serde::Deserialize;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::error::ConfigError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

pub fn build_logger(
    format: LogFormat,
    filter: &str,
) -> Result<Box<dyn Layer<Registry> + Send + Sync>, tracing_subscriber::filter::ParseError> {
    let filter = EnvFilter::try_new(filter)?;

    Ok(match format {
        LogFormat::Json => fmt::Layer::<Registry>::default()
            .json()
            .with_filter(filter)
            .boxed(),
        LogFormat::Pretty => fmt::Layer::<Registry>::default()
            .pretty()
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => fmt::Layer::<Registry>::default()
            .compact()
            .with_filter(filter)
            .boxed(),
    })
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init(format: LogFormat, filter: &str) -> Result<(), ConfigError> {
    let logger = build_logger(format, filter).map_err(|e| ConfigError::LogFilter(e.to_string()))?;
    if tracing_subscriber::registry().with(logger).try_init().is_err() {
        tracing::debug!("global subscriber already installed");
    }
    Ok(())
}
