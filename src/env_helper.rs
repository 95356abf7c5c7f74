//!
//! Optional module for configuring from environment variables
//!
//! * `TELEMETRY_RPC_URL` - endpoint, e.g. `https://status.example.net/api/rpc2` (required)
//! * `TELEMETRY_RPC_TOKEN` - bearer token, optional
//! * `TELEMETRY_POLL_SECS` - status poll cadence in seconds, optional
//! * `TELEMETRY_RANGE_HOURS` - initial time-series range, optional
//!
use crate::monitor::{Monitor, MonitorOptions};
use crate::rpc::http::{Client, ClientBuilder};
use crate::{Error, Result};
use std::str::FromStr;
use std::time::Duration;

fn optional<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::General(format!("invalid value '{value}' for {name}"))),
        Err(_) => Ok(None),
    }
}

impl MonitorOptions {
    /// Defaults overridden by `TELEMETRY_POLL_SECS` and
    /// `TELEMETRY_RANGE_HOURS` when set
    pub fn from_env() -> Result<Self> {
        let mut options = Self::default();
        if let Some(secs) = optional::<u64>("TELEMETRY_POLL_SECS")? {
            options.status_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(hours) = optional::<u32>("TELEMETRY_RANGE_HOURS")? {
            options.records.range_hours = hours.max(1);
        }
        Ok(options)
    }
}

/// Build a client from `TELEMETRY_RPC_URL` and `TELEMETRY_RPC_TOKEN`
pub fn connect() -> Result<Client> {
    let url = std::env::var("TELEMETRY_RPC_URL")
        .map_err(|_| Error::MissingEnv("TELEMETRY_RPC_URL".into()))?;
    tracing::info!("Connecting to endpoint at {}", url);

    let builder = ClientBuilder::new();
    let builder = match std::env::var("TELEMETRY_RPC_TOKEN") {
        Ok(token) => builder.bearer_token(&token),
        Err(_) => builder,
    };
    builder.build(&url)
}

/// Connect and start a monitor configured from the environment
pub async fn start() -> Result<Monitor> {
    let client = connect()?;
    Monitor::builder(client)
        .options(MonitorOptions::from_env()?)
        .start()
        .await
}
