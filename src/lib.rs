//!
//! Realtime state synchronization for server-monitoring dashboards.
//!
//! The crate keeps a consistent in-memory view of many monitored nodes whose
//! status arrives asynchronously from a remote procedure endpoint, and
//! assembles long-running time series (uptime, latency) from overlapping
//! incremental fetches.
//!
//! ## Monitor
//! The [`monitor::Monitor`] wires every component together and runs the
//! background loops.
//! ```no_run
//! #[tokio::main]
//! async fn main() -> Result<(), telemetry_sync::Error> {
//!     use telemetry_sync::rpc::http::ClientBuilder;
//!     use telemetry_sync::monitor::Monitor;
//!
//!     let client = ClientBuilder::new()
//!         .bearer_token("api-key")
//!         .build("https://status.example.net/api/rpc2")?;
//!
//!     let monitor = Monitor::builder(client).start().await?;
//!
//!     let mut changes = monitor.registry().subscribe();
//!     while changes.changed().await.is_ok() {
//!         let snapshot = changes.borrow_and_update().clone();
//!         for node in snapshot.iter() {
//!             println!("{} online={}", node.info.name, node.is_online());
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Time series
//! Uptime and latency history are fetched lazily, only for nodes that are
//! shown.
//! ```no_run
//! # async fn doc(monitor: telemetry_sync::monitor::Monitor) -> telemetry_sync::Result<()> {
//! let uptime = monitor.load_records().show("node-a").await?;
//! println!("uptime {:.1}%", uptime.summary.uptime_percent);
//!
//! let latency = monitor.ping_records().show("node-a").await?;
//! for task in &latency.summary.tasks {
//!     println!("{}: {:.1}% lost", task.task.name, task.stats.loss_percent);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

use serde::Deserialize;

pub mod dedup;
pub mod monitor;
pub mod reconciler;
pub mod records;
pub mod registry;
pub mod rpc;
pub mod sparkline;
pub mod types;

#[cfg(feature = "env-helper")]
pub mod env_helper;

#[cfg(test)]
pub(crate) mod testing;

/// Error object of a JSON-RPC response
#[derive(Debug, Deserialize)]
pub struct RpcErrorObject {
    /// Error code
    pub code: i64,
    /// Error message
    pub message: String,
    /// Additional error information
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Error returned by library functions
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The remote procedure returned an error object
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Error message
        message: String,
    },

    /// Failed returned by the HTTP server
    #[error("HTTP failed {0}, {1}")]
    WebServer(u16, String),

    /// JSON serialization/deserialization error
    #[error("Serde JSON error: {0}")]
    Serde(#[from] serde_json::Error),

    /// URL parsing error
    #[error("URL: {0}")]
    URL(#[from] url::ParseError),

    /// HTTP client error
    #[error("Reqwest: {0}")]
    HTTPClient(#[from] reqwest::Error),

    /// This error is returned if we get data from the API we can't parse/understand
    #[error("API Error {0:?}")]
    API(String),

    /// Configuration is read from an environment variable that is not set
    #[error("Missing environment variable '{0}'")]
    MissingEnv(String),

    /// Error observed through an operation shared between several callers
    #[error("{0}")]
    Shared(std::sync::Arc<Error>),

    /// The owning monitor has been shut down
    #[error("Shut down")]
    Closed,

    /// General Error
    #[error("Error {0}")]
    General(String),
}

impl Error {
    /// Create a general error
    #[must_use]
    pub fn general(err: &str) -> Self {
        Self::General(err.to_string())
    }

    /// True for errors caused by the transport rather than by the remote
    /// application.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        match self {
            Self::WebServer(_, _) | Self::HTTPClient(_) => true,
            Self::Shared(e) => e.is_transport(),
            _ => false,
        }
    }
}

impl From<RpcErrorObject> for Error {
    fn from(e: RpcErrorObject) -> Self {
        Self::Rpc {
            code: e.code,
            message: e.message,
        }
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rpc_error_object_converts() {
        let obj: RpcErrorObject =
            serde_json::from_str(r#"{"code":-32601,"message":"Method not found"}"#).unwrap();
        let err = Error::from(obj);
        assert_eq!(err.to_string(), "RPC error -32601: Method not found");
        assert!(!err.is_transport());
    }

    #[test]
    fn shared_error_keeps_transport_classification() {
        let err = Error::Shared(std::sync::Arc::new(Error::WebServer(
            502,
            "Bad Gateway".into(),
        )));
        assert!(err.is_transport());
        assert_eq!(err.to_string(), "HTTP failed 502, Bad Gateway");
    }
}
