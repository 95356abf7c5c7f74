//!
//! JSON-RPC 2.0 over HTTP POST.
//!
use super::{ConnectionState, Rpc};
use crate::{Error, Result, RpcErrorObject};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: serde_json::Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: serde_json::Value,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

impl JsonRpcResponse {
    fn into_result(self, expected_id: u64) -> Result<serde_json::Value> {
        if let Some(error) = self.error {
            return Err(error.into());
        }
        if self.id.as_u64() != Some(expected_id) {
            return Err(Error::API(format!(
                "response id {} does not match request id {expected_id}",
                self.id
            )));
        }
        Ok(self.result.unwrap_or(serde_json::Value::Null))
    }
}

/// State entered when a call starts
fn state_on_call(prev: ConnectionState) -> ConnectionState {
    match prev {
        ConnectionState::Disconnected | ConnectionState::Connecting => ConnectionState::Connecting,
        ConnectionState::Connected => ConnectionState::Connected,
        ConnectionState::Reconnecting | ConnectionState::Error => ConnectionState::Reconnecting,
    }
}

/// Builder for an HTTP [`Client`]
#[derive(Clone, Debug)]
pub struct ClientBuilder {
    token: Option<String>,
    timeout: Duration,
}

impl ClientBuilder {
    /// Create a new builder instance
    #[must_use]
    pub const fn new() -> Self {
        Self {
            token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Authenticate every request with a bearer token
    #[must_use]
    pub fn bearer_token(self, token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            ..self
        }
    }

    /// Per request timeout
    #[must_use]
    pub fn timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Build a client posting to `endpoint`. No request is made until the
    /// first call.
    pub fn build(self, endpoint: &str) -> Result<Client> {
        let endpoint = url::Url::parse(endpoint)?;
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Client {
            endpoint,
            token: self.token,
            client,
            next_id: AtomicU64::new(1),
            state,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Request/response JSON-RPC client
pub struct Client {
    endpoint: url::Url,
    token: Option<String>,
    client: reqwest::Client,
    next_id: AtomicU64,
    state: watch::Sender<ConnectionState>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.endpoint)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a Client builder
    #[must_use]
    pub const fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Endpoint requests are posted to
    #[must_use]
    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                tracing::debug!("connection {:?} -> {:?}", state, next);
                *state = next;
                true
            }
        });
    }

    async fn post(&self, request: &JsonRpcRequest<'_>) -> Result<JsonRpcResponse> {
        let mut builder = self.client.post(self.endpoint.clone()).json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let result = builder.send().await?;

        if result.status().is_success() {
            Ok(result.json().await?)
        } else {
            Err(Error::WebServer(
                result.status().as_u16(),
                result.status().to_string(),
            ))
        }
    }
}

#[async_trait::async_trait]
impl Rpc for Client {
    async fn call_value(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let prev = *self.state.borrow();
        self.set_state(state_on_call(prev));

        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id,
        };
        tracing::trace!("POST {} {} #{}", self.endpoint, method, id);

        match self.post(&request).await {
            Ok(response) => {
                self.set_state(ConnectionState::Connected);
                response.into_result(id)
            }
            Err(e) => {
                tracing::debug!("{} failed: {}", method, e);
                self.set_state(ConnectionState::Error);
                Err(e)
            }
        }
    }

    fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}
