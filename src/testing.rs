//!
//! Scripted [`Rpc`] double for unit tests.
//!
use crate::rpc::{ConnectionState, Rpc};
use crate::{Error, Result};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Log to the test output, filtered by `RUST_LOG`
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Clone)]
enum Reply {
    Ok(Value),
    Err(u16),
}

#[derive(Clone)]
struct Scripted {
    delay: Duration,
    reply: Reply,
}

/// Serves queued replies per method, falling back to a sticky reply once
/// the queue is drained. Every call is recorded.
pub(crate) struct ScriptedRpc {
    queues: Mutex<HashMap<String, VecDeque<Scripted>>>,
    sticky: Mutex<HashMap<String, Scripted>>,
    calls: Mutex<Vec<(String, Value)>>,
    state: watch::Sender<ConnectionState>,
}

impl ScriptedRpc {
    pub(crate) fn new() -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Connected);
        Arc::new(Self {
            queues: Mutex::default(),
            sticky: Mutex::default(),
            calls: Mutex::default(),
            state,
        })
    }

    fn push(&self, method: &str, scripted: Scripted) {
        self.queues
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(scripted);
    }

    pub(crate) fn push_ok(&self, method: &str, value: Value) {
        self.push_delayed_ok(method, Duration::ZERO, value);
    }

    pub(crate) fn push_delayed_ok(&self, method: &str, delay: Duration, value: Value) {
        self.push(
            method,
            Scripted {
                delay,
                reply: Reply::Ok(value),
            },
        );
    }

    /// Queue a transport failure
    pub(crate) fn push_err(&self, method: &str) {
        self.push(
            method,
            Scripted {
                delay: Duration::ZERO,
                reply: Reply::Err(503),
            },
        );
    }

    /// Reply used whenever the queue for `method` is empty
    pub(crate) fn always_ok(&self, method: &str, value: Value) {
        self.sticky.lock().unwrap().insert(
            method.to_string(),
            Scripted {
                delay: Duration::ZERO,
                reply: Reply::Ok(value),
            },
        );
    }

    /// Parameters of every call made to `method`, in order
    pub(crate) fn calls(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub(crate) fn call_count(&self, method: &str) -> usize {
        self.calls(method).len()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

#[async_trait::async_trait]
impl Rpc for ScriptedRpc {
    async fn call_value(&self, method: &str, params: Value) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));

        let next = self
            .queues
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        let scripted = match next {
            Some(s) => s,
            None => self
                .sticky
                .lock()
                .unwrap()
                .get(method)
                .cloned()
                .ok_or_else(|| Error::General(format!("no scripted reply for {method}")))?,
        };

        if !scripted.delay.is_zero() {
            tokio::time::sleep(scripted.delay).await;
        }
        match scripted.reply {
            Reply::Ok(v) => Ok(v),
            Reply::Err(code) => Err(Error::WebServer(code, "Service Unavailable".into())),
        }
    }

    fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}
