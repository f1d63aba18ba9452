//! Remote execution coupling
//!
//! The core never speaks a transport; it sees `Endpoint` handles with
//! connectivity and heartbeat state, builds `event::ExecuteCommand`
//! messages, and accepts replies that re-enter the result processor as if
//! they were local results.

use crate::check_result::CheckResult;
use crate::checkable::{Checkable, CheckableKind};
use crate::error::{EngineError, EngineResult};
use crate::runtime::Runtime;
use crate::types::Origin;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};

/// A peer process that can execute checks on our behalf
#[derive(Debug)]
pub struct Endpoint {
    name: String,
    local: bool,
    connected: AtomicBool,
    syncing: AtomicBool,
    last_seen: Mutex<f64>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, local: bool) -> Self {
        Self {
            name: name.into(),
            local,
            connected: AtomicBool::new(local),
            syncing: AtomicBool::new(false),
            last_seen: Mutex::new(0.0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this endpoint is this process itself
    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Replaying config/state after a reconnect; checks are deferred
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    pub fn set_syncing(&self, syncing: bool) {
        self.syncing.store(syncing, Ordering::SeqCst);
    }

    /// Timestamp of the last message seen from this endpoint
    pub fn last_seen(&self) -> f64 {
        *self.last_seen.lock()
    }

    pub fn set_last_seen(&self, ts: f64) {
        *self.last_seen.lock() = ts;
    }
}

/// Outbound cluster message seam; the transport layer implements this
pub trait MessageSink: Send + Sync {
    fn send(&self, endpoint: &str, message: serde_json::Value) -> EngineResult<()>;
}

fn identity(checkable: &Checkable) -> (String, Option<String>) {
    match checkable.kind() {
        CheckableKind::Host => (checkable.name().to_string(), None),
        CheckableKind::Service {
            host_name,
            short_name,
        } => (host_name.clone(), Some(short_name.clone())),
    }
}

/// Build the `event::ExecuteCommand` message for a remote check
pub fn execute_command_message(
    checkable: &Checkable,
    macros: serde_json::Value,
) -> serde_json::Value {
    let (host, service) = identity(checkable);

    let mut params = json!({
        "command_type": "check_command",
        "command": checkable.config().check_command,
        "host": host,
        "macros": macros,
    });

    if let Some(service) = service {
        params["service"] = json!(service);
    }

    json!({
        "jsonrpc": "2.0",
        "method": "event::ExecuteCommand",
        "params": params,
    })
}

/// Forward a locally produced agent result back to the scheduling master
pub fn forward_check_result(
    rt: &Runtime,
    checkable: &Checkable,
    cr: &CheckResult,
    endpoint: &str,
) -> EngineResult<()> {
    let (host, service) = identity(checkable);

    let mut params = json!({
        "host": host,
        "cr": serde_json::to_value(cr)
            .map_err(|err| EngineError::Message(err.to_string()))?,
    });

    if let Some(service) = service {
        params["service"] = json!(service);
    }

    rt.send_message(
        endpoint,
        json!({
            "jsonrpc": "2.0",
            "method": "event::CheckResult",
            "params": params,
        }),
    )
}

/// Handle an `event::CheckResult` reply from a remote endpoint
pub async fn process_remote_result(
    rt: &Runtime,
    endpoint_name: &str,
    params: &serde_json::Value,
) -> EngineResult<()> {
    let host = params
        .get("host")
        .and_then(|v| v.as_str())
        .ok_or_else(|| EngineError::Message("missing 'host' field".into()))?;

    let name = match params.get("service").and_then(|v| v.as_str()) {
        Some(service) => format!("{host}!{service}"),
        None => host.to_string(),
    };

    let checkable = rt
        .checkable(&name)
        .ok_or_else(|| EngineError::ObjectNotFound(name))?;

    let mut cr: CheckResult = serde_json::from_value(
        params
            .get("cr")
            .cloned()
            .ok_or_else(|| EngineError::Message("missing 'cr' field".into()))?,
    )
    .map_err(|err| EngineError::Message(err.to_string()))?;

    cr.check_source = endpoint_name.to_string();

    if let Some(endpoint) = rt.endpoint(endpoint_name) {
        endpoint.set_last_seen(rt.now());
    }

    checkable
        .process_check_result(rt, cr, Origin::Remote(endpoint_name.to_string()))
        .await
}
