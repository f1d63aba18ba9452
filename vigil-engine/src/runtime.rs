//! Engine runtime
//!
//! Owns the clock, the object registries, global toggles, the signal bus
//! and the check statistics, with an explicit lifecycle instead of
//! process-global state. Tests construct their own `Runtime` around a
//! simulated clock.

use crate::checkable::{Checkable, CheckableConfig, CheckableKind, Dependency};
use crate::command::{CheckCommand, EventCommand};
use crate::comment::Comment;
use crate::downtime::Downtime;
use crate::error::{EngineError, EngineResult};
use crate::remote::{Endpoint, MessageSink};
use crate::scheduled_downtime::ScheduledDowntime;
use crate::signals::Signals;
use crate::stats::CheckStats;
use crate::time::Clock;
use crate::timeperiod::TimePeriod;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Global runtime toggles, flipped by operator commands
#[derive(Debug)]
pub struct RuntimeFlags {
    enable_checks: AtomicBool,
    enable_notifications: AtomicBool,
    enable_flapping: AtomicBool,
    enable_event_handlers: AtomicBool,
    enable_perfdata: AtomicBool,
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        Self {
            enable_checks: AtomicBool::new(true),
            enable_notifications: AtomicBool::new(true),
            enable_flapping: AtomicBool::new(true),
            enable_event_handlers: AtomicBool::new(true),
            enable_perfdata: AtomicBool::new(true),
        }
    }
}

impl RuntimeFlags {
    pub fn checks_enabled(&self) -> bool {
        self.enable_checks.load(Ordering::SeqCst)
    }

    pub fn set_checks_enabled(&self, on: bool) {
        self.enable_checks.store(on, Ordering::SeqCst);
    }

    pub fn notifications_enabled(&self) -> bool {
        self.enable_notifications.load(Ordering::SeqCst)
    }

    pub fn set_notifications_enabled(&self, on: bool) {
        self.enable_notifications.store(on, Ordering::SeqCst);
    }

    pub fn flapping_enabled(&self) -> bool {
        self.enable_flapping.load(Ordering::SeqCst)
    }

    pub fn set_flapping_enabled(&self, on: bool) {
        self.enable_flapping.store(on, Ordering::SeqCst);
    }

    pub fn event_handlers_enabled(&self) -> bool {
        self.enable_event_handlers.load(Ordering::SeqCst)
    }

    pub fn set_event_handlers_enabled(&self, on: bool) {
        self.enable_event_handlers.store(on, Ordering::SeqCst);
    }

    pub fn perfdata_enabled(&self) -> bool {
        self.enable_perfdata.load(Ordering::SeqCst)
    }

    pub fn set_perfdata_enabled(&self, on: bool) {
        self.enable_perfdata.store(on, Ordering::SeqCst);
    }
}

/// The engine's shared state and registries
pub struct Runtime {
    clock: Arc<dyn Clock>,
    node_name: String,
    start_time: f64,
    pub flags: RuntimeFlags,
    pub signals: Signals,
    pub stats: CheckStats,
    checkables: DashMap<String, Arc<Checkable>>,
    downtimes: DashMap<String, Arc<Downtime>>,
    comments: DashMap<String, Arc<Comment>>,
    scheduled_downtimes: DashMap<String, Arc<ScheduledDowntime>>,
    endpoints: DashMap<String, Arc<Endpoint>>,
    timeperiods: DashMap<String, Arc<TimePeriod>>,
    check_commands: DashMap<String, Arc<dyn CheckCommand>>,
    event_commands: DashMap<String, Arc<dyn EventCommand>>,
    /// Monotonic token stamped on every new-check-result emission
    change_counter: AtomicU64,
    next_downtime_id: AtomicU32,
    next_comment_id: AtomicU32,
    downtime_legacy_ids: Mutex<HashMap<u32, String>>,
    /// Outstanding remote dispatches: checkable name -> dispatch time
    pending_remote: Mutex<HashMap<String, f64>>,
    message_sink: RwLock<Option<Arc<dyn MessageSink>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Runtime {
    pub fn new(node_name: impl Into<String>, clock: Arc<dyn Clock>) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        let start_time = clock.now();
        let node_name = node_name.into();

        let rt = Arc::new(Self {
            clock,
            start_time,
            flags: RuntimeFlags::default(),
            signals: Signals::default(),
            stats: CheckStats::default(),
            checkables: DashMap::new(),
            downtimes: DashMap::new(),
            comments: DashMap::new(),
            scheduled_downtimes: DashMap::new(),
            endpoints: DashMap::new(),
            timeperiods: DashMap::new(),
            check_commands: DashMap::new(),
            event_commands: DashMap::new(),
            change_counter: AtomicU64::new(0),
            next_downtime_id: AtomicU32::new(1),
            next_comment_id: AtomicU32::new(1),
            downtime_legacy_ids: Mutex::new(HashMap::new()),
            pending_remote: Mutex::new(HashMap::new()),
            message_sink: RwLock::new(None),
            shutdown_tx,
            node_name: node_name.clone(),
        });

        // the process itself is always an endpoint
        rt.endpoints
            .insert(node_name.clone(), Arc::new(Endpoint::new(node_name, true)));

        rt
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Seconds since this runtime was constructed
    pub fn uptime(&self) -> f64 {
        self.now() - self.start_time
    }

    pub fn next_change_id(&self) -> u64 {
        self.change_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    // --- shutdown --------------------------------------------------------

    pub fn request_shutdown(&self) {
        // send_replace updates the value even with no live subscribers
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub fn shutdown_subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    // --- checkable registration ------------------------------------------

    fn validate_config(name: &str, config: &CheckableConfig) -> EngineResult<()> {
        let path = |field: &str| format!("{name}.{field}");

        if config.check_interval <= 0.0 {
            return Err(EngineError::validation(
                path("check_interval"),
                "interval must be greater than 0",
            ));
        }

        if let Some(retry) = config.retry_interval {
            if retry <= 0.0 {
                return Err(EngineError::validation(
                    path("retry_interval"),
                    "interval must be greater than 0",
                ));
            }
        }

        if config.max_check_attempts == 0 {
            return Err(EngineError::validation(
                path("max_check_attempts"),
                "value must be greater than 0",
            ));
        }

        let low = config.flapping_threshold_low;
        let high = config.flapping_threshold_high;

        if !(0.0..=100.0).contains(&low) || !(0.0..=100.0).contains(&high) || low > high {
            return Err(EngineError::validation(
                path("flapping_threshold_low"),
                "thresholds must satisfy 0 <= low <= high <= 100",
            ));
        }

        Ok(())
    }

    /// Register a host
    pub fn register_host(
        &self,
        name: impl Into<String>,
        config: CheckableConfig,
    ) -> EngineResult<Arc<Checkable>> {
        let name = name.into();
        Self::validate_config(&name, &config)?;

        if self.checkables.contains_key(&name) {
            return Err(EngineError::ObjectExists(name));
        }

        let checkable = Checkable::new(name.clone(), CheckableKind::Host, config);
        self.checkables.insert(name, checkable.clone());
        Ok(checkable)
    }

    /// Register a service on an existing host
    pub fn register_service(
        &self,
        host_name: &str,
        short_name: &str,
        config: CheckableConfig,
    ) -> EngineResult<Arc<Checkable>> {
        let name = format!("{host_name}!{short_name}");
        Self::validate_config(&name, &config)?;

        let host = self
            .checkables
            .get(host_name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::ObjectNotFound(host_name.to_string()))?;

        if !matches!(host.kind(), CheckableKind::Host) {
            return Err(EngineError::validation(
                format!("{name}.host"),
                "owning object is not a host",
            ));
        }

        if self.checkables.contains_key(&name) {
            return Err(EngineError::ObjectExists(name));
        }

        let checkable = Checkable::new(
            name.clone(),
            CheckableKind::Service {
                host_name: host_name.to_string(),
                short_name: short_name.to_string(),
            },
            config,
        );

        host.register_service(short_name);
        self.checkables.insert(name, checkable.clone());
        Ok(checkable)
    }

    /// Drop a checkable, detaching it from the dependency graph. The
    /// scheduler learns about it through its own unregister path.
    pub fn unregister_checkable(&self, name: &str) -> EngineResult<()> {
        let (_, checkable) = self
            .checkables
            .remove(name)
            .ok_or_else(|| EngineError::ObjectNotFound(name.to_string()))?;

        checkable.set_active(false);

        for dep in checkable.dependencies() {
            if let Some(parent) = self.checkable(&dep.parent) {
                parent.remove_dependency(&dep.name);
            }
        }

        let reverse: Vec<Arc<Dependency>> = {
            let deps = checkable.deps.lock();
            deps.reverse.clone()
        };

        for dep in reverse {
            if let Some(child) = self.checkable(&dep.child) {
                child.remove_dependency(&dep.name);
            }
        }

        if let CheckableKind::Service {
            host_name,
            short_name,
        } = checkable.kind()
        {
            if let Some(host) = self.checkable(host_name) {
                host.unregister_service(short_name);
            }
        }

        Ok(())
    }

    pub fn checkable(&self, name: &str) -> Option<Arc<Checkable>> {
        self.checkables.get(name).map(|entry| entry.value().clone())
    }

    /// Service lookup by `(host, short_name)`
    pub fn service(&self, host: &str, short_name: &str) -> Option<Arc<Checkable>> {
        self.checkable(&format!("{host}!{short_name}"))
    }

    pub fn checkables_snapshot(&self) -> Vec<Arc<Checkable>> {
        self.checkables
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// `(host_name, service_short_name)` of a checkable
    pub fn split_checkable_name(&self, checkable: &Checkable) -> (String, Option<String>) {
        match checkable.kind() {
            CheckableKind::Host => (checkable.name().to_string(), None),
            CheckableKind::Service {
                host_name,
                short_name,
            } => (host_name.clone(), Some(short_name.clone())),
        }
    }

    // --- dependencies ----------------------------------------------------

    /// Register a dependency edge on both endpoints
    pub fn register_dependency(&self, dep: Dependency) -> EngineResult<Arc<Dependency>> {
        let parent = self
            .checkable(&dep.parent)
            .ok_or_else(|| EngineError::ObjectNotFound(dep.parent.clone()))?;
        let child = self
            .checkable(&dep.child)
            .ok_or_else(|| EngineError::ObjectNotFound(dep.child.clone()))?;

        let dep = Arc::new(dep);
        child.add_forward_dependency(dep.clone());
        parent.add_reverse_dependency(dep.clone());
        Ok(dep)
    }

    // --- other registries ------------------------------------------------

    pub fn register_timeperiod(&self, tp: TimePeriod) -> Arc<TimePeriod> {
        let tp = Arc::new(tp);
        self.timeperiods.insert(tp.name().to_string(), tp.clone());
        tp
    }

    pub fn timeperiod(&self, name: &str) -> Option<Arc<TimePeriod>> {
        self.timeperiods.get(name).map(|entry| entry.value().clone())
    }

    pub fn register_endpoint(&self, endpoint: Endpoint) -> Arc<Endpoint> {
        let endpoint = Arc::new(endpoint);
        self.endpoints
            .insert(endpoint.name().to_string(), endpoint.clone());
        endpoint
    }

    pub fn endpoint(&self, name: &str) -> Option<Arc<Endpoint>> {
        self.endpoints.get(name).map(|entry| entry.value().clone())
    }

    pub fn register_check_command(&self, command: Arc<dyn CheckCommand>) {
        self.check_commands
            .insert(command.name().to_string(), command);
    }

    pub fn check_command(&self, name: &str) -> Option<Arc<dyn CheckCommand>> {
        self.check_commands
            .get(name)
            .map(|entry| entry.value().clone())
    }

    pub fn register_event_command(&self, command: Arc<dyn EventCommand>) {
        self.event_commands
            .insert(command.name().to_string(), command);
    }

    pub fn event_command(&self, name: &str) -> Option<Arc<dyn EventCommand>> {
        self.event_commands
            .get(name)
            .map(|entry| entry.value().clone())
    }

    pub fn register_scheduled_downtime(
        &self,
        sd: ScheduledDowntime,
    ) -> EngineResult<Arc<ScheduledDowntime>> {
        if self
            .checkable(&sd.checkable_name())
            .is_none()
        {
            return Err(EngineError::ObjectNotFound(sd.checkable_name()));
        }

        let sd = Arc::new(sd);
        self.scheduled_downtimes
            .insert(sd.name().to_string(), sd.clone());
        Ok(sd)
    }

    pub fn unregister_scheduled_downtime(&self, name: &str) {
        self.scheduled_downtimes.remove(name);
    }

    pub fn scheduled_downtime(&self, name: &str) -> Option<Arc<ScheduledDowntime>> {
        self.scheduled_downtimes
            .get(name)
            .map(|entry| entry.value().clone())
    }

    pub fn scheduled_downtimes_snapshot(&self) -> Vec<Arc<ScheduledDowntime>> {
        self.scheduled_downtimes
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    // --- downtime / comment registries -----------------------------------

    pub(crate) fn next_downtime_legacy_id(&self, name: &str) -> u32 {
        let id = self.next_downtime_id.fetch_add(1, Ordering::SeqCst);
        self.downtime_legacy_ids
            .lock()
            .insert(id, name.to_string());
        id
    }

    pub(crate) fn next_comment_legacy_id(&self, _name: &str) -> u32 {
        self.next_comment_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn downtime_by_legacy_id(&self, id: u32) -> Option<Arc<Downtime>> {
        let name = self.downtime_legacy_ids.lock().get(&id).cloned()?;
        self.downtime(&name)
    }

    pub(crate) fn insert_downtime(&self, downtime: Arc<Downtime>, checkable: &Checkable) {
        checkable.register_downtime(downtime.name());
        self.downtimes
            .insert(downtime.name().to_string(), downtime);
    }

    pub(crate) fn take_downtime(&self, name: &str) -> Option<Arc<Downtime>> {
        let (_, downtime) = self.downtimes.remove(name)?;

        if let Some(checkable) = self.checkable(&downtime.checkable_name()) {
            checkable.unregister_downtime(name);
        }

        Some(downtime)
    }

    pub fn downtime(&self, name: &str) -> Option<Arc<Downtime>> {
        self.downtimes.get(name).map(|entry| entry.value().clone())
    }

    pub fn downtimes_snapshot(&self) -> Vec<Arc<Downtime>> {
        self.downtimes
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub(crate) fn insert_comment(&self, comment: Arc<Comment>, checkable: &Checkable) {
        checkable.register_comment(comment.name());
        self.comments.insert(comment.name().to_string(), comment);
    }

    pub(crate) fn take_comment(&self, name: &str) -> Option<Arc<Comment>> {
        let (_, comment) = self.comments.remove(name)?;

        if let Some(checkable) = self.checkable(&comment.checkable_name()) {
            checkable.unregister_comment(name);
        }

        Some(comment)
    }

    pub fn comment(&self, name: &str) -> Option<Arc<Comment>> {
        self.comments.get(name).map(|entry| entry.value().clone())
    }

    pub fn comments_snapshot(&self) -> Vec<Arc<Comment>> {
        self.comments
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    // --- remote dispatch bookkeeping -------------------------------------

    pub fn set_message_sink(&self, sink: Arc<dyn MessageSink>) {
        *self.message_sink.write() = Some(sink);
    }

    pub fn send_message(&self, endpoint: &str, message: serde_json::Value) -> EngineResult<()> {
        let sink = self.message_sink.read().clone();

        match sink {
            Some(sink) => sink.send(endpoint, message),
            None => {
                tracing::debug!(
                    target: "vigil_engine::runtime",
                    endpoint = %endpoint,
                    "no message sink installed, dropping outbound message"
                );
                Ok(())
            }
        }
    }

    pub(crate) fn mark_pending_remote(&self, name: &str, dispatched_at: f64) {
        self.pending_remote
            .lock()
            .insert(name.to_string(), dispatched_at);
    }

    pub(crate) fn clear_pending_remote(&self, name: &str) {
        self.pending_remote.lock().remove(name);
    }

    pub(crate) fn pending_remote_older_than(&self, cutoff: f64) -> Vec<String> {
        self.pending_remote
            .lock()
            .iter()
            .filter(|(_, dispatched)| **dispatched < cutoff)
            .map(|(name, _)| name.clone())
            .collect()
    }
}
