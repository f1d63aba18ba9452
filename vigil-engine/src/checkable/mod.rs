//! Checkable store
//!
//! A `Checkable` is a Host or a Service: the unit the scheduler
//! dispatches. Configuration attributes are fixed at registration;
//! check state lives behind a per-checkable mutex. Downtime, comment and
//! dependency sets are guarded by their own mutexes so fanout handlers
//! never contend with the state machine.

mod check;
mod dependency;
mod flapping;

pub use dependency::Dependency;

use crate::check_result::CheckResult;
use crate::comment;
use crate::runtime::Runtime;
use crate::signals::{AcknowledgementClearedEvent, AcknowledgementSetEvent, NotificationRequest};
use crate::types::{
    AcknowledgementType, CheckableType, CommentEntryType, HostState, NotificationFilter,
    NotificationType, Origin, ServiceState, StateType,
};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Variant-specific identity
#[derive(Debug, Clone)]
pub enum CheckableKind {
    Host,
    Service {
        host_name: String,
        short_name: String,
    },
}

/// Registration-time attributes of a checkable
#[derive(Debug, Clone)]
pub struct CheckableConfig {
    pub check_command: String,
    pub event_command: Option<String>,
    /// Seconds between checks in a hard state
    pub check_interval: f64,
    /// Seconds between checks while soft; defaults to check_interval / 5
    pub retry_interval: Option<f64>,
    pub max_check_attempts: u32,
    /// Name of a registered time period gating active checks
    pub check_period: Option<String>,
    /// Per-checkable override of the command timeout, seconds
    pub check_timeout: Option<f64>,
    /// Execute checks on this endpoint instead of locally
    pub command_endpoint: Option<String>,
    /// Results of this checkable are forwarded back to the agent's master
    pub agent_check: bool,
    pub flapping_threshold_low: f64,
    pub flapping_threshold_high: f64,
    pub volatile: bool,
    pub enable_active_checks: bool,
    pub enable_passive_checks: bool,
    pub enable_notifications: bool,
    pub enable_flapping: bool,
    pub enable_event_handler: bool,
}

impl Default for CheckableConfig {
    fn default() -> Self {
        Self {
            check_command: String::new(),
            event_command: None,
            check_interval: 300.0,
            retry_interval: None,
            max_check_attempts: 3,
            check_period: None,
            check_timeout: None,
            command_endpoint: None,
            agent_check: false,
            flapping_threshold_low: 25.0,
            flapping_threshold_high: 30.0,
            volatile: false,
            enable_active_checks: true,
            enable_passive_checks: true,
            enable_notifications: true,
            enable_flapping: false,
            enable_event_handler: true,
        }
    }
}

/// Mutable check state, guarded by the checkable's state mutex
#[derive(Debug)]
pub struct CheckState {
    pub state_raw: ServiceState,
    pub last_state_raw: ServiceState,
    pub last_hard_state_raw: ServiceState,
    pub state_type: StateType,
    pub last_state_type: StateType,
    pub check_attempt: u32,
    pub next_check: f64,
    pub check_running: bool,
    pub force_next_check: bool,
    pub last_check_result: Option<Arc<CheckResult>>,
    pub last_state_change: f64,
    pub last_hard_state_change: f64,
    pub last_reachable: bool,
    pub last_state_ok: f64,
    pub last_state_warning: f64,
    pub last_state_critical: f64,
    pub last_state_unknown: f64,
    pub last_state_up: f64,
    pub last_state_down: f64,
    pub last_state_unreachable: f64,
    // flapping detector
    pub flapping_buffer: u32,
    pub flapping_index: usize,
    pub flapping_current: f64,
    pub flapping: bool,
    pub flapping_last_change: f64,
    // acknowledgement
    pub acknowledgement: AcknowledgementType,
    pub acknowledgement_expiry: f64,
    pub notification_number: u32,
    // suppression bookkeeping
    pub suppressed_notifications: NotificationFilter,
    pub state_before_suppression: Option<ServiceState>,
}

impl Default for CheckState {
    fn default() -> Self {
        Self {
            // never-checked objects count as OK (hosts derive Up), so the
            // first healthy result is not a recovery
            state_raw: ServiceState::Ok,
            last_state_raw: ServiceState::Ok,
            last_hard_state_raw: ServiceState::Ok,
            state_type: StateType::Hard,
            last_state_type: StateType::Hard,
            check_attempt: 1,
            next_check: 0.0,
            check_running: false,
            force_next_check: false,
            last_check_result: None,
            last_state_change: 0.0,
            last_hard_state_change: 0.0,
            last_reachable: true,
            last_state_ok: 0.0,
            last_state_warning: 0.0,
            last_state_critical: 0.0,
            last_state_unknown: 0.0,
            last_state_up: 0.0,
            last_state_down: 0.0,
            last_state_unreachable: 0.0,
            flapping_buffer: 0,
            flapping_index: 0,
            flapping_current: 0.0,
            flapping: false,
            flapping_last_change: 0.0,
            acknowledgement: AcknowledgementType::None,
            acknowledgement_expiry: 0.0,
            notification_number: 0,
            suppressed_notifications: NotificationFilter::default(),
            state_before_suppression: None,
        }
    }
}

/// A monitored host or service
pub struct Checkable {
    /// Weak self-handle for minting signal payloads from `&self`
    self_ref: Weak<Checkable>,
    name: String,
    kind: CheckableKind,
    config: CheckableConfig,
    /// Random phase shift so checkables sharing an interval don't stampede
    scheduling_offset: u64,
    active: AtomicBool,
    authority: AtomicBool,
    enable_active_checks: AtomicBool,
    enable_passive_checks: AtomicBool,
    enable_notifications: AtomicBool,
    enable_flapping: AtomicBool,
    enable_event_handler: AtomicBool,
    pub(crate) state: Mutex<CheckState>,
    pub(crate) deps: Mutex<dependency::DependencySets>,
    downtimes: Mutex<BTreeSet<String>>,
    comments: Mutex<BTreeSet<String>>,
    /// Short names of owned services; empty for services
    services: Mutex<BTreeSet<String>>,
}

impl Checkable {
    pub(crate) fn new(name: String, kind: CheckableKind, config: CheckableConfig) -> Arc<Self> {
        let offset = rand::thread_rng().gen_range(0..1_000_000u64);

        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            active: AtomicBool::new(true),
            authority: AtomicBool::new(true),
            enable_active_checks: AtomicBool::new(config.enable_active_checks),
            enable_passive_checks: AtomicBool::new(config.enable_passive_checks),
            enable_notifications: AtomicBool::new(config.enable_notifications),
            enable_flapping: AtomicBool::new(config.enable_flapping),
            enable_event_handler: AtomicBool::new(config.enable_event_handler),
            name,
            kind,
            config,
            scheduling_offset: offset,
            state: Mutex::new(CheckState::default()),
            deps: Mutex::new(dependency::DependencySets::default()),
            downtimes: Mutex::new(BTreeSet::new()),
            comments: Mutex::new(BTreeSet::new()),
            services: Mutex::new(BTreeSet::new()),
        })
    }

    /// Strong handle to self, used in signal payloads. The weak reference
    /// is seeded at construction and lives exactly as long as the object.
    pub(crate) fn arc(&self) -> Arc<Checkable> {
        match self.self_ref.upgrade() {
            Some(this) => this,
            None => unreachable!("checkable self reference expired"),
        }
    }

    /// Full name; `host` for hosts, `host!short_name` for services
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &CheckableKind {
        &self.kind
    }

    pub fn checkable_type(&self) -> CheckableType {
        match self.kind {
            CheckableKind::Host => CheckableType::Host,
            CheckableKind::Service { .. } => CheckableType::Service,
        }
    }

    pub fn config(&self) -> &CheckableConfig {
        &self.config
    }

    /// Effective retry interval
    pub fn retry_interval(&self) -> f64 {
        self.config
            .retry_interval
            .unwrap_or(self.config.check_interval / 5.0)
    }

    pub fn scheduling_offset(&self) -> u64 {
        self.scheduling_offset
    }

    /// The "OK-state" predicate for this variant: OK for services,
    /// Up (OK or Warning) for hosts.
    pub fn state_is_ok(&self, raw: ServiceState) -> bool {
        match self.kind {
            CheckableKind::Host => HostState::from_raw(raw) == HostState::Up,
            CheckableKind::Service { .. } => raw.is_ok(),
        }
    }

    /// Variant-aware state comparison: hosts compare derived Up/Down
    pub(crate) fn states_differ(&self, a: ServiceState, b: ServiceState) -> bool {
        match self.kind {
            CheckableKind::Host => HostState::from_raw(a) != HostState::from_raw(b),
            CheckableKind::Service { .. } => a != b,
        }
    }

    // --- lifecycle flags -------------------------------------------------

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    /// Whether this process is responsible for executing this checkable
    pub fn has_authority(&self) -> bool {
        self.authority.load(Ordering::SeqCst)
    }

    pub fn set_authority(&self, authority: bool) {
        self.authority.store(authority, Ordering::SeqCst);
    }

    pub fn active_checks_enabled(&self) -> bool {
        self.enable_active_checks.load(Ordering::SeqCst)
    }

    pub fn set_active_checks_enabled(&self, on: bool) {
        self.enable_active_checks.store(on, Ordering::SeqCst);
    }

    pub fn passive_checks_enabled(&self) -> bool {
        self.enable_passive_checks.load(Ordering::SeqCst)
    }

    pub fn set_passive_checks_enabled(&self, on: bool) {
        self.enable_passive_checks.store(on, Ordering::SeqCst);
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

    pub fn event_handler_enabled(&self) -> bool {
        self.enable_event_handler.load(Ordering::SeqCst)
    }

    pub fn set_event_handler_enabled(&self, on: bool) {
        self.enable_event_handler.store(on, Ordering::SeqCst);
    }

    // --- state snapshots -------------------------------------------------

    pub fn state_raw(&self) -> ServiceState {
        self.state.lock().state_raw
    }

    /// Derived host state; `Down` when called on a service in a non-OK state
    pub fn host_state(&self) -> HostState {
        HostState::from_raw(self.state_raw())
    }

    pub fn state_type(&self) -> StateType {
        self.state.lock().state_type
    }

    pub fn check_attempt(&self) -> u32 {
        self.state.lock().check_attempt
    }

    pub fn next_check(&self) -> f64 {
        self.state.lock().next_check
    }

    pub fn has_been_checked(&self) -> bool {
        self.state.lock().last_check_result.is_some()
    }

    pub fn last_check_result(&self) -> Option<Arc<CheckResult>> {
        self.state.lock().last_check_result.clone()
    }

    /// Schedule end of the most recent result
    pub fn last_check(&self) -> f64 {
        self.state
            .lock()
            .last_check_result
            .as_ref()
            .map(|cr| cr.schedule_end)
            .unwrap_or(-1.0)
    }

    pub fn is_check_running(&self) -> bool {
        self.state.lock().check_running
    }

    pub fn last_state_change(&self) -> f64 {
        self.state.lock().last_state_change
    }

    pub fn last_hard_state_change(&self) -> f64 {
        self.state.lock().last_hard_state_change
    }

    pub fn last_hard_state_raw(&self) -> ServiceState {
        self.state.lock().last_hard_state_raw
    }

    pub fn last_reachable(&self) -> bool {
        self.state.lock().last_reachable
    }

    pub fn force_next_check_flag(&self) -> bool {
        self.state.lock().force_next_check
    }

    // --- per-checkable collections --------------------------------------

    pub(crate) fn register_service(&self, short_name: &str) {
        self.services.lock().insert(short_name.to_string());
    }

    pub(crate) fn unregister_service(&self, short_name: &str) {
        self.services.lock().remove(short_name);
    }

    /// Short names of owned services (hosts only)
    pub fn service_names(&self) -> Vec<String> {
        self.services.lock().iter().cloned().collect()
    }

    pub(crate) fn register_downtime(&self, name: &str) {
        self.downtimes.lock().insert(name.to_string());
    }

    pub(crate) fn unregister_downtime(&self, name: &str) {
        self.downtimes.lock().remove(name);
    }

    pub fn downtime_names(&self) -> Vec<String> {
        self.downtimes.lock().iter().cloned().collect()
    }

    pub(crate) fn register_comment(&self, name: &str) {
        self.comments.lock().insert(name.to_string());
    }

    pub(crate) fn unregister_comment(&self, name: &str) {
        self.comments.lock().remove(name);
    }

    pub fn comment_names(&self) -> Vec<String> {
        self.comments.lock().iter().cloned().collect()
    }

    // --- downtime queries ------------------------------------------------

    pub fn is_in_downtime(&self, rt: &Runtime) -> bool {
        self.downtime_depth(rt) > 0
    }

    /// Number of downtimes currently in effect
    pub fn downtime_depth(&self, rt: &Runtime) -> u32 {
        let now = rt.now();
        self.downtime_names()
            .iter()
            .filter_map(|name| rt.downtime(name))
            .filter(|d| d.is_in_effect(now))
            .count() as u32
    }

    // --- acknowledgements ------------------------------------------------

    /// Current acknowledgement, auto-clearing it when expired
    pub fn acknowledgement(&self, rt: &Runtime) -> AcknowledgementType {
        let (ack, expiry) = {
            let st = self.state.lock();
            (st.acknowledgement, st.acknowledgement_expiry)
        };

        if ack != AcknowledgementType::None && expiry != 0.0 && expiry <= rt.now() {
            self.clear_acknowledgement(rt, Origin::Local, true);
            return AcknowledgementType::None;
        }

        ack
    }

    pub fn is_acknowledged(&self, rt: &Runtime) -> bool {
        self.acknowledgement(rt) != AcknowledgementType::None
    }

    #[allow(clippy::too_many_arguments)]
    pub fn acknowledge_problem(
        &self,
        rt: &Runtime,
        author: &str,
        comment: &str,
        ack_type: AcknowledgementType,
        notify: bool,
        persistent: bool,
        expiry: f64,
        origin: Origin,
    ) {
        let last_cr = {
            let mut st = self.state.lock();
            st.acknowledgement = ack_type;
            st.acknowledgement_expiry = expiry;
            st.last_check_result.clone()
        };

        self.begin_suppression();

        if notify {
            rt.signals.on_notifications_requested.emit(&NotificationRequest {
                checkable: self.arc(),
                notification_type: NotificationType::Acknowledgement,
                result: last_cr,
                author: author.to_string(),
                text: comment.to_string(),
                origin: origin.clone(),
            });
        }

        rt.signals.on_acknowledgement_set.emit(&AcknowledgementSetEvent {
            checkable: self.arc(),
            author: author.to_string(),
            comment: comment.to_string(),
            ack_type,
            notify,
            persistent,
            expiry,
            origin,
        });
    }

    /// Reset the acknowledgement. Implicit clears (expiry, state change)
    /// keep acknowledgement comments; explicit ones remove all but the
    /// persistent entries.
    pub fn clear_acknowledgement(&self, rt: &Runtime, origin: Origin, implicit: bool) {
        {
            let mut st = self.state.lock();
            st.acknowledgement = AcknowledgementType::None;
            st.acknowledgement_expiry = 0.0;
        }

        if !implicit {
            comment::remove_comments_by_type(rt, self, CommentEntryType::Acknowledgement);
        }

        rt.signals
            .on_acknowledgement_cleared
            .emit(&AcknowledgementClearedEvent {
                checkable: self.arc(),
                origin,
            });

        self.fire_suppressed_notifications(rt);
    }

    // --- suppression bookkeeping -----------------------------------------

    /// Sample the state a suppression window opened on, once per window
    pub(crate) fn begin_suppression(&self) {
        let mut st = self.state.lock();
        if st.state_before_suppression.is_none() {
            st.state_before_suppression = Some(st.state_raw);
        }
    }

    /// As [`begin_suppression`](Self::begin_suppression), but with an
    /// explicit reference state
    pub(crate) fn begin_suppression_from(&self, state: ServiceState) {
        let mut st = self.state.lock();
        if st.state_before_suppression.is_none() {
            st.state_before_suppression = Some(state);
        }
    }

    pub(crate) fn record_suppressed(&self, ty: NotificationType) {
        self.state.lock().suppressed_notifications.insert(ty);
    }

    pub fn suppressed_notifications(&self) -> NotificationFilter {
        self.state.lock().suppressed_notifications
    }

    /// Replay the one notification that represents the net state change
    /// across a suppression window. No-op while any suppression (downtime,
    /// acknowledgement, flapping) is still active.
    pub fn fire_suppressed_notifications(&self, rt: &Runtime) {
        if self.is_in_downtime(rt) || self.is_acknowledged(rt) || self.is_flapping(rt) {
            return;
        }

        let (filter, before, hard_state, last_cr) = {
            let mut st = self.state.lock();
            let filter = st.suppressed_notifications;
            let before = st.state_before_suppression.take();
            st.suppressed_notifications.clear();
            (filter, before, st.last_hard_state_raw, st.last_check_result.clone())
        };

        if filter.is_empty() {
            return;
        }

        let Some(before) = before else { return };

        if !self.states_differ(before, hard_state) {
            return;
        }

        let ty = if self.state_is_ok(hard_state) {
            NotificationType::Recovery
        } else {
            NotificationType::Problem
        };

        if !filter.contains(ty) {
            return;
        }

        tracing::info!(
            target: "vigil_engine::checkable",
            checkable = %self.name,
            kind = ty.as_str(),
            "replaying notification deferred during suppression"
        );

        rt.signals.on_notifications_requested.emit(&NotificationRequest {
            checkable: self.arc(),
            notification_type: ty,
            result: last_cr,
            author: String::new(),
            text: String::new(),
            origin: Origin::Local,
        });
    }

    // --- severity --------------------------------------------------------

    /// Coarse severity score for status consumers; higher is worse
    pub fn severity(&self, rt: &Runtime) -> u32 {
        const FLAG_DOWNTIME: u32 = 1;
        const FLAG_ACKNOWLEDGEMENT: u32 = 2;
        const FLAG_UNHANDLED: u32 = 8;
        const FLAG_PENDING: u32 = 16;
        const FLAG_WARNING: u32 = 32;
        const FLAG_UNKNOWN: u32 = 64;
        const FLAG_CRITICAL: u32 = 128;

        let mut severity = 0;

        let (raw, checked) = {
            let st = self.state.lock();
            (st.state_raw, st.last_check_result.is_some())
        };

        if !checked {
            severity |= FLAG_PENDING;
        } else if !self.state_is_ok(raw) {
            severity |= match raw {
                ServiceState::Warning => FLAG_WARNING,
                ServiceState::Unknown => FLAG_UNKNOWN,
                _ => FLAG_CRITICAL,
            };

            if self.is_in_downtime(rt) {
                severity |= FLAG_DOWNTIME;
            } else if self.is_acknowledged(rt) {
                severity |= FLAG_ACKNOWLEDGEMENT;
            } else {
                severity |= FLAG_UNHANDLED;
            }
        }

        severity
    }
}

impl std::fmt::Debug for Checkable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkable")
            .field("name", &self.name)
            .field("type", &self.checkable_type())
            .finish()
    }
}
