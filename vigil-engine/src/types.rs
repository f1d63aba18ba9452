//! Core state and notification types

use serde::{Deserialize, Serialize};

/// Raw state of a check result. Hosts store the same raw values and derive
/// their Up/Down state from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl ServiceState {
    /// The "OK-state" predicate for services
    pub fn is_ok(self) -> bool {
        self == ServiceState::Ok
    }

    /// Map a plugin exit code (0/1/2/3) to a state. Anything else is
    /// treated as Unknown.
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => ServiceState::Ok,
            1 => ServiceState::Warning,
            2 => ServiceState::Critical,
            _ => ServiceState::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceState::Ok => "OK",
            ServiceState::Warning => "WARNING",
            ServiceState::Critical => "CRITICAL",
            ServiceState::Unknown => "UNKNOWN",
        }
    }
}

/// Derived host state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    Up,
    Down,
}

impl HostState {
    /// Hosts are Up while the raw state is Ok or Warning
    pub fn from_raw(raw: ServiceState) -> Self {
        match raw {
            ServiceState::Ok | ServiceState::Warning => HostState::Up,
            _ => HostState::Down,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HostState::Up => "UP",
            HostState::Down => "DOWN",
        }
    }
}

/// Whether a state is tentative (attempt counter still running) or stable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateType {
    Soft,
    Hard,
}

/// Host or Service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckableType {
    Host,
    Service,
}

/// Acknowledgement mode set on a checkable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcknowledgementType {
    None,
    /// Cleared by any state change
    Normal,
    /// Cleared only when the checkable returns to an OK state
    Sticky,
}

/// Comment entry kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentEntryType {
    User,
    Downtime,
    Flapping,
    Acknowledgement,
}

/// Dependency edge kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    State,
    CheckExecution,
    Notification,
}

/// Notification request kinds emitted on the fanout bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    DowntimeStart,
    DowntimeEnd,
    DowntimeRemoved,
    Custom,
    Acknowledgement,
    Problem,
    Recovery,
    FlappingStart,
    FlappingEnd,
}

impl NotificationType {
    fn bit(self) -> u32 {
        match self {
            NotificationType::DowntimeStart => 1,
            NotificationType::DowntimeEnd => 2,
            NotificationType::DowntimeRemoved => 4,
            NotificationType::Custom => 8,
            NotificationType::Acknowledgement => 16,
            NotificationType::Problem => 32,
            NotificationType::Recovery => 64,
            NotificationType::FlappingStart => 128,
            NotificationType::FlappingEnd => 256,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NotificationType::DowntimeStart => "DOWNTIMESTART",
            NotificationType::DowntimeEnd => "DOWNTIMEEND",
            NotificationType::DowntimeRemoved => "DOWNTIMECANCELLED",
            NotificationType::Custom => "CUSTOM",
            NotificationType::Acknowledgement => "ACKNOWLEDGEMENT",
            NotificationType::Problem => "PROBLEM",
            NotificationType::Recovery => "RECOVERY",
            NotificationType::FlappingStart => "FLAPPINGSTART",
            NotificationType::FlappingEnd => "FLAPPINGEND",
        }
    }
}

/// Bitset of notification types, used for suppression bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationFilter(u32);

impl NotificationFilter {
    pub fn insert(&mut self, ty: NotificationType) {
        self.0 |= ty.bit();
    }

    pub fn contains(self, ty: NotificationType) -> bool {
        self.0 & ty.bit() != 0
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Where a check result or command came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Produced by this process
    Local,
    /// Delivered by a remote endpoint (name)
    Remote(String),
}

impl Origin {
    pub fn is_local(&self) -> bool {
        matches!(self, Origin::Local)
    }
}
