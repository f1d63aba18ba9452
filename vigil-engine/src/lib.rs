//! Vigil monitoring core
//!
//! The online check-execution pipeline of a distributed monitoring
//! platform:
//! - a priority-ordered, concurrency-bounded check scheduler
//! - the per-checkable state machine (soft/hard states, retries,
//!   reachability, notification policy)
//! - the downtime / acknowledgement / comment overlay with deferred
//!   notification replay
//! - the rolling-window flapping detector
//! - remote-execution coupling to agent endpoints
//!
//! Configuration, notification transports, persistence and query
//! surfaces are external collaborators: they feed commands in through
//! [`external_command`] and consume the typed signal bus in [`signals`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod check_result;
pub mod checkable;
pub mod command;
pub mod comment;
pub mod daemon;
pub mod downtime;
pub mod error;
pub mod executor;
pub mod external_command;
pub mod remote;
pub mod ring;
pub mod runtime;
pub mod scheduled_downtime;
pub mod scheduler;
pub mod signals;
pub mod stats;
pub mod time;
pub mod timeperiod;
pub mod types;

pub use check_result::{CheckResult, PerfdataValue};
pub use checkable::{Checkable, CheckableConfig, CheckableKind, Dependency};
pub use command::{CheckCommand, EventCommand};
pub use daemon::Daemon;
pub use downtime::{Downtime, DowntimeOptions};
pub use error::{EngineError, EngineResult};
pub use remote::{Endpoint, MessageSink};
pub use runtime::Runtime;
pub use scheduled_downtime::ScheduledDowntime;
pub use scheduler::Checker;
pub use signals::{Signal, SignalGuard, Signals};
pub use time::{Clock, SimClock, SystemClock};
pub use timeperiod::TimePeriod;
pub use types::{
    AcknowledgementType, CheckableType, DependencyType, HostState, NotificationType, Origin,
    ServiceState, StateType,
};
