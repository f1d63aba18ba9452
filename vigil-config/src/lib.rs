//! Configuration for the Vigil monitoring core
//!
//! TOML files with `VIGIL_`-prefixed environment variable overrides.
//! Loading hierarchy: env > file > defaults. Validation happens before
//! anything reaches the runtime, with errors naming the offending field
//! path.

pub mod config;
pub mod env;
pub mod loader;

pub use config::{
    CheckableSpec, CommandSpec, Config, ConfigError, ConfigResult, EndpointSpec, EngineSection,
    ScheduledDowntimeSpec, ServiceSpec, TimePeriodSpec,
};
pub use env::apply_env_overrides;
pub use loader::build_runtime;
