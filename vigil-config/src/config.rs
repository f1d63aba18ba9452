//! Configuration schema and validation

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use vigil_engine::TimePeriod;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    /// Validation failure; `path` names the offending field
    #[error("Invalid configuration at '{path}': {reason}")]
    Invalid { path: String, reason: String },
}

impl ConfigError {
    pub fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

fn default_node_name() -> String {
    "vigil".to_string()
}

fn default_concurrent_checks() -> usize {
    vigil_engine::scheduler::DEFAULT_CONCURRENT_CHECKS
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_check_interval() -> f64 {
    300.0
}

fn default_max_check_attempts() -> u32 {
    3
}

fn default_threshold_low() -> f64 {
    25.0
}

fn default_threshold_high() -> f64 {
    30.0
}

fn default_true() -> bool {
    true
}

fn default_command_timeout() -> f64 {
    60.0
}

/// Engine-wide tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_concurrent_checks")]
    pub concurrent_checks_max: usize,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            concurrent_checks_max: default_concurrent_checks(),
            log_filter: default_log_filter(),
        }
    }
}

/// Shared host/service check attributes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckableSpec {
    pub name: String,
    pub check_command: String,
    #[serde(default)]
    pub event_command: Option<String>,
    #[serde(default = "default_check_interval")]
    pub check_interval: f64,
    #[serde(default)]
    pub retry_interval: Option<f64>,
    #[serde(default = "default_max_check_attempts")]
    pub max_check_attempts: u32,
    #[serde(default)]
    pub check_period: Option<String>,
    #[serde(default)]
    pub check_timeout: Option<f64>,
    #[serde(default)]
    pub command_endpoint: Option<String>,
    #[serde(default = "default_threshold_low")]
    pub flapping_threshold_low: f64,
    #[serde(default = "default_threshold_high")]
    pub flapping_threshold_high: f64,
    #[serde(default)]
    pub volatile: bool,
    #[serde(default = "default_true")]
    pub enable_active_checks: bool,
    #[serde(default = "default_true")]
    pub enable_passive_checks: bool,
    #[serde(default = "default_true")]
    pub enable_notifications: bool,
    #[serde(default)]
    pub enable_flapping: bool,
    #[serde(default = "default_true")]
    pub enable_event_handler: bool,
    /// Services owned by this host; ignored for service entries
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

/// A service under a host
pub type ServiceSpec = CheckableSpec;

/// A named time period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimePeriodSpec {
    pub name: String,
    #[serde(default)]
    pub ranges: BTreeMap<String, String>,
}

/// A remote executor endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSpec {
    pub name: String,
}

/// A plugin check command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    /// argv; the first element is the executable
    pub command: Vec<String>,
    #[serde(default = "default_command_timeout")]
    pub timeout: f64,
}

/// A recurring downtime definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledDowntimeSpec {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default = "default_true")]
    pub fixed: bool,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub ranges: BTreeMap<String, String>,
}

/// Root configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_node_name")]
    pub node_name: String,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub timeperiods: Vec<TimePeriodSpec>,
    #[serde(default)]
    pub endpoints: Vec<EndpointSpec>,
    #[serde(default)]
    pub check_commands: Vec<CommandSpec>,
    #[serde(default)]
    pub hosts: Vec<CheckableSpec>,
    #[serde(default)]
    pub scheduled_downtimes: Vec<ScheduledDowntimeSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            engine: EngineSection::default(),
            timeperiods: Vec::new(),
            endpoints: Vec::new(),
            check_commands: Vec::new(),
            hosts: Vec::new(),
            scheduled_downtimes: Vec::new(),
        }
    }
}

impl Config {
    /// Load a configuration file and apply environment overrides
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|err| ConfigError::Io(err.to_string()))?;

        let mut config: Config =
            toml::from_str(&content).map_err(|err| ConfigError::Parse(err.to_string()))?;

        crate::env::apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    /// Check every registration invariant; never lets a bad object reach
    /// the runtime core.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.node_name.is_empty() {
            return Err(ConfigError::invalid("node_name", "must not be empty"));
        }

        if self.engine.concurrent_checks_max == 0 {
            return Err(ConfigError::invalid(
                "engine.concurrent_checks_max",
                "must be greater than 0",
            ));
        }

        for tp in &self.timeperiods {
            TimePeriod::new(tp.name.clone(), &tp.ranges).map_err(|err| {
                ConfigError::invalid(format!("timeperiods.{}.ranges", tp.name), err.to_string())
            })?;
        }

        for command in &self.check_commands {
            if command.command.is_empty() {
                return Err(ConfigError::invalid(
                    format!("check_commands.{}.command", command.name),
                    "command line must not be empty",
                ));
            }

            if command.timeout <= 0.0 {
                return Err(ConfigError::invalid(
                    format!("check_commands.{}.timeout", command.name),
                    "timeout must be greater than 0",
                ));
            }
        }

        for host in &self.hosts {
            validate_checkable(&format!("hosts.{}", host.name), host)?;

            for service in &host.services {
                validate_checkable(
                    &format!("hosts.{}.services.{}", host.name, service.name),
                    service,
                )?;
            }
        }

        for sd in &self.scheduled_downtimes {
            if sd.ranges.is_empty() {
                return Err(ConfigError::invalid(
                    format!("scheduled_downtimes.{}.ranges", sd.name),
                    "at least one range is required",
                ));
            }

            TimePeriod::new(sd.name.clone(), &sd.ranges).map_err(|err| {
                ConfigError::invalid(
                    format!("scheduled_downtimes.{}.ranges", sd.name),
                    err.to_string(),
                )
            })?;

            if !self.hosts.iter().any(|h| h.name == sd.host) {
                return Err(ConfigError::invalid(
                    format!("scheduled_downtimes.{}.host", sd.name),
                    format!("unknown host '{}'", sd.host),
                ));
            }
        }

        Ok(())
    }
}

fn validate_checkable(path: &str, spec: &CheckableSpec) -> ConfigResult<()> {
    if spec.name.is_empty() {
        return Err(ConfigError::invalid(
            format!("{path}.name"),
            "must not be empty",
        ));
    }

    if spec.check_command.is_empty() {
        return Err(ConfigError::invalid(
            format!("{path}.check_command"),
            "must not be empty",
        ));
    }

    if spec.check_interval <= 0.0 {
        return Err(ConfigError::invalid(
            format!("{path}.check_interval"),
            "interval must be greater than 0",
        ));
    }

    if let Some(retry) = spec.retry_interval {
        if retry <= 0.0 {
            return Err(ConfigError::invalid(
                format!("{path}.retry_interval"),
                "interval must be greater than 0",
            ));
        }
    }

    if spec.max_check_attempts == 0 {
        return Err(ConfigError::invalid(
            format!("{path}.max_check_attempts"),
            "value must be greater than 0",
        ));
    }

    let low = spec.flapping_threshold_low;
    let high = spec.flapping_threshold_high;

    if !(0.0..=100.0).contains(&low) || !(0.0..=100.0).contains(&high) || low > high {
        return Err(ConfigError::invalid(
            format!("{path}.flapping_threshold_low"),
            "thresholds must satisfy 0 <= low <= high <= 100",
        ));
    }

    Ok(())
}
