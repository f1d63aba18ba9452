//! Check and event command contracts
//!
//! The core consumes commands as opaque capabilities: configuration,
//! templating and macro resolution happen elsewhere and hand the engine
//! already-resolved command handles. Built-in implementations cover
//! external plugin processes (exit codes 0/1/2/3) and the engine's
//! self-check.

use crate::check_result::{parse_perfdata, CheckResult, PerfdataValue};
use crate::checkable::Checkable;
use crate::error::{EngineError, EngineResult};
use crate::runtime::Runtime;
use crate::types::{CheckableType, ServiceState};
use async_trait::async_trait;

pub const DEFAULT_COMMAND_TIMEOUT: f64 = 60.0;

/// A check command capability
#[async_trait]
pub trait CheckCommand: Send + Sync {
    fn name(&self) -> &str;

    /// Per-command timeout, seconds; enforced by the executor
    fn timeout(&self) -> f64 {
        DEFAULT_COMMAND_TIMEOUT
    }

    /// Populate `cr`. Errors and timeouts are converted to an Unknown
    /// result by the executor.
    async fn execute(
        &self,
        rt: &Runtime,
        checkable: &Checkable,
        cr: &mut CheckResult,
        resolved_macros: Option<&serde_json::Value>,
    ) -> EngineResult<()>;
}

/// An event handler capability, run on qualifying state transitions
#[async_trait]
pub trait EventCommand: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, rt: &Runtime, checkable: &Checkable) -> EngineResult<()>;
}

/// Split raw plugin output into `(output, long_output, perfdata)`.
/// Everything after the first `|` is performance data; additional output
/// lines become the long output.
pub fn split_plugin_output(raw: &str) -> (String, String, Vec<PerfdataValue>) {
    let (text, perf) = match raw.split_once('|') {
        Some((text, perf)) => (text, perf),
        None => (raw, ""),
    };

    let mut lines = text.trim_end().lines();
    let output = lines.next().unwrap_or("").trim().to_string();
    let long_output = lines.collect::<Vec<_>>().join("\n").trim().to_string();

    let perfdata = parse_perfdata(perf).unwrap_or_else(|err| {
        tracing::debug!(
            target: "vigil_engine::command",
            error = %err,
            "ignoring malformed performance data"
        );
        Vec::new()
    });

    (output, long_output, perfdata)
}

/// Runs an external plugin process and maps its exit code
pub struct PluginCheckCommand {
    name: String,
    argv: Vec<String>,
    timeout: f64,
}

impl PluginCheckCommand {
    pub fn new(name: impl Into<String>, argv: Vec<String>, timeout: f64) -> EngineResult<Self> {
        if argv.is_empty() {
            return Err(EngineError::validation(
                "command_line",
                "plugin command line must not be empty",
            ));
        }

        Ok(Self {
            name: name.into(),
            argv,
            timeout,
        })
    }
}

#[async_trait]
impl CheckCommand for PluginCheckCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> f64 {
        self.timeout
    }

    async fn execute(
        &self,
        rt: &Runtime,
        _checkable: &Checkable,
        cr: &mut CheckResult,
        _resolved_macros: Option<&serde_json::Value>,
    ) -> EngineResult<()> {
        cr.command = self.name.clone();
        cr.execution_start = rt.now();

        let output = tokio::process::Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                EngineError::CheckExecution(format!(
                    "failed to run '{}': {}",
                    self.argv[0], err
                ))
            })?;

        cr.execution_end = rt.now();

        let code = output.status.code().unwrap_or(3);
        cr.state = ServiceState::from_exit_code(code);

        let stdout = String::from_utf8_lossy(&output.stdout);
        let (text, long, perfdata) = split_plugin_output(&stdout);
        cr.output = text;
        cr.long_output = long;
        cr.performance_data = perfdata;

        Ok(())
    }
}

/// Reports on the engine itself: uptime, object counts and check rates
pub struct SelfCheckCommand;

#[async_trait]
impl CheckCommand for SelfCheckCommand {
    fn name(&self) -> &str {
        "vigil"
    }

    async fn execute(
        &self,
        rt: &Runtime,
        _checkable: &Checkable,
        cr: &mut CheckResult,
        _resolved_macros: Option<&serde_json::Value>,
    ) -> EngineResult<()> {
        let now = rt.now();
        let uptime = rt.uptime();

        let checkables = rt.checkables_snapshot();
        let mut hosts = 0u64;
        let mut services = 0u64;
        for c in &checkables {
            match c.checkable_type() {
                CheckableType::Host => hosts += 1,
                CheckableType::Service => services += 1,
            }
        }

        let active_1m = rt.stats.active_checks(now, 60);
        let passive_1m = rt.stats.passive_checks(now, 60);
        let perf = crate::stats::calculate_perf_stats(checkables.iter());

        cr.command = self.name().to_string();
        cr.state = ServiceState::Ok;
        cr.output = format!(
            "Vigil OK: up {:.0}s, {} hosts, {} services",
            uptime, hosts, services
        );
        cr.performance_data = vec![
            PerfdataValue::new("uptime", uptime.floor()),
            PerfdataValue::new("num_hosts", hosts as f64),
            PerfdataValue::new("num_services", services as f64),
            PerfdataValue::new("active_checks_1min", active_1m as f64),
            PerfdataValue::new("passive_checks_1min", passive_1m as f64),
            PerfdataValue::new("avg_latency", perf.avg_latency),
            PerfdataValue::new("avg_execution_time", perf.avg_execution_time),
        ];

        Ok(())
    }
}

/// Closure-backed check command, mostly for tests and embedding
pub struct FnCheckCommand {
    name: String,
    timeout: f64,
    #[allow(clippy::type_complexity)]
    func: Box<dyn Fn(&Checkable, &mut CheckResult) -> EngineResult<()> + Send + Sync>,
}

impl FnCheckCommand {
    pub fn new<F>(name: impl Into<String>, timeout: f64, func: F) -> Self
    where
        F: Fn(&Checkable, &mut CheckResult) -> EngineResult<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            timeout,
            func: Box::new(func),
        }
    }
}

#[async_trait]
impl CheckCommand for FnCheckCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> f64 {
        self.timeout
    }

    async fn execute(
        &self,
        _rt: &Runtime,
        checkable: &Checkable,
        cr: &mut CheckResult,
        _resolved_macros: Option<&serde_json::Value>,
    ) -> EngineResult<()> {
        cr.command = self.name.clone();
        (self.func)(checkable, cr)
    }
}

/// Closure-backed event command
pub struct FnEventCommand {
    name: String,
    #[allow(clippy::type_complexity)]
    func: Box<dyn Fn(&Checkable) -> EngineResult<()> + Send + Sync>,
}

impl FnEventCommand {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Checkable) -> EngineResult<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }
}

#[async_trait]
impl EventCommand for FnEventCommand {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _rt: &Runtime, checkable: &Checkable) -> EngineResult<()> {
        (self.func)(checkable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_plugin_output() {
        let (text, long, perf) =
            split_plugin_output("DISK OK - 40% used\nsda ok\nsdb ok | used=40%;80;90");
        assert_eq!(text, "DISK OK - 40% used");
        assert_eq!(long, "sda ok\nsdb ok");
        assert_eq!(perf.len(), 1);
        assert_eq!(perf[0].label, "used");
        assert_eq!(perf[0].warn, Some(80.0));
    }

    #[test]
    fn test_split_plugin_output_without_perfdata() {
        let (text, long, perf) = split_plugin_output("PING OK");
        assert_eq!(text, "PING OK");
        assert!(long.is_empty());
        assert!(perf.is_empty());
    }

    #[test]
    fn test_malformed_perfdata_is_dropped_not_fatal() {
        let (text, _, perf) = split_plugin_output("OK | =broken= =");
        assert_eq!(text, "OK");
        assert!(perf.is_empty());
    }
}
