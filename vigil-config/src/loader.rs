//! Runtime construction from a validated configuration

use crate::config::{CheckableSpec, Config, ConfigError, ConfigResult};
use std::sync::Arc;
use vigil_engine::command::PluginCheckCommand;
use vigil_engine::{
    CheckableConfig, Clock, Endpoint, Runtime, ScheduledDowntime, TimePeriod,
};

fn to_engine_config(spec: &CheckableSpec) -> CheckableConfig {
    CheckableConfig {
        check_command: spec.check_command.clone(),
        event_command: spec.event_command.clone(),
        check_interval: spec.check_interval,
        retry_interval: spec.retry_interval,
        max_check_attempts: spec.max_check_attempts,
        check_period: spec.check_period.clone(),
        check_timeout: spec.check_timeout,
        command_endpoint: spec.command_endpoint.clone(),
        agent_check: false,
        flapping_threshold_low: spec.flapping_threshold_low,
        flapping_threshold_high: spec.flapping_threshold_high,
        volatile: spec.volatile,
        enable_active_checks: spec.enable_active_checks,
        enable_passive_checks: spec.enable_passive_checks,
        enable_notifications: spec.enable_notifications,
        enable_flapping: spec.enable_flapping,
        enable_event_handler: spec.enable_event_handler,
    }
}

/// Build a runtime and register every configured object
pub fn build_runtime(config: &Config, clock: Arc<dyn Clock>) -> ConfigResult<Arc<Runtime>> {
    config.validate()?;

    let rt = Runtime::new(config.node_name.clone(), clock);

    for tp in &config.timeperiods {
        let tp = TimePeriod::new(tp.name.clone(), &tp.ranges)
            .map_err(|err| ConfigError::invalid(format!("timeperiods.{}", tp.name), err.to_string()))?;
        rt.register_timeperiod(tp);
    }

    for endpoint in &config.endpoints {
        rt.register_endpoint(Endpoint::new(endpoint.name.clone(), false));
    }

    for command in &config.check_commands {
        let command = PluginCheckCommand::new(
            command.name.clone(),
            command.command.clone(),
            command.timeout,
        )
        .map_err(|err| {
            ConfigError::invalid(format!("check_commands.{}", command.name), err.to_string())
        })?;
        rt.register_check_command(Arc::new(command));
    }

    for host in &config.hosts {
        rt.register_host(host.name.clone(), to_engine_config(host))
            .map_err(|err| ConfigError::invalid(format!("hosts.{}", host.name), err.to_string()))?;

        for service in &host.services {
            rt.register_service(&host.name, &service.name, to_engine_config(service))
                .map_err(|err| {
                    ConfigError::invalid(
                        format!("hosts.{}.services.{}", host.name, service.name),
                        err.to_string(),
                    )
                })?;
        }
    }

    for sd in &config.scheduled_downtimes {
        let sd = ScheduledDowntime::new(
            sd.name.clone(),
            sd.host.clone(),
            sd.service.clone(),
            sd.author.clone(),
            sd.comment.clone(),
            sd.fixed,
            sd.duration,
            &sd.ranges,
        )
        .map_err(|err| {
            ConfigError::invalid(format!("scheduled_downtimes.{}", sd.name), err.to_string())
        })?;

        rt.register_scheduled_downtime(sd).map_err(|err| {
            ConfigError::invalid("scheduled_downtimes", err.to_string())
        })?;
    }

    Ok(rt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_engine::SimClock;

    #[test]
    fn test_build_runtime_registers_objects() {
        let config: Config = toml::from_str(
            r#"
            node_name = "vigil-test"

            [[timeperiods]]
            name = "always"
            [timeperiods.ranges]
            monday = "00:00-24:00"

            [[endpoints]]
            name = "agent-1"

            [[hosts]]
            name = "web"
            check_command = "check_ping"

            [[hosts.services]]
            name = "http"
            check_command = "check_http"

            [[scheduled_downtimes]]
            name = "maint"
            host = "web"
            [scheduled_downtimes.ranges]
            sunday = "02:00-04:00"
            "#,
        )
        .unwrap();

        let rt = build_runtime(&config, Arc::new(SimClock::new(1_700_000_000.0))).unwrap();

        assert_eq!(rt.node_name(), "vigil-test");
        assert!(rt.checkable("web").is_some());
        assert!(rt.checkable("web!http").is_some());
        assert!(rt.timeperiod("always").is_some());
        assert!(rt.endpoint("agent-1").is_some());
        assert!(rt.scheduled_downtime("maint").is_some());
    }
}
