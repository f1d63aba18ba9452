//! Environment variable overrides
//!
//! `VIGIL_`-prefixed variables override file values:
//!   VIGIL_NODE_NAME=vigil-2
//!   VIGIL_CONCURRENT_CHECKS_MAX=1024
//!   VIGIL_LOG_FILTER=vigil_engine=debug

use crate::config::Config;

/// Apply recognized `VIGIL_*` variables onto a parsed configuration
pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(node_name) = std::env::var("VIGIL_NODE_NAME") {
        config.node_name = node_name;
    }

    if let Ok(raw) = std::env::var("VIGIL_CONCURRENT_CHECKS_MAX") {
        match raw.parse() {
            Ok(value) => config.engine.concurrent_checks_max = value,
            Err(_) => tracing::warn!(
                target: "vigil_config",
                value = %raw,
                "ignoring non-numeric VIGIL_CONCURRENT_CHECKS_MAX"
            ),
        }
    }

    if let Ok(filter) = std::env::var("VIGIL_LOG_FILTER") {
        config.engine.log_filter = filter;
    }
}
