//! Check result boundary type and performance data
//!
//! A `CheckResult` is what the executor hands to the result processor,
//! whether the check ran locally, on a remote endpoint, or arrived as a
//! passive submission. Performance data uses the classic plugin wire
//! format: `'label'=value[unit];warn;crit;min;max`, whitespace-joined.

use crate::error::{EngineError, EngineResult};
use crate::types::ServiceState;
use serde::{Deserialize, Serialize};

/// One performance data value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfdataValue {
    pub label: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl PerfdataValue {
    pub fn new(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            value,
            unit: None,
            warn: None,
            crit: None,
            min: None,
            max: None,
        }
    }

    /// Render in plugin wire format. Labels containing spaces are quoted.
    pub fn format(&self) -> String {
        let label = if self.label.contains(' ') {
            format!("'{}'", self.label)
        } else {
            self.label.clone()
        };

        let mut out = format!("{}={}", label, fmt_num(self.value));

        if let Some(unit) = &self.unit {
            out.push_str(unit);
        }

        for field in [self.warn, self.crit, self.min, self.max] {
            out.push(';');
            if let Some(v) = field {
                out.push_str(&fmt_num(v));
            }
        }

        // trim trailing empty threshold fields
        while out.ends_with(';') {
            out.pop();
        }

        out
    }

    /// Parse a single `label=value[unit];warn;crit;min;max` token
    pub fn parse(token: &str) -> EngineResult<Self> {
        let (label, rest) = if let Some(stripped) = token.strip_prefix('\'') {
            let end = stripped
                .find('\'')
                .ok_or_else(|| EngineError::InvalidPerfdata(token.to_string()))?;
            let rest = stripped[end + 1..]
                .strip_prefix('=')
                .ok_or_else(|| EngineError::InvalidPerfdata(token.to_string()))?;
            (stripped[..end].to_string(), rest)
        } else {
            let eq = token
                .find('=')
                .ok_or_else(|| EngineError::InvalidPerfdata(token.to_string()))?;
            (token[..eq].to_string(), &token[eq + 1..])
        };

        let mut fields = rest.split(';');
        let value_field = fields
            .next()
            .ok_or_else(|| EngineError::InvalidPerfdata(token.to_string()))?;

        let unit_start = value_field
            .find(|c: char| !c.is_ascii_digit() && c != '.' && c != '-' && c != '+')
            .unwrap_or(value_field.len());
        let value: f64 = value_field[..unit_start]
            .parse()
            .map_err(|_| EngineError::InvalidPerfdata(token.to_string()))?;
        let unit = if unit_start < value_field.len() {
            Some(value_field[unit_start..].to_string())
        } else {
            None
        };

        let mut threshold = |field: Option<&str>| -> EngineResult<Option<f64>> {
            match field {
                None | Some("") => Ok(None),
                Some(s) => s
                    .parse()
                    .map(Some)
                    .map_err(|_| EngineError::InvalidPerfdata(token.to_string())),
            }
        };

        Ok(Self {
            label,
            value,
            unit,
            warn: threshold(fields.next())?,
            crit: threshold(fields.next())?,
            min: threshold(fields.next())?,
            max: threshold(fields.next())?,
        })
    }
}

fn fmt_num(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

/// Render a performance data list in wire format
pub fn format_perfdata(values: &[PerfdataValue]) -> String {
    values
        .iter()
        .map(PerfdataValue::format)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a whitespace-joined performance data string
pub fn parse_perfdata(s: &str) -> EngineResult<Vec<PerfdataValue>> {
    let mut out = Vec::new();
    let mut rest = s.trim();

    while !rest.is_empty() {
        let token_end = if rest.starts_with('\'') {
            // quoted label: find the closing quote first, then the next space
            match rest[1..].find('\'') {
                Some(q) => rest[q + 2..]
                    .find(char::is_whitespace)
                    .map(|i| q + 2 + i)
                    .unwrap_or(rest.len()),
                None => return Err(EngineError::InvalidPerfdata(rest.to_string())),
            }
        } else {
            rest.find(char::is_whitespace).unwrap_or(rest.len())
        };

        out.push(PerfdataValue::parse(&rest[..token_end])?);
        rest = rest[token_end..].trim_start();
    }

    Ok(out)
}

/// The product of one check execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub state: ServiceState,
    pub output: String,
    #[serde(default)]
    pub long_output: String,
    #[serde(default)]
    pub performance_data: Vec<PerfdataValue>,
    /// When the scheduler intended the check to run
    #[serde(default)]
    pub schedule_start: f64,
    #[serde(default)]
    pub schedule_end: f64,
    /// When the command actually started and finished
    #[serde(default)]
    pub execution_start: f64,
    #[serde(default)]
    pub execution_end: f64,
    /// Node that produced this result
    #[serde(default)]
    pub check_source: String,
    /// Active (scheduler-driven) or passive submission
    #[serde(default = "default_true")]
    pub active: bool,
    /// Name of the command that produced the result
    #[serde(default)]
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vars_before: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vars_after: Option<serde_json::Value>,
    /// Freshness window for passive results, seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<f64>,
}

fn default_true() -> bool {
    true
}

impl CheckResult {
    pub fn new(state: ServiceState, output: impl Into<String>) -> Self {
        Self {
            state,
            output: output.into(),
            long_output: String::new(),
            performance_data: Vec::new(),
            schedule_start: 0.0,
            schedule_end: 0.0,
            execution_start: 0.0,
            execution_end: 0.0,
            check_source: String::new(),
            active: true,
            command: String::new(),
            vars_before: None,
            vars_after: None,
            ttl: None,
        }
    }

    /// Seconds the command itself took
    pub fn execution_time(&self) -> f64 {
        (self.execution_end - self.execution_start).max(0.0)
    }

    /// Scheduling latency: the schedule span minus the execution span
    pub fn latency(&self) -> f64 {
        ((self.schedule_end - self.schedule_start) - self.execution_time()).max(0.0)
    }
}
