//! Run configuration: the per-run snapshot sent as stream query parameters,
//! plus the partial patch used by `set_config`.
//!
//! Patches can be written as TOML:
//!
//! ```toml
//! strategy = "ma_strategy"
//! symbol = "SHFE.rb2505"
//! start_date = "2024-01-01"
//! end_date = "2024-06-30"
//! fast_period = 5
//! slow_period = 20
//! agent_enabled = true
//! agent_interval = 15
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_FAST_PERIOD: u32 = 5;
const DEFAULT_SLOW_PERIOD: u32 = 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Immutable-per-run configuration of a streamed backtest.
///
/// No validation is applied here; `warnings()` lists soft problems the UI
/// may want to show, but a run is never refused because of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub strategy: String,
    pub symbol: String,
    /// First calendar day of the backtest (inclusive).
    pub start_date: NaiveDate,
    /// Last calendar day of the backtest (inclusive).
    pub end_date: NaiveDate,
    pub fast_period: u32,
    pub slow_period: u32,
    pub init_balance: f64,
    /// Lots per entry.
    pub position_size: u32,
    /// Percentage of equity committed per entry, 0–100.
    pub position_percent: f64,
    pub agent_enabled: bool,
    /// Agent-assist check interval in days; ignored when the agent is off.
    pub agent_interval: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            strategy: "ma_strategy".into(),
            symbol: "SHFE.rb2505".into(),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap_or_default(),
            fast_period: DEFAULT_FAST_PERIOD,
            slow_period: DEFAULT_SLOW_PERIOD,
            init_balance: 200_000.0,
            position_size: 1,
            position_percent: 50.0,
            agent_enabled: false,
            agent_interval: 30,
        }
    }
}

impl RunConfig {
    /// Shallow-merge a patch: every field present in the patch replaces ours.
    pub fn merge(&mut self, patch: RunConfigPatch) {
        let RunConfigPatch {
            strategy,
            symbol,
            start_date,
            end_date,
            fast_period,
            slow_period,
            init_balance,
            position_size,
            position_percent,
            agent_enabled,
            agent_interval,
        } = patch;

        if let Some(v) = strategy {
            self.strategy = v;
        }
        if let Some(v) = symbol {
            self.symbol = v;
        }
        if let Some(v) = start_date {
            self.start_date = v;
        }
        if let Some(v) = end_date {
            self.end_date = v;
        }
        if let Some(v) = fast_period {
            self.fast_period = v;
        }
        if let Some(v) = slow_period {
            self.slow_period = v;
        }
        if let Some(v) = init_balance {
            self.init_balance = v;
        }
        if let Some(v) = position_size {
            self.position_size = v;
        }
        if let Some(v) = position_percent {
            self.position_percent = v;
        }
        if let Some(v) = agent_enabled {
            self.agent_enabled = v;
        }
        if let Some(v) = agent_interval {
            self.agent_interval = v;
        }
    }

    /// Query parameters for the stream request, in wire order.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("strategy", self.strategy.clone()),
            ("symbol", self.symbol.clone()),
            ("start_date", self.start_date.format("%Y-%m-%d").to_string()),
            ("end_date", self.end_date.format("%Y-%m-%d").to_string()),
            ("fast_period", self.fast_period.to_string()),
            ("slow_period", self.slow_period.to_string()),
            ("init_balance", self.init_balance.to_string()),
            ("position_size", self.position_size.to_string()),
            ("position_percent", self.position_percent.to_string()),
            ("agent_enabled", self.agent_enabled.to_string()),
            ("agent_interval", self.agent_interval.to_string()),
        ]
    }

    /// Sync strategy name and MA periods from a selected strategy's params.
    ///
    /// Missing, zero or non-numeric periods fall back to 5 / 20.
    pub fn apply_strategy_params(&mut self, name: &str, params: &BTreeMap<String, Value>) {
        self.strategy = name.to_string();
        self.fast_period = period_param(params, "fast_period").unwrap_or(DEFAULT_FAST_PERIOD);
        self.slow_period = period_param(params, "slow_period").unwrap_or(DEFAULT_SLOW_PERIOD);
    }

    /// Soft problems with this config. Empty when everything looks sane.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.fast_period >= self.slow_period {
            out.push(format!(
                "fast_period ({}) is not below slow_period ({})",
                self.fast_period, self.slow_period
            ));
        }
        if self.end_date < self.start_date {
            out.push(format!(
                "end_date {} is before start_date {}",
                self.end_date, self.start_date
            ));
        }
        if self.init_balance <= 0.0 {
            out.push(format!("init_balance must be positive, got {}", self.init_balance));
        }
        if !(0.0..=100.0).contains(&self.position_percent) {
            out.push(format!(
                "position_percent {} is outside 0..=100",
                self.position_percent
            ));
        }
        if self.agent_enabled && self.agent_interval == 0 {
            out.push("agent_interval is 0 while the agent is enabled".into());
        }
        out
    }
}

fn period_param(params: &BTreeMap<String, Value>, key: &str) -> Option<u32> {
    let raw = match params.get(key)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if raw.is_finite() && raw >= 1.0 && raw <= u32::MAX as f64 {
        Some(raw as u32)
    } else {
        None
    }
}

/// Partial `RunConfig`. Absent fields leave the target untouched on merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfigPatch {
    pub strategy: Option<String>,
    pub symbol: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub fast_period: Option<u32>,
    pub slow_period: Option<u32>,
    pub init_balance: Option<f64>,
    pub position_size: Option<u32>,
    pub position_percent: Option<f64>,
    pub agent_enabled: Option<bool>,
    pub agent_interval: Option<u32>,
}

impl RunConfigPatch {
    /// Load a patch from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a patch from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Layer `other` on top of `self`: fields set in `other` win.
    pub fn overlay(mut self, other: RunConfigPatch) -> Self {
        macro_rules! take {
            ($($field:ident),*) => {
                $( if other.$field.is_some() { self.$field = other.$field; } )*
            };
        }
        take!(
            strategy,
            symbol,
            start_date,
            end_date,
            fast_period,
            slow_period,
            init_balance,
            position_size,
            position_percent,
            agent_enabled,
            agent_interval
        );
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == RunConfigPatch::default()
    }
}
