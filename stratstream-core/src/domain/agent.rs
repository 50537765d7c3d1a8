//! AgentMessage — advisory notes from the agent-assist overlay.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Strategy parameter name → value. `BTreeMap` keeps display order stable.
pub type ParamMap = BTreeMap<String, f64>;

/// What the agent did at this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentAction {
    Analyzing,
    Adjusted,
    NoChange,
}

impl fmt::Display for AgentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentAction::Analyzing => "analyzing",
            AgentAction::Adjusted => "adjusted",
            AgentAction::NoChange => "no_change",
        };
        f.write_str(s)
    }
}

/// One agent-assist note in the run timeline.
///
/// Ids come from a counter separate from trade ids. `params_before` /
/// `params_after` are only kept for `Adjusted` notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: u64,
    pub time: String,
    pub action: AgentAction,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params_before: Option<ParamMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params_after: Option<ParamMap>,
}

/// A single parameter's value before and after an adjustment.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamChange {
    pub name: String,
    pub before: Option<f64>,
    pub after: Option<f64>,
}

impl AgentMessage {
    /// Parameters touched by an adjustment, in name order.
    ///
    /// Empty unless the action is `Adjusted` and both maps are present.
    pub fn param_changes(&self) -> Vec<ParamChange> {
        let (Some(before), Some(after)) = (&self.params_before, &self.params_after) else {
            return Vec::new();
        };
        if self.action != AgentAction::Adjusted {
            return Vec::new();
        }

        let mut names: Vec<&String> = before.keys().chain(after.keys()).collect();
        names.sort();
        names.dedup();

        names
            .into_iter()
            .map(|name| ParamChange {
                name: name.clone(),
                before: before.get(name).copied(),
                after: after.get(name).copied(),
            })
            .collect()
    }
}
