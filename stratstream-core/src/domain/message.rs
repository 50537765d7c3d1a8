//! Unified run timeline entry.

use super::agent::AgentMessage;
use super::trade::TradeMessage;
use serde::{Deserialize, Serialize};

/// One entry of the run timeline: a trade or an agent note.
///
/// The timeline is kept in arrival order, never re-sorted by timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum StreamMessage {
    Trade(TradeMessage),
    Agent(AgentMessage),
}

impl StreamMessage {
    pub fn time(&self) -> &str {
        match self {
            StreamMessage::Trade(t) => &t.time,
            StreamMessage::Agent(a) => &a.time,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamMessage::Trade(_) => "trade",
            StreamMessage::Agent(_) => "agent",
        }
    }

    pub fn as_trade(&self) -> Option<&TradeMessage> {
        match self {
            StreamMessage::Trade(t) => Some(t),
            StreamMessage::Agent(_) => None,
        }
    }

    pub fn as_agent(&self) -> Option<&AgentMessage> {
        match self {
            StreamMessage::Agent(a) => Some(a),
            StreamMessage::Trade(_) => None,
        }
    }
}
