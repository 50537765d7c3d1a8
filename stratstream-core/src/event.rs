//! Typed events carried by `data:` frames of the backtest stream.
//!
//! Each frame payload is a JSON envelope `{"type": "...", "data": {...}}`.
//! The envelope is parsed first and `data` is then decoded according to the
//! discriminator, so an unknown `type` is a forward-compatible no-op rather
//! than a parse failure.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::domain::{AgentAction, BacktestStats, ParamMap, Signal};

/// Why a `data:` frame could not be turned into an event.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid event envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("invalid `{kind}` payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// `trade` payload. `id` is informational only; the client numbers trades itself.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TradePayload {
    #[serde(default)]
    pub id: Option<u64>,
    pub time: String,
    pub signal: Signal,
    pub price: f64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub balance: Option<f64>,
    #[serde(default)]
    pub trade_pnl: Option<f64>,
    #[serde(default)]
    pub realized_pnl: Option<f64>,
    #[serde(default)]
    pub floating_pnl: Option<f64>,
    #[serde(default)]
    pub market_value: Option<f64>,
}

/// `agent` payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentPayload {
    #[serde(default)]
    pub current_date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    pub action: AgentAction,
    pub message: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub params_before: Option<ParamMap>,
    #[serde(default)]
    pub params_after: Option<ParamMap>,
}

impl AgentPayload {
    /// The payload's own date, preferring `current_date` over `time`.
    pub fn own_date(&self) -> Option<&str> {
        self.current_date
            .as_deref()
            .or(self.time.as_deref())
            .filter(|d| !d.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct ProgressPayload {
    current_date: String,
}

#[derive(Debug, Deserialize)]
struct CompletePayload {
    stats: BacktestStats,
    #[serde(default)]
    trades: Vec<TradePayload>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: Option<String>,
}

/// Fallback text for an `error` event that carries no message.
pub const UNSPECIFIED_STREAM_ERROR: &str = "backtest stream reported an error";

/// A decoded stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Trade(TradePayload),
    Agent(AgentPayload),
    Progress { current_date: String },
    Complete {
        stats: BacktestStats,
        trades: Vec<TradePayload>,
    },
    Error { message: String },
    Cancelled,
    /// A `type` this client does not know. Skipped by the reducer.
    Unknown(String),
}

impl StreamEvent {
    /// Parse the JSON that follows the `data: ` prefix.
    pub fn from_json(payload: &str) -> Result<Self, FrameError> {
        let envelope: Envelope = serde_json::from_str(payload).map_err(FrameError::Envelope)?;
        let Envelope { kind, data } = envelope;

        let event = match kind.as_str() {
            "trade" => StreamEvent::Trade(decode(&kind, data)?),
            "agent" => StreamEvent::Agent(decode(&kind, data)?),
            "progress" => {
                let p: ProgressPayload = decode(&kind, data)?;
                StreamEvent::Progress {
                    current_date: p.current_date,
                }
            }
            "complete" => {
                let c: CompletePayload = decode(&kind, data)?;
                StreamEvent::Complete {
                    stats: c.stats,
                    trades: c.trades,
                }
            }
            "error" => {
                let e: ErrorPayload = if data.is_null() {
                    ErrorPayload::default()
                } else {
                    decode(&kind, data)?
                };
                StreamEvent::Error {
                    message: e
                        .message
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| UNSPECIFIED_STREAM_ERROR.to_string()),
                }
            }
            "cancelled" => StreamEvent::Cancelled,
            _ => StreamEvent::Unknown(kind),
        };
        Ok(event)
    }

    pub fn kind(&self) -> &str {
        match self {
            StreamEvent::Trade(_) => "trade",
            StreamEvent::Agent(_) => "agent",
            StreamEvent::Progress { .. } => "progress",
            StreamEvent::Complete { .. } => "complete",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Cancelled => "cancelled",
            StreamEvent::Unknown(kind) => kind,
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(kind: &str, data: Value) -> Result<T, FrameError> {
    serde_json::from_value(data).map_err(|source| FrameError::Payload {
        kind: kind.to_string(),
        source,
    })
}
