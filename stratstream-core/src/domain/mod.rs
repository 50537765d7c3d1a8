//! Domain types for streamed backtest runs.

pub mod agent;
pub mod message;
pub mod stats;
pub mod trade;

pub use agent::{AgentAction, AgentMessage, ParamChange, ParamMap};
pub use message::StreamMessage;
pub use stats::BacktestStats;
pub use trade::{Signal, TradeMessage};
