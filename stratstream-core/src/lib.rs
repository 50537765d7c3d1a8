//! StratStream Core — domain types, run configuration, stream decoding and
//! run-state reduction for streamed backtests.
//!
//! This crate has no network code. It contains:
//! - Domain types (trade ticks, agent notes, the unified timeline, final stats)
//! - `RunConfig` and the partial `RunConfigPatch` used for shallow merges
//! - The incremental `data: <json>` frame decoder
//! - `RunState`, the reducer every decoded event is applied to

pub mod config;
pub mod domain;
pub mod event;
pub mod frame;
pub mod state;

pub use config::{ConfigError, RunConfig, RunConfigPatch};
pub use domain::{
    AgentAction, AgentMessage, BacktestStats, ParamChange, ParamMap, Signal, StreamMessage,
    TradeMessage,
};
pub use event::{AgentPayload, FrameError, StreamEvent, TradePayload};
pub use frame::{parse_line, DecodeStats, Frame, FrameDecoder, LineBuffer, DATA_PREFIX};
pub use state::{RunState, RunUpdate};
