//! StratStream Runner — drives streamed backtests against the backtest service.
//!
//! This crate builds on `stratstream-core` to provide:
//! - `StreamingRunController`, the background decode loop and run lifecycle
//! - Transports: blocking HTTP, file replay, and a recording wrapper
//! - `ClientConfig` for the service endpoint and timeouts
//! - Run export as JSON, CSV and a Markdown summary

pub mod client_config;
pub mod controller;
pub mod export;
pub mod transport;

pub use client_config::{ClientConfig, API_URL_ENV};
pub use controller::{CancelNotice, StreamingRunController, DEFAULT_CHUNK_SIZE};
pub use export::{
    export_json, export_timeline_csv, export_trades_csv, generate_summary, import_json,
    load_artifacts, save_artifacts, RunReport, SCHEMA_VERSION,
};
pub use transport::{
    rejection_message, BacktestTransport, HttpTransport, RecordingTransport, ReplayTransport,
    StreamBody, TransportError, STREAM_POLL_INTERVAL,
};
