//! Transports that open a backtest stream and deliver cancel requests.
//!
//! The controller only sees `BacktestTransport`: an opened stream is a plain
//! `Read` body that the decode thread pulls chunks from. A body read may
//! fail with `ErrorKind::WouldBlock` when nothing arrived within
//! [`STREAM_POLL_INTERVAL`]; the caller checks whether it still wants the
//! stream and reads again, or drops the body.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::{Duration, Instant};

use reqwest::header::ACCEPT;
use serde_json::Value;
use stratstream_core::RunConfig;
use thiserror::Error;
use tracing::{debug, info};

use crate::client_config::ClientConfig;

/// An open stream body.
pub type StreamBody = Box<dyn Read + Send>;

/// Longest a polling body blocks in `read` before yielding `WouldBlock`.
pub const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Response chunks buffered between the HTTP reader and the decode loop.
const HTTP_BODY_BACKLOG: usize = 16;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    /// The server answered with a non-success status.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    /// Connection, TLS, timeout or local I/O failure.
    #[error("{0}")]
    Network(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Opens backtest streams and posts cancel requests.
pub trait BacktestTransport: Send + Sync {
    /// Human-readable transport name.
    fn name(&self) -> &str;

    /// Open the stream for one run. Resolves once the response head arrives;
    /// the body is read by the caller, who may drop it at any time.
    fn open_stream(&self, config: &RunConfig, token: &str) -> Result<StreamBody, TransportError>;

    /// Ask the server to stop the caller's active run.
    fn cancel_run(&self, token: &str) -> Result<(), TransportError>;
}

// ── HTTP ─────────────────────────────────────────────────────────────

/// Blocking HTTP transport against the backtest service.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    config: ClientConfig,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(None::<Duration>)
            .user_agent(concat!("stratstream/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        Ok(Self { client, config })
    }
}

impl BacktestTransport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    fn open_stream(&self, config: &RunConfig, token: &str) -> Result<StreamBody, TransportError> {
        let url = self.config.stream_url();
        info!(%url, strategy = %config.strategy, symbol = %config.symbol, "opening backtest stream");

        let resp = self
            .client
            .get(&url)
            .query(&config.query_params())
            .bearer_auth(token)
            .header(ACCEPT, "text/event-stream")
            .send()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                message: rejection_message(status.as_u16(), &body),
            });
        }
        debug!(status = status.as_u16(), "stream response head received");
        HttpBody::spawn(
            resp,
            self.config.effective_chunk_size(),
            self.config.idle_timeout(),
        )
    }

    fn cancel_run(&self, token: &str) -> Result<(), TransportError> {
        let url = self.config.cancel_url();
        debug!(%url, "posting cancel request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .timeout(self.config.cancel_timeout())
            .send()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                message: rejection_message(status.as_u16(), &body),
            });
        }
        Ok(())
    }
}

/// Message for a rejected request: the body's `detail` (or `message`) field
/// when the body is JSON, else a generic text naming the status.
pub fn rejection_message(status: u16, body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let field = parsed.as_ref().and_then(|v| {
        ["detail", "message"].iter().find_map(|key| match v.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(Value::String(_)) => None,
            Some(other) => Some(other.to_string()),
        })
    });
    field.unwrap_or_else(|| format!("backtest request failed (HTTP {status})"))
}

/// Stream body fed by a reader thread that owns the HTTP response.
///
/// Reads wait at most [`STREAM_POLL_INTERVAL`] for the next chunk. When the
/// body is dropped the reader thread exits after its current read and the
/// response is closed with it.
struct HttpBody {
    chunks: Receiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    offset: usize,
    idle_timeout: Option<Duration>,
    last_data: Instant,
}

impl HttpBody {
    fn spawn(
        resp: reqwest::blocking::Response,
        chunk_size: usize,
        idle_timeout: Option<Duration>,
    ) -> Result<StreamBody, TransportError> {
        let (tx, rx) = mpsc::sync_channel(HTTP_BODY_BACKLOG);
        thread::Builder::new()
            .name("stratstream-http-body".into())
            .spawn(move || forward_response(resp, chunk_size, tx))
            .map_err(|e| TransportError::Network(format!("failed to spawn body reader: {e}")))?;
        Ok(Box::new(HttpBody {
            chunks: rx,
            pending: Vec::new(),
            offset: 0,
            idle_timeout,
            last_data: Instant::now(),
        }))
    }
}

impl Read for HttpBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.offset == self.pending.len() {
            match self.chunks.recv_timeout(STREAM_POLL_INTERVAL) {
                Ok(Ok(chunk)) => {
                    self.pending = chunk;
                    self.offset = 0;
                    self.last_data = Instant::now();
                }
                Ok(Err(e)) => return Err(e),
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(limit) = self.idle_timeout {
                        if self.last_data.elapsed() >= limit {
                            return Err(io::Error::new(
                                io::ErrorKind::TimedOut,
                                format!("no data from server for {}s", limit.as_secs()),
                            ));
                        }
                    }
                    return Err(io::ErrorKind::WouldBlock.into());
                }
            }
        }
        let n = buf.len().min(self.pending.len() - self.offset);
        buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

fn forward_response(
    mut resp: reqwest::blocking::Response,
    chunk_size: usize,
    tx: SyncSender<io::Result<Vec<u8>>>,
) {
    let mut buf = vec![0u8; chunk_size];
    loop {
        let msg = match resp.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => Err(e),
        };
        let failed = msg.is_err();
        if tx.send(msg).is_err() {
            debug!("stream body dropped; closing response");
            return;
        }
        if failed {
            return;
        }
    }
}

// ── Replay ───────────────────────────────────────────────────────────

/// Replays a recorded stream body from disk. Cancel requests are accepted
/// and ignored.
pub struct ReplayTransport {
    path: PathBuf,
}

impl ReplayTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BacktestTransport for ReplayTransport {
    fn name(&self) -> &str {
        "replay"
    }

    fn open_stream(&self, _config: &RunConfig, _token: &str) -> Result<StreamBody, TransportError> {
        let file = File::open(&self.path).map_err(|e| {
            TransportError::Network(format!("failed to open {}: {e}", self.path.display()))
        })?;
        info!(path = %self.path.display(), "replaying recorded stream");
        Ok(Box::new(file))
    }

    fn cancel_run(&self, _token: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

// ── Recording ────────────────────────────────────────────────────────

/// Wraps another transport and copies every stream body it opens to a
/// file, byte for byte, so the run can be replayed later.
pub struct RecordingTransport<T> {
    inner: T,
    path: PathBuf,
}

impl<T: BacktestTransport> RecordingTransport<T> {
    pub fn new(inner: T, path: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            path: path.into(),
        }
    }
}

impl<T: BacktestTransport> BacktestTransport for RecordingTransport<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn open_stream(&self, config: &RunConfig, token: &str) -> Result<StreamBody, TransportError> {
        let body = self.inner.open_stream(config, token)?;
        let sink = File::create(&self.path).map_err(|e| {
            TransportError::Network(format!("failed to create {}: {e}", self.path.display()))
        })?;
        debug!(path = %self.path.display(), "recording stream body");
        Ok(Box::new(TeeBody { body, sink }))
    }

    fn cancel_run(&self, token: &str) -> Result<(), TransportError> {
        self.inner.cancel_run(token)
    }
}

struct TeeBody {
    body: StreamBody,
    sink: File,
}

impl Read for TeeBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.body.read(buf)?;
        if n > 0 {
            self.sink.write_all(&buf[..n])?;
        }
        Ok(n)
    }
}
