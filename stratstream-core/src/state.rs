//! RunState — the single record a streamed run mutates.
//!
//! All mutation goes through `apply()` (one decoded event) plus the lifecycle
//! helpers `begin_run`, `reset`, `mark_cancelled`, `fail` and `close_stream`.
//! Each call returns the `RunUpdate` describing what changed so observers can
//! follow the run incrementally without diffing snapshots.
//!
//! Invariants:
//! - `messages` is append-only during a run and preserves arrival order.
//! - Trade ids run 1..N in emission order; a `complete` event replaces the
//!   trade list and renumbers it 1..M.
//! - Agent ids use their own counter; both counters restart at `begin_run`.

use serde::Serialize;

use crate::domain::{AgentAction, AgentMessage, BacktestStats, StreamMessage, TradeMessage};
use crate::event::{AgentPayload, StreamEvent, TradePayload};

/// Observable state of the current (or last) run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunState {
    pub is_running: bool,
    /// Last progress cursor reported by the server.
    pub current_date: Option<String>,
    pub trades: Vec<TradeMessage>,
    /// Trades and agent notes interleaved in arrival order.
    pub messages: Vec<StreamMessage>,
    /// Agent notes only, same order as in `messages`.
    pub agent_messages: Vec<AgentMessage>,
    /// Set once, by a `complete` event.
    pub stats: Option<BacktestStats>,
    pub error: Option<String>,

    #[serde(skip)]
    trade_seq: u64,
    #[serde(skip)]
    agent_seq: u64,
}

/// A change applied to `RunState`, in the order it was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum RunUpdate {
    Started,
    Trade(TradeMessage),
    Agent(AgentMessage),
    Progress(String),
    Completed(BacktestStats),
    Failed(String),
    Cancelled,
    /// The stream ended without a terminal event while the run was active.
    Closed,
}

impl RunUpdate {
    /// True for updates after which the run is no longer active.
    pub fn ends_run(&self) -> bool {
        matches!(
            self,
            RunUpdate::Completed(_) | RunUpdate::Failed(_) | RunUpdate::Cancelled | RunUpdate::Closed
        )
    }
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear results: trades, messages, stats, error and the progress cursor.
    /// `is_running` is left alone.
    pub fn reset(&mut self) {
        self.current_date = None;
        self.trades.clear();
        self.messages.clear();
        self.agent_messages.clear();
        self.stats = None;
        self.error = None;
    }

    /// Start a fresh run: reset everything, restart both id counters and
    /// mark the run active.
    pub fn begin_run(&mut self) -> RunUpdate {
        self.reset();
        self.trade_seq = 0;
        self.agent_seq = 0;
        self.is_running = true;
        RunUpdate::Started
    }

    /// Apply one decoded event. Returns `None` for event types that are
    /// skipped (unknown discriminators).
    pub fn apply(&mut self, event: StreamEvent) -> Option<RunUpdate> {
        let update = match event {
            StreamEvent::Trade(payload) => RunUpdate::Trade(self.append_trade(payload)),
            StreamEvent::Agent(payload) => RunUpdate::Agent(self.append_agent(payload)),
            StreamEvent::Progress { current_date } => {
                self.current_date = Some(current_date.clone());
                RunUpdate::Progress(current_date)
            }
            StreamEvent::Complete { stats, trades } => self.complete(stats, trades),
            StreamEvent::Error { message } => self.fail(message),
            StreamEvent::Cancelled => self.mark_cancelled(),
            StreamEvent::Unknown(_) => return None,
        };
        Some(update)
    }

    fn append_trade(&mut self, payload: TradePayload) -> TradeMessage {
        self.trade_seq += 1;
        let trade = trade_from_payload(self.trade_seq, payload);
        self.trades.push(trade.clone());
        self.messages.push(StreamMessage::Trade(trade.clone()));
        trade
    }

    fn append_agent(&mut self, payload: AgentPayload) -> AgentMessage {
        self.agent_seq += 1;
        let time = payload
            .own_date()
            .map(str::to_string)
            .or_else(|| self.current_date.clone())
            .unwrap_or_default();

        let adjusted = payload.action == AgentAction::Adjusted;
        let msg = AgentMessage {
            id: self.agent_seq,
            time,
            action: payload.action,
            message: payload.message,
            reason: payload.reason,
            params_before: payload.params_before.filter(|_| adjusted),
            params_after: payload.params_after.filter(|_| adjusted),
        };
        self.agent_messages.push(msg.clone());
        self.messages.push(StreamMessage::Agent(msg.clone()));
        msg
    }

    /// The server's final trade list is authoritative: it replaces whatever
    /// was streamed and is renumbered from 1.
    fn complete(&mut self, stats: BacktestStats, trades: Vec<TradePayload>) -> RunUpdate {
        self.trades = trades
            .into_iter()
            .zip(1u64..)
            .map(|(payload, id)| trade_from_payload(id, payload))
            .collect();
        self.trade_seq = self.trades.len() as u64;
        self.stats = Some(stats.clone());
        self.is_running = false;
        RunUpdate::Completed(stats)
    }

    /// Record a terminal failure: sets `error` and ends the run.
    pub fn fail(&mut self, message: impl Into<String>) -> RunUpdate {
        let message = message.into();
        self.error = Some(message.clone());
        self.is_running = false;
        RunUpdate::Failed(message)
    }

    /// End the run, keeping everything accumulated so far.
    pub fn mark_cancelled(&mut self) -> RunUpdate {
        self.is_running = false;
        RunUpdate::Cancelled
    }

    /// End of stream. If no terminal event ended the run, treat the silent
    /// close as completion without stats.
    pub fn close_stream(&mut self) -> Option<RunUpdate> {
        if self.is_running {
            self.is_running = false;
            Some(RunUpdate::Closed)
        } else {
            None
        }
    }

    /// Closing trades with a positive realized P&L seen so far.
    pub fn live_win_count(&self) -> usize {
        self.trades.iter().filter(|t| t.is_win()).count()
    }

    /// Most recent balance reported by any trade.
    pub fn last_balance(&self) -> Option<f64> {
        self.trades.iter().rev().find_map(|t| t.balance)
    }
}

fn trade_from_payload(id: u64, p: TradePayload) -> TradeMessage {
    TradeMessage {
        id,
        time: p.time,
        signal: p.signal,
        price: p.price,
        reason: p.reason,
        balance: p.balance,
        trade_pnl: p.trade_pnl,
        realized_pnl: p.realized_pnl,
        floating_pnl: p.floating_pnl,
        market_value: p.market_value,
    }
}
