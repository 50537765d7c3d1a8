//! Run export: JSON report, CSV trade tape and timeline, Markdown summary.
//!
//! A `RunReport` freezes the configuration a run was started with together
//! with everything the run produced. Persisted reports carry a
//! `schema_version`; newer versions are rejected on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratstream_core::{
    AgentMessage, BacktestStats, RunConfig, RunState, StreamMessage, TradeMessage,
};

pub const SCHEMA_VERSION: u32 = 1;

/// Everything a finished (or cancelled, or failed) run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    pub config: RunConfig,
    pub current_date: Option<String>,
    pub stats: Option<BacktestStats>,
    pub error: Option<String>,
    pub trades: Vec<TradeMessage>,
    pub messages: Vec<StreamMessage>,
    pub agent_messages: Vec<AgentMessage>,
}

impl RunReport {
    pub fn new(config: &RunConfig, state: &RunState) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            generated_at: Utc::now(),
            config: config.clone(),
            current_date: state.current_date.clone(),
            stats: state.stats.clone(),
            error: state.error.clone(),
            trades: state.trades.clone(),
            messages: state.messages.clone(),
            agent_messages: state.agent_messages.clone(),
        }
    }

    /// How the run ended, as shown in summaries.
    pub fn outcome(&self) -> &'static str {
        match (&self.stats, &self.error) {
            (_, Some(_)) => "failed",
            (Some(_), None) => "completed",
            (None, None) => "ended without stats",
        }
    }
}

// ─── JSON ───────────────────────────────────────────────────────────

pub fn export_json(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize RunReport to JSON")
}

/// Deserialize a `RunReport`, rejecting schema versions newer than this build.
pub fn import_json(json: &str) -> Result<RunReport> {
    let report: RunReport =
        serde_json::from_str(json).context("failed to deserialize RunReport from JSON")?;
    if report.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            report.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(report)
}

// ─── CSV ────────────────────────────────────────────────────────────

/// Columns: id, time, signal, price, reason, balance, trade_pnl,
/// realized_pnl, floating_pnl, market_value. Absent finance fields are
/// written as empty cells.
pub fn export_trades_csv(trades: &[TradeMessage]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record([
        "id",
        "time",
        "signal",
        "price",
        "reason",
        "balance",
        "trade_pnl",
        "realized_pnl",
        "floating_pnl",
        "market_value",
    ])?;

    for t in trades {
        wtr.write_record([
            t.id.to_string(),
            t.time.clone(),
            t.signal.as_str().to_string(),
            format!("{:.4}", t.price),
            t.reason.clone(),
            opt_f64(t.balance),
            opt_f64(t.trade_pnl),
            opt_f64(t.realized_pnl),
            opt_f64(t.floating_pnl),
            opt_f64(t.market_value),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// The interleaved timeline. Columns: kind, id, time, label, text.
/// `label` is the trade signal or the agent action.
pub fn export_timeline_csv(messages: &[StreamMessage]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["kind", "id", "time", "label", "text"])?;

    for m in messages {
        let (id, label, text) = match m {
            StreamMessage::Trade(t) => (t.id, t.signal.as_str().to_string(), t.reason.clone()),
            StreamMessage::Agent(a) => (a.id, a.action.to_string(), a.message.clone()),
        };
        wtr.write_record([
            m.kind().to_string(),
            id.to_string(),
            m.time().to_string(),
            label,
            text,
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

fn opt_f64(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.4}")).unwrap_or_default()
}

// ─── Artifacts ──────────────────────────────────────────────────────

/// Save a run's artifact set.
///
/// Creates `{strategy}_{symbol}_{timestamp}/` under `output_dir` with
/// `run.json`, `trades.csv` and `timeline.csv`. Returns the directory.
pub fn save_artifacts(report: &RunReport, output_dir: &Path) -> Result<PathBuf> {
    let dirname = format!(
        "{}_{}_{}",
        sanitize(&report.config.strategy),
        sanitize(&report.config.symbol),
        report.generated_at.format("%Y%m%d_%H%M%S")
    );
    let run_dir = output_dir.join(dirname);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    std::fs::write(run_dir.join("run.json"), export_json(report)?)?;
    std::fs::write(run_dir.join("trades.csv"), export_trades_csv(&report.trades)?)?;
    std::fs::write(
        run_dir.join("timeline.csv"),
        export_timeline_csv(&report.messages)?,
    )?;

    Ok(run_dir)
}

/// Load a `RunReport` from an artifact directory's `run.json`.
pub fn load_artifacts(dir: &Path) -> Result<RunReport> {
    let path = dir.join("run.json");
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_json(&json)
}

/// Keep directory names portable: symbols like `SHFE.rb2505` keep their
/// dot, anything outside `[A-Za-z0-9._-]` becomes `_`.
fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ─── Markdown ───────────────────────────────────────────────────────

/// Human-readable summary of a run.
pub fn generate_summary(report: &RunReport) -> String {
    let c = &report.config;
    let mut md = String::new();

    md.push_str(&format!("# {} on {}\n\n", c.strategy, c.symbol));
    md.push_str("| Setting | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Period | {} to {} |\n", c.start_date, c.end_date));
    md.push_str(&format!(
        "| Moving averages | {} / {} |\n",
        c.fast_period, c.slow_period
    ));
    md.push_str(&format!("| Initial balance | {:.2} |\n", c.init_balance));
    md.push_str(&format!(
        "| Position | {} lots, {:.0}% of equity |\n",
        c.position_size, c.position_percent
    ));
    if c.agent_enabled {
        md.push_str(&format!("| Agent | every {} days |\n", c.agent_interval));
    } else {
        md.push_str("| Agent | off |\n");
    }
    md.push_str(&format!("| Outcome | {} |\n", report.outcome()));
    md.push('\n');

    if let Some(err) = &report.error {
        md.push_str(&format!("**Error:** {err}\n\n"));
    }

    if let Some(s) = &report.stats {
        md.push_str("## Results\n\n");
        md.push_str("| Metric | Value |\n");
        md.push_str("| --- | --- |\n");
        md.push_str(&format!("| Trades | {} |\n", s.total_trades));
        md.push_str(&format!("| Wins / Losses | {} / {} |\n", s.win_count, s.loss_count));
        md.push_str(&format!("| Win rate | {} |\n", s.win_rate));
        md.push_str(&format!("| Total profit | {:.2} |\n", s.total_profit));
        md.push_str(&format!("| Max drawdown | {:.2} |\n", s.max_drawdown));
        md.push_str(&format!("| Final balance | {:.2} |\n", s.final_balance));
        md.push('\n');
    } else if let Some(date) = &report.current_date {
        md.push_str(&format!("Stopped at {date}.\n\n"));
    }

    let adjustments: Vec<&AgentMessage> = report
        .agent_messages
        .iter()
        .filter(|a| !a.param_changes().is_empty())
        .collect();
    if !adjustments.is_empty() {
        md.push_str("## Agent adjustments\n\n");
        for a in adjustments {
            let changes: Vec<String> = a
                .param_changes()
                .iter()
                .map(|ch| format!("{} {} → {}", ch.name, fmt_param(ch.before), fmt_param(ch.after)))
                .collect();
            md.push_str(&format!("- {} {}: {}\n", a.time, a.message, changes.join(", ")));
        }
        md.push('\n');
    }

    md
}

fn fmt_param(v: Option<f64>) -> String {
    v.map(|x| format!("{x}")).unwrap_or_else(|| "-".into())
}
