//! StratStream CLI — run and inspect streamed backtests from the terminal.
//!
//! Commands:
//! - `run` — start a streamed backtest and print trades and agent notes as they arrive
//! - `replay` — feed a recorded stream body through the same pipeline, offline
//! - `cancel` — ask the server to stop the caller's active run
//! - `config` — print the merged run configuration and any warnings
//! - `show` — print the summary of a saved run directory

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;
use stratstream_core::{RunConfig, RunConfigPatch, RunUpdate};
use stratstream_runner::{
    generate_summary, load_artifacts, save_artifacts, BacktestTransport, ClientConfig,
    HttpTransport, RecordingTransport, ReplayTransport, RunReport, StreamingRunController,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// How long to wait for the decode thread once the run has ended.
const JOIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(
    name = "stratstream",
    about = "StratStream CLI — streamed strategy backtests with live trade and agent output"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG wins when set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a streamed backtest against the backtest service.
    Run {
        #[command(flatten)]
        run: RunArgs,

        #[command(flatten)]
        client: ClientArgs,

        /// Copy the raw stream body to this file for later replay.
        #[arg(long)]
        record: Option<PathBuf>,

        #[command(flatten)]
        output: OutputArgs,
    },
    /// Replay a recorded stream body through the decoder, without a server.
    Replay {
        /// Recorded stream body (as written by `run --record`).
        file: PathBuf,

        #[command(flatten)]
        run: RunArgs,

        #[command(flatten)]
        output: OutputArgs,
    },
    /// Ask the server to stop the active run for this token.
    Cancel {
        #[command(flatten)]
        client: ClientArgs,
    },
    /// Print the merged run configuration and any warnings.
    Config {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Print the summary of a saved run directory.
    Show {
        /// Directory created by `run` or `replay`.
        dir: PathBuf,
    },
}

/// Run configuration: an optional TOML patch file, then flag overrides.
#[derive(Args, Default)]
struct RunArgs {
    /// TOML file with any subset of the run configuration keys.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Strategy identifier.
    #[arg(long)]
    strategy: Option<String>,

    /// Strategy parameters as a JSON object; `fast_period` and `slow_period`
    /// are taken from it (falling back to 5 / 20).
    #[arg(long)]
    strategy_params: Option<String>,

    /// Instrument symbol, e.g. SHFE.rb2505.
    #[arg(long)]
    symbol: Option<String>,

    /// Start date (YYYY-MM-DD).
    #[arg(long)]
    start: Option<NaiveDate>,

    /// End date (YYYY-MM-DD).
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Fast moving-average period.
    #[arg(long)]
    fast: Option<u32>,

    /// Slow moving-average period.
    #[arg(long)]
    slow: Option<u32>,

    /// Initial account balance.
    #[arg(long)]
    balance: Option<f64>,

    /// Lots per entry.
    #[arg(long)]
    size: Option<u32>,

    /// Percentage of equity per entry (0-100).
    #[arg(long)]
    percent: Option<f64>,

    /// Agent-assisted parameter adjustment: `--agent` or `--agent=false`.
    #[arg(
        long,
        value_name = "BOOL",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    agent: Option<bool>,

    /// Agent check interval in days.
    #[arg(long)]
    agent_interval: Option<u32>,
}

#[derive(Args)]
struct ClientArgs {
    /// TOML file with client settings (base_url, timeouts, paths).
    #[arg(long)]
    client_config: Option<PathBuf>,

    /// Base URL of the backtest service. Overrides STRATSTREAM_API_URL.
    #[arg(long)]
    api_url: Option<String>,

    /// Bearer token.
    #[arg(long, env = "STRATSTREAM_TOKEN", default_value = "", hide_env_values = true)]
    token: String,
}

#[derive(Args)]
struct OutputArgs {
    /// Directory for run artifacts (run.json, trades.csv, timeline.csv).
    #[arg(long, default_value = "results")]
    output_dir: PathBuf,

    /// Do not write artifacts.
    #[arg(long, default_value_t = false)]
    no_save: bool,

    /// Only print the final summary.
    #[arg(short, long, default_value_t = false)]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            run,
            client,
            record,
            output,
        } => run_stream_cmd(&run, &client, record, &output),
        Commands::Replay { file, run, output } => run_replay_cmd(file, &run, &output),
        Commands::Cancel { client } => run_cancel_cmd(&client),
        Commands::Config { run } => run_config_cmd(&run),
        Commands::Show { dir } => run_show_cmd(&dir),
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

// ── Config assembly ──────────────────────────────────────────────────

impl RunArgs {
    fn flag_patch(&self) -> RunConfigPatch {
        RunConfigPatch {
            strategy: self.strategy.clone(),
            symbol: self.symbol.clone(),
            start_date: self.start,
            end_date: self.end,
            fast_period: self.fast,
            slow_period: self.slow,
            init_balance: self.balance,
            position_size: self.size,
            position_percent: self.percent,
            agent_enabled: self.agent,
            agent_interval: self.agent_interval,
        }
    }

    /// Defaults, then the config file, then strategy params, then flags.
    fn resolve(&self) -> Result<RunConfig> {
        let mut config = RunConfig::default();
        if let Some(path) = &self.config {
            config.merge(RunConfigPatch::from_file(path)?);
        }

        if let Some(raw) = &self.strategy_params {
            let params: BTreeMap<String, Value> = serde_json::from_str(raw)
                .context("--strategy-params must be a JSON object")?;
            let name = self.strategy.clone().unwrap_or_else(|| config.strategy.clone());
            config.apply_strategy_params(&name, &params);
        }

        config.merge(self.flag_patch());
        Ok(config)
    }
}

impl ClientArgs {
    fn resolve(&self) -> Result<ClientConfig> {
        let mut client = match &self.client_config {
            Some(path) => ClientConfig::from_file(path)?,
            None => ClientConfig::default(),
        }
        .with_env_overrides();
        if let Some(url) = &self.api_url {
            client.base_url = url.clone();
        }
        Ok(client)
    }
}

// ── Commands ─────────────────────────────────────────────────────────

fn run_stream_cmd(
    run: &RunArgs,
    client: &ClientArgs,
    record: Option<PathBuf>,
    output: &OutputArgs,
) -> Result<()> {
    let config = run.resolve()?;
    let client_config = client.resolve()?;
    let chunk_size = client_config.effective_chunk_size();
    let http = HttpTransport::new(client_config)?;

    let transport: Arc<dyn BacktestTransport> = match record {
        Some(path) => Arc::new(RecordingTransport::new(http, path)),
        None => Arc::new(http),
    };
    drive(transport, config, chunk_size, &client.token, output)
}

fn run_replay_cmd(file: PathBuf, run: &RunArgs, output: &OutputArgs) -> Result<()> {
    if !file.exists() {
        bail!("recording not found: {}", file.display());
    }
    let config = run.resolve()?;
    let transport = Arc::new(ReplayTransport::new(file));
    drive(
        transport,
        config,
        stratstream_runner::DEFAULT_CHUNK_SIZE,
        "",
        output,
    )
}

fn run_cancel_cmd(client: &ClientArgs) -> Result<()> {
    let transport = HttpTransport::new(client.resolve()?)?;
    transport.cancel_run(&client.token)?;
    println!("Cancel request accepted.");
    Ok(())
}

fn run_config_cmd(run: &RunArgs) -> Result<()> {
    let config = run.resolve()?;
    print!("{}", toml::to_string_pretty(&config)?);
    print_warnings(&config);
    Ok(())
}

fn run_show_cmd(dir: &Path) -> Result<()> {
    let report = load_artifacts(dir)?;
    print!("{}", generate_summary(&report));
    Ok(())
}

/// Run one backtest to its end, printing updates as they arrive.
fn drive(
    transport: Arc<dyn BacktestTransport>,
    config: RunConfig,
    chunk_size: usize,
    token: &str,
    output: &OutputArgs,
) -> Result<()> {
    print_warnings(&config);
    debug!(transport = transport.name(), "driving run");

    let mut ctl =
        StreamingRunController::with_config(transport, config.clone()).with_chunk_size(chunk_size);
    let updates = ctl.subscribe();
    ctl.start(token);

    loop {
        match updates.recv_timeout(Duration::from_millis(250)) {
            Ok(update) => {
                let done = update.ends_run();
                if !output.quiet {
                    print_update(&update);
                    if matches!(&update, RunUpdate::Trade(t) if t.is_closing()) {
                        let (wins, balance) =
                            ctl.with_state(|s| (s.live_win_count(), s.last_balance()));
                        print_tally(wins, balance);
                    }
                }
                if done {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if !ctl.is_running() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    if !ctl.join_timeout(JOIN_GRACE) {
        debug!("stream still open after the run ended; detaching");
    }

    let report = RunReport::new(&config, &ctl.snapshot());
    println!();
    print!("{}", generate_summary(&report));

    if !output.no_save {
        let run_dir = save_artifacts(&report, &output.output_dir)?;
        println!("Artifacts saved to: {}", run_dir.display());
    }

    if let Some(err) = report.error {
        bail!("run failed: {err}");
    }
    Ok(())
}

// ── Output ───────────────────────────────────────────────────────────

fn print_update(update: &RunUpdate) {
    match update {
        RunUpdate::Started => println!("Run started."),
        RunUpdate::Progress(date) => debug!(%date, "progress"),
        RunUpdate::Trade(t) => {
            let mut line = format!(
                "#{:<4} {} {:<4} @ {:>10.2}  {}",
                t.id, t.time, t.signal, t.price, t.reason
            );
            if let Some(pnl) = t.trade_pnl {
                line.push_str(&format!("  pnl {pnl:+.2}"));
            }
            if let Some(balance) = t.balance {
                line.push_str(&format!("  balance {balance:.2}"));
            }
            println!("{line}");
        }
        RunUpdate::Agent(a) => {
            println!("[agent {}] {} {}", a.action, a.time, a.message);
            if let Some(reason) = &a.reason {
                println!("        {reason}");
            }
            for ch in a.param_changes() {
                println!(
                    "        {}: {} -> {}",
                    ch.name,
                    ch.before.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
                    ch.after.map(|v| v.to_string()).unwrap_or_else(|| "-".into())
                );
            }
        }
        RunUpdate::Completed(stats) => println!(
            "Run completed: {} trades, win rate {}, final balance {:.2}",
            stats.total_trades, stats.win_rate, stats.final_balance
        ),
        RunUpdate::Failed(msg) => println!("Run failed: {msg}"),
        RunUpdate::Cancelled => println!("Run cancelled."),
        RunUpdate::Closed => println!("Stream closed."),
    }
}

fn print_tally(wins: usize, balance: Option<f64>) {
    let balance = balance
        .map(|b| format!("{b:.2}"))
        .unwrap_or_else(|| "-".into());
    println!("      wins so far {wins}, balance {balance}");
}

fn print_warnings(config: &RunConfig) {
    for w in config.warnings() {
        eprintln!("warning: {w}");
    }
}
