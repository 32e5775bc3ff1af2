use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use recon_harness::config::ExecutionMode;
use recon_harness::execute::{self, AgentOutcome, Task};
use recon_harness::harness::Harness;
use recon_harness::replay::ReplayHarness;
use recon_harness::server;

/// recon-harness: diagnostics for agent platform capabilities plus a
/// phase-sequenced network reconnaissance run.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "recon-harness",
    version,
    about = "Diagnostics for agent platform capabilities plus phase-sequenced network reconnaissance.",
    long_about = None
)]
struct Cli {
    /// JSON fixture with recorded tool outputs, completion and mission context.
    #[arg(long)]
    fixture: Option<PathBuf>,

    /// Task goal; mentioning network-recon selects that mode.
    #[arg(long, default_value = "run platform diagnostics")]
    goal: String,

    /// Execution mode.
    #[arg(long, value_enum)]
    mode: Option<ExecutionMode>,

    /// Comma-separated module names for single mode.
    #[arg(long, value_delimiter = ',')]
    tests: Vec<String>,

    /// Comma-separated module names to skip.
    #[arg(long = "skip-tests", value_delimiter = ',')]
    skip_tests: Vec<String>,

    /// Subnet for the recon sweep when the target carries none (e.g., 10.0.0.0/28).
    #[arg(long)]
    subnet: Option<String>,

    /// Comma-separated root domains for the domain phase.
    #[arg(long, value_delimiter = ',')]
    domains: Vec<String>,

    /// Whole-suite deadline in milliseconds.
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Per-module deadline in milliseconds.
    #[arg(long = "test-timeout-ms")]
    test_timeout_ms: Option<u64>,

    /// Per tool invocation deadline in milliseconds.
    #[arg(long = "tool-timeout-ms")]
    tool_timeout_ms: Option<u64>,

    /// Write the outcome as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Serve the run API on this address instead of running once (e.g., 127.0.0.1:8080).
    #[arg(long)]
    serve: Option<String>,

    /// Debug-level logging.
    #[arg(long, default_value_t = false)]
    verbose: bool,
}

impl Cli {
    fn task(&self) -> Task {
        let mut meta = Map::new();
        if let Some(mode) = self.mode {
            meta.insert("mode".into(), json!(mode.as_str()));
        }
        if self.verbose {
            meta.insert("verbose".into(), json!(true));
        }
        if !self.tests.is_empty() {
            meta.insert("tests".into(), json!(self.tests));
        }
        if !self.skip_tests.is_empty() {
            meta.insert("skip_tests".into(), json!(self.skip_tests));
        }
        if let Some(subnet) = &self.subnet {
            meta.insert("subnet".into(), json!(subnet));
        }
        if !self.domains.is_empty() {
            meta.insert("domains".into(), json!(self.domains));
        }
        for (key, value) in [
            ("timeout_ms", self.timeout_ms),
            ("test_timeout_ms", self.test_timeout_ms),
            ("tool_timeout_ms", self.tool_timeout_ms),
        ] {
            if let Some(ms) = value {
                meta.insert(key.into(), json!(ms));
            }
        }
        Task { id: "cli".into(), goal: self.goal.clone(), metadata: Value::Object(meta) }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let harness: Arc<dyn Harness> = match cli.fixture.as_deref() {
        Some(path) => Arc::new(
            ReplayHarness::from_path(path)
                .with_context(|| format!("loading harness fixture {}", path.display()))?,
        ),
        None => {
            warn!("no fixture given; every capability will report as unavailable");
            Arc::new(ReplayHarness::new())
        }
    };

    if let Some(bind) = cli.serve.as_deref() {
        tokio::select! {
            res = server::spawn_server(bind, harness) => res?,
            _ = tokio::signal::ctrl_c() => info!("shutting down"),
        }
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let outcome = execute::execute(harness, &cli.task(), &cancel).await;
    print_results_table(&outcome);
    if let Some(path) = cli.output.as_deref() {
        write_outcome_json(path, &outcome)
            .with_context(|| format!("writing outcome to {}", path.display()))?;
        println!("Wrote JSON outcome to {}", path.display());
    }
    Ok(())
}

fn print_results_table(outcome: &AgentOutcome) {
    let Some(suite) = outcome.suite.as_ref() else {
        println!("\nRun failed: {}", outcome.error.as_deref().unwrap_or("unknown error"));
        return;
    };

    let mut name_w = "name".len();
    let mut req_w = "req".len();
    for r in &suite.results {
        name_w = name_w.max(r.name().len());
        req_w = req_w.max(r.requirement().len());
    }
    let cat_w = "framework".len();
    let status_w = "status".len();
    let msg_w = 60usize;

    println!(
        "\nMode: {} | total: {} | passed: {} | failed: {} | skipped: {} | errors: {} | pass rate: {:.1}%{}",
        suite.mode,
        suite.total_tests(),
        suite.total_passed(),
        suite.total_failed(),
        suite.total_skipped(),
        suite.total_errors(),
        suite.pass_rate() * 100.0,
        if suite.interrupted { " (interrupted)" } else { "" }
    );
    println!(
        "{:<name_w$}  {:<req_w$}  {:<cat_w$}  {:<status_w$}  {:<msg_w$}",
        "name", "req", "category", "status", "message",
    );
    println!(
        "{:-<name_w$}  {:-<req_w$}  {:-<cat_w$}  {:-<status_w$}  {:-<msg_w$}",
        "", "", "", "", "",
    );
    for r in &suite.results {
        let msg: String = r.message().chars().take(msg_w).collect();
        println!(
            "{:<name_w$}  {:<req_w$}  {:<cat_w$}  {:<status_w$}  {:<msg_w$}",
            r.name(),
            r.requirement(),
            r.category().as_str(),
            r.status().as_str(),
            msg,
        );
    }
    println!("\nOverall: {}", suite.overall_status);
}

fn write_outcome_json(path: &Path, outcome: &AgentOutcome) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, outcome)?;
    Ok(())
}
