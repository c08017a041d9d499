//! `next`: deterministic job queue CLI over the work ledger.

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use next_ledger::config::Config;
use next_ledger::engine::{ClaimRequest, Completion, Engine, parse_revisit};
use next_ledger::model::Cursor;
use next_ledger::shard::ShardSpec;
use next_ledger::telemetry::{TelemetryConfig, init_telemetry, metrics};
use opentelemetry::KeyValue;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

#[derive(Parser)]
#[command(
    name = "next",
    about = "Deterministic job queue",
    after_help = "Examples:\n  find . -name '*.go' | next enqueue --treatment=lint\n  next claim --treatment=lint\n  next done --path=foo.go --result=abc123"
)]
struct Cli {
    /// Ledger database path (overrides LEDGER_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read paths from stdin, add to queue
    Enqueue {
        /// Treatment name
        #[arg(long, default_value = "default")]
        treatment: String,
    },
    /// Claim next unclaimed path(s)
    Claim {
        /// Treatment name
        #[arg(long, default_value = "default")]
        treatment: String,
        /// Resume after this cursor (a location hash, or the `raw:` form printed after skipped rows)
        #[arg(long)]
        cursor: Option<String>,
        /// Number to claim
        #[arg(short, long, default_value_t = 1)]
        n: u32,
        /// Shard index (requires --total-shards)
        #[arg(long, requires = "total_shards")]
        shard: Option<u64>,
        /// Number of shards the hash space is cut into (requires --shard)
        #[arg(long, requires = "shard")]
        total_shards: Option<u64>,
        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Plain)]
        format: Format,
    },
    /// Mark path as complete
    Done {
        /// File path
        #[arg(long)]
        path: String,
        /// Treatment name
        #[arg(long, default_value = "default")]
        treatment: String,
        /// Result recorded with the item
        #[arg(long, default_value = "")]
        result: String,
        /// Make the item claimable again after this long (e.g. "14 days")
        #[arg(long)]
        revisit: Option<String>,
    },
    /// Show queue stats
    Status {
        /// Filter by treatment (empty = all)
        #[arg(long)]
        treatment: Option<String>,
        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Plain)]
        format: Format,
    },
    /// Clear treatment from queue
    Reset {
        /// Treatment to reset
        #[arg(long)]
        treatment: String,
        /// Skip confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Plain,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(e.exit_code());
        }
    };
    let config = match cli.db.clone() {
        Some(path) => config.with_db_path(path),
        None => config,
    };

    // A second subscriber (e.g. under a test harness) is not fatal.
    let _guard = init_telemetry(TelemetryConfig::from_config(&config)).ok();

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command execution failed");
            eprintln!("error: {e:#}");
            let code = e
                .downcast_ref::<next_ledger::Error>()
                .map(next_ledger::Error::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

async fn run(command: Command, config: &Config) -> anyhow::Result<()> {
    let started = Instant::now();
    let operation = command.name();

    let result = match command {
        Command::Enqueue { treatment } => cmd_enqueue(config, treatment).await,
        Command::Claim {
            treatment,
            cursor,
            n,
            shard,
            total_shards,
            format,
        } => cmd_claim(config, treatment, cursor, n, shard.zip(total_shards), format).await,
        Command::Done {
            path,
            treatment,
            result,
            revisit,
        } => cmd_done(config, path, treatment, result, revisit).await,
        Command::Status { treatment, format } => cmd_status(config, treatment, format).await,
        Command::Reset { treatment, yes } => cmd_reset(config, treatment, yes).await,
    };

    metrics::operation_duration_ms().record(
        started.elapsed().as_secs_f64() * 1000.0,
        &[KeyValue::new("operation", operation)],
    );
    result
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Enqueue { .. } => "enqueue",
            Command::Claim { .. } => "claim",
            Command::Done { .. } => "done",
            Command::Status { .. } => "status",
            Command::Reset { .. } => "reset",
        }
    }
}

async fn cmd_enqueue(config: &Config, treatment: String) -> anyhow::Result<()> {
    let engine = Engine::open(config).await?;

    let (lines, undecodable) = read_locations(std::io::stdin().lock())?;
    if undecodable > 0 {
        metrics::items_skipped().add(
            undecodable,
            &[
                KeyValue::new("treatment", treatment.clone()),
                KeyValue::new("stage", "input"),
            ],
        );
    }

    let mut summary = engine.enqueue(&treatment, &lines).await?;
    summary.skipped += undecodable;
    println!(
        "enqueued {} paths for treatment={} (new={}, requeued={}, unchanged={}, skipped={})",
        summary.reconciled(),
        summary.treatment,
        summary.inserted,
        summary.requeued,
        summary.unchanged,
        summary.skipped
    );

    engine.close().await;
    Ok(())
}

/// Split input into lines without requiring the whole stream to be UTF-8.
/// Lines that do not decode are warned about and counted, not fatal.
fn read_locations(input: impl BufRead) -> anyhow::Result<(Vec<String>, u64)> {
    let mut lines = Vec::new();
    let mut undecodable = 0;
    for (number, raw) in input.split(b'\n').enumerate() {
        let mut raw = raw.context("failed to read paths from input")?;
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        match String::from_utf8(raw) {
            Ok(line) => lines.push(line),
            Err(e) => {
                tracing::warn!(
                    line = number + 1,
                    location = %String::from_utf8_lossy(e.as_bytes()),
                    "skipping location: not valid UTF-8"
                );
                undecodable += 1;
            }
        }
    }
    Ok((lines, undecodable))
}

async fn cmd_claim(
    config: &Config,
    treatment: String,
    cursor: Option<String>,
    n: u32,
    shard: Option<(u64, u64)>,
    format: Format,
) -> anyhow::Result<()> {
    // Validate everything before touching the store.
    let mut request = ClaimRequest::new(treatment).limit(n);
    if let Some(raw) = cursor.filter(|c| !c.trim().is_empty()) {
        request = request.cursor(Cursor::parse(&raw)?);
    }
    if let Some((index, total)) = shard {
        request = request.shard(ShardSpec::new(index, total)?);
    }

    let engine = Engine::open(config).await?;
    let batch = engine.claim(&request).await?;

    {
        let mut out = std::io::stdout().lock();
        for item in &batch.items {
            match format {
                Format::Plain => writeln!(out, "{}", item.location)?,
                Format::Json => {
                    let line = serde_json::json!({
                        "location": item.location,
                        "location_hash": item.location_hash,
                        "treatment": item.treatment,
                        "revisit_due": !item.is_pending(),
                    });
                    writeln!(out, "{line}")?;
                }
            }
        }
        out.flush()?;
    }

    if batch.skipped > 0 {
        eprintln!(
            "warning: {} undecodable row(s) skipped; resume with --cursor={}",
            batch.skipped,
            batch
                .next_cursor
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default()
        );
    }

    engine.close().await;
    Ok(())
}

async fn cmd_done(
    config: &Config,
    path: String,
    treatment: String,
    result: String,
    revisit: Option<String>,
) -> anyhow::Result<()> {
    let mut completion = Completion::new(path, treatment).result(result);
    if let Some(raw) = revisit.filter(|r| !r.trim().is_empty()) {
        completion = completion.revisit(parse_revisit(&raw)?);
    }

    let engine = Engine::open(config).await?;
    let item = engine.complete(&completion).await?;
    tracing::debug!(location = %item.location, "done recorded");

    engine.close().await;
    Ok(())
}

async fn cmd_status(config: &Config, treatment: Option<String>, format: Format) -> anyhow::Result<()> {
    let engine = Engine::open(config).await?;
    let report = engine.status(treatment.as_deref()).await?;

    match format {
        Format::Json => {
            let body = serde_json::json!({
                "rows": report.rows,
                "total": report.total(),
            });
            println!("{body}");
        }
        Format::Plain => {
            println!("{:<20} {:>10} {:>10} {:>10}", "TREATMENT", "PENDING", "DONE", "DUE");
            for row in &report.rows {
                println!(
                    "{:<20} {:>10} {:>10} {:>10}",
                    row.treatment, row.pending, row.done, row.due
                );
            }
            if !report.is_empty() {
                let total = report.total();
                println!(
                    "{:<20} {:>10} {:>10} {:>10}",
                    total.treatment, total.pending, total.done, total.due
                );
            }
        }
    }

    engine.close().await;
    Ok(())
}

async fn cmd_reset(config: &Config, treatment: String, yes: bool) -> anyhow::Result<()> {
    if treatment.trim().is_empty() {
        return Err(next_ledger::Error::Validation("--treatment required".to_string()).into());
    }

    if !yes {
        eprint!("Delete all entries for treatment={treatment}? [y/N] ");
        std::io::stderr().flush()?;
        let mut response = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut response)
            .context("failed to read confirmation input")?;
        if !matches!(response.trim(), "y" | "Y") {
            println!("cancelled");
            return Ok(());
        }
    }

    let engine = Engine::open(config).await?;
    let deleted = engine.reset(&treatment).await?;
    println!("deleted {deleted} entries");

    engine.close().await;
    Ok(())
}
