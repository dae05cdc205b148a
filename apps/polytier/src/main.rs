//! # Polytier
//!
//! Command-line entry point for the Polytier registry, checkpoint and
//! monitoring tools.

use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use polytier::cli::{
    MonitorSession, build_monitor, cmd_candidates, cmd_checkpoint, cmd_demote, cmd_digest,
    cmd_ingest, cmd_promote, cmd_reconcile, cmd_restore, cmd_seed, cmd_snapshot, cmd_tier0,
    cmd_verify,
};
use polytier::config::Settings;
use polytier::error::{CliError, CliResult};
use polytier::monitoring::{WatchOptions, watch_context_brief};
use polytier_core::CandidateStatus;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Polytier command line arguments.
#[derive(Parser, Debug)]
#[command(name = "polytier")]
#[command(about = "Tiered polyform symbol registry, checkpoints and monitoring")]
struct Args {
    /// Settings file (JSON)
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Registry file
    #[arg(short, long, value_name = "PATH", global = true, default_value = "registry.json")]
    registry: PathBuf,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the canonical digest of a JSON document
    Digest { path: PathBuf },
    /// Parse a tier-0 symbol
    Tier0 { symbol: String },
    /// Seed a namespace from ranked identities (one per line)
    Seed {
        #[arg(long, default_value = "assemblies")]
        namespace: String,
        identities: PathBuf,
    },
    /// Flush polygons from a JSON file as a checkpoint
    Checkpoint {
        input: PathBuf,
        #[arg(long)]
        label: Option<String>,
    },
    /// Inspect a checkpoint file
    Restore {
        path: PathBuf,
        /// Write the embedded registry state here
        #[arg(long, value_name = "PATH")]
        registry_out: Option<PathBuf>,
    },
    /// Extract tier-3 candidates from a checkpoint file
    Ingest { path: PathBuf },
    /// List tier-3 candidates
    Candidates {
        #[arg(long, value_parser = parse_status)]
        status: Option<CandidateStatus>,
    },
    /// Promote a candidate into the registry
    Promote {
        candidate_id: String,
        #[arg(long, default_value = "manual")]
        reason: String,
    },
    /// Demote a promoted candidate
    Demote {
        candidate_id: String,
        #[arg(long, default_value = "manual")]
        reason: String,
    },
    /// Save a labeled snapshot of the registry
    Snapshot {
        out: PathBuf,
        #[arg(long, default_value = "baseline")]
        label: String,
    },
    /// Compare the registry with a baseline snapshot
    Verify { baseline: PathBuf },
    /// Restore the registry to a baseline snapshot
    Reconcile { baseline: PathBuf },
    /// Watch the context brief for registry drift
    Monitor {
        /// Stop after this many dispatch passes
        #[arg(long)]
        iterations: Option<u64>,
        /// Use filesystem notifications on a background thread
        #[arg(long)]
        watch: bool,
    },
}

fn parse_status(raw: &str) -> Result<CandidateStatus, String> {
    match raw {
        "pending" => Ok(CandidateStatus::Pending),
        "promoted" => Ok(CandidateStatus::Promoted),
        "demoted" => Ok(CandidateStatus::Demoted),
        other => Err(format!("unknown status '{other}'")),
    }
}

fn setup_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("polytier=debug,polytier_core=debug")
        } else {
            EnvFilter::new("polytier=info,polytier_core=info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    setup_tracing(args.verbose);

    if let Err(err) = run(args).await {
        error!(error = %err, "command failed");
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> CliResult<()> {
    let settings = Settings::load(args.config.as_deref())?;
    let registry = args.registry;

    match args.command {
        Command::Digest { path } => println!("{}", cmd_digest(&path)?),
        Command::Tier0 { symbol } => print_json(&cmd_tier0(&symbol)?)?,
        Command::Seed {
            namespace,
            identities,
        } => {
            for (identity, symbol) in cmd_seed(&registry, &settings.tiers, &namespace, &identities)? {
                println!("{identity}\t{symbol}\t{}", symbol.tier());
            }
        }
        Command::Checkpoint { input, label } => {
            let report = cmd_checkpoint(&settings, &registry, &input, label.as_deref())?;
            print_json(&report.record)?;
            for breach in &report.guardrails.breaches {
                println!("guardrail breach: {breach}");
            }
            for warning in &report.guardrails.warnings {
                println!("guardrail warning: {warning}");
            }
        }
        Command::Restore { path, registry_out } => {
            let report = cmd_restore(&settings, &path, registry_out.as_deref())?;
            println!("label: {}", report.label.as_deref().unwrap_or("-"));
            println!("polygons: {}", report.polygons);
            println!("chunks: {}", report.chunk_count);
            println!("registry state: {}", report.registry_state.is_some());
            for warning in &report.warnings {
                println!("warning: {warning}");
            }
        }
        Command::Ingest { path } => {
            for id in cmd_ingest(&settings, &path)? {
                println!("{id}");
            }
        }
        Command::Candidates { status } => print_json(&cmd_candidates(&settings, status)?)?,
        Command::Promote {
            candidate_id,
            reason,
        } => print_json(&cmd_promote(&settings, &registry, &candidate_id, &reason)?)?,
        Command::Demote {
            candidate_id,
            reason,
        } => print_json(&cmd_demote(&settings, &registry, &candidate_id, &reason)?)?,
        Command::Snapshot { out, label } => {
            let snapshot = cmd_snapshot(&settings, &registry, &label, &out)?;
            println!("{} {} ({} entries)", snapshot.label, snapshot.digest, snapshot.entry_count());
        }
        Command::Verify { baseline } => {
            let (ok, diff) = cmd_verify(&settings, &registry, &baseline)?;
            for line in diff.render_lines() {
                println!("{line}");
            }
            if !ok {
                return Err(CliError::Invalid(format!(
                    "registry differs from baseline in {} entries",
                    diff.len()
                )));
            }
            println!("registry matches baseline");
        }
        Command::Reconcile { baseline } => {
            let residual = cmd_reconcile(&settings, &registry, &baseline)?;
            if !residual.is_empty() {
                return Err(CliError::Invalid(residual.render_lines().join("\n")));
            }
            println!("registry reconciled");
        }
        Command::Monitor { iterations, watch } => {
            if !settings.monitoring.enabled {
                info!("monitoring disabled");
                return Ok(());
            }
            let session = build_monitor(&settings, &registry)?;
            if watch {
                watch_until_ctrl_c(session, settings.monitoring.poll_interval()).await?;
            } else {
                poll_loop(session, iterations, settings.monitoring.poll_interval()).await?;
            }
        }
    }
    Ok(())
}

async fn poll_loop(
    mut session: MonitorSession,
    iterations: Option<u64>,
    interval: Duration,
) -> CliResult<()> {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut passes = 0_u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let result = tokio::task::block_in_place(|| session.dispatch())?;
                passes += 1;
                if result.processed > 0 {
                    info!(
                        entries = result.processed,
                        drift = result.refresh_results.iter().filter(|r| !r.registry_match).count(),
                        "dispatched context brief entries"
                    );
                }
                if iterations.is_some_and(|max| passes >= max) {
                    break;
                }
            }
            _ = &mut shutdown => {
                info!("interrupted");
                break;
            }
        }
    }
    tokio::task::block_in_place(|| session.finish());
    info!(passes, "monitor stopped");
    Ok(())
}

async fn watch_until_ctrl_c(session: MonitorSession, interval: Duration) -> CliResult<()> {
    let MonitorSession {
        tailer,
        worker,
        bridge,
    } = session;
    let mut handle = watch_context_brief(
        tailer,
        Arc::new(Mutex::new(worker)),
        Some(bridge),
        WatchOptions {
            poll_interval: interval,
            ..WatchOptions::default()
        },
    )?;
    info!(backend = ?handle.backend(), "watching context brief");

    tokio::signal::ctrl_c().await?;
    let counters = tokio::task::block_in_place(|| handle.stop());
    info!(
        passes = counters.iterations,
        entries = counters.entries,
        "monitor stopped"
    );
    Ok(())
}
