use std::path::PathBuf;

use clap::Parser;

use dirtree_audit::config::{AuditConfig, ResolvedOutputs};
use dirtree_audit::logging::init_logging;
use dirtree_audit::runner::AuditRunner;

/// Posterior audit harness for instant-runoff elections.
#[derive(Debug, Parser)]
#[command(
    name = "dirtree-audit",
    author,
    version,
    about = "Dirichlet-tree posterior audit of IRV outcomes"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "audit/audit.yaml")]
    config: PathBuf,

    /// Override the run identifier (substitutes {run_id} templates).
    #[arg(long, value_name = "RUN_ID")]
    run_id: Option<String>,

    /// Override the number of simulated elections.
    #[arg(long, value_name = "COUNT")]
    elections: Option<usize>,

    /// Override the total number of ballots in each simulated election.
    #[arg(long, value_name = "COUNT")]
    ballots_total: Option<u64>,

    /// Override the number of winners.
    #[arg(long, value_name = "COUNT")]
    winners: Option<usize>,

    /// Override the worker thread count.
    #[arg(long, value_name = "COUNT")]
    workers: Option<usize>,

    /// Override the audit seed used to derive per-worker engines.
    #[arg(long, value_name = "SEED")]
    seed: Option<String>,

    /// Exit after validating the configuration and ballots (no audit is run).
    #[arg(long)]
    validate_only: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = AuditConfig::from_path(&cli.config)?;

    if let Some(run_id) = cli.run_id {
        config.run_id = run_id;
    }

    if let Some(elections) = cli.elections {
        config.audit.elections = elections;
    }

    if let Some(ballots_total) = cli.ballots_total {
        config.audit.ballots_total = ballots_total;
    }

    if let Some(winners) = cli.winners {
        config.audit.winners = winners;
    }

    if let Some(workers) = cli.workers {
        config.audit.workers = Some(workers);
    }

    if let Some(seed) = cli.seed {
        config.audit.seed = Some(seed);
    }

    config.validate()?;

    let outputs: ResolvedOutputs = config.resolved_outputs();
    let candidate_count = config.election.candidates.len();
    let run_id = config.run_id.clone();
    let elections = config.audit.elections;

    println!(
        "Loaded configuration '{run_id}' with {candidate_count} candidates ({elections} elections)"
    );

    let logging_guard = init_logging(&config.logging, &outputs)?;
    let runner = AuditRunner::new(config, outputs)?;
    println!("Observed ballots: {}", runner.observed_ballots());

    if cli.validate_only {
        println!("Validation-only mode: audit execution skipped.");
        return Ok(());
    }

    let summary = runner.run()?;
    println!(
        "Audit complete for '{run_id}': {} elections of {} ballots ({} observed)",
        summary.elections, summary.ballots_total, summary.observed_ballots
    );
    for (name, probability) in &summary.win_probabilities {
        println!("  {name:<20} {probability:.4}");
    }
    println!("Report: {}", summary.json_path.display());
    println!("Summary table: {}", summary.summary_path.display());
    if let Some(plot_path) = summary.plot_path.as_ref() {
        println!("Win probability plot: {}", plot_path.display());
    }
    if let Some(guard) = logging_guard.as_ref() {
        println!("Telemetry log: {}", guard.telemetry_path.display());
    }

    Ok(())
}
