use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use dirtree_core::model::total_count;
use dirtree_core::{
    AuditError, AuditRequest, BallotCount, CancellationToken, DirichletTree, ElectionError,
    ParameterError, PosteriorAuditSampler, TreeError, TreeParameters, evaluate_election,
};
use thiserror::Error;
use tracing::{Level, event};

use crate::ballots::{BallotFileError, CandidateSet, load_jsonl};
use crate::config::{AuditConfig, ResolvedOutputs};
use crate::report::{
    AuditReport, MarginalReport, ObservedReport, ParametersReport, ReportError,
    candidate_reports,
};

/// Primary entry point for running an audit from configuration.
pub struct AuditRunner {
    config: AuditConfig,
    outputs: ResolvedOutputs,
    candidates: CandidateSet,
    params: TreeParameters,
    observed: Vec<BallotCount>,
    cancel: CancellationToken,
}

/// Summary details returned after a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub elections: usize,
    pub ballots_total: u64,
    pub observed_ballots: u64,
    pub win_probabilities: Vec<(String, f64)>,
    pub json_path: PathBuf,
    pub summary_path: PathBuf,
    pub plot_path: Option<PathBuf>,
}

impl AuditRunner {
    /// Build a runner from a validated configuration. Ballots are loaded and
    /// resolved here so that bad input fails before any sampling.
    pub fn new(config: AuditConfig, outputs: ResolvedOutputs) -> Result<Self, RunnerError> {
        let candidates = CandidateSet::new(&config.election.candidates);
        let params = config.election.tree_parameters()?;

        let mut observed = candidates.resolve_all(&config.ballots.inline)?;
        if let Some(path) = config.resolved_ballots_path() {
            let rows = load_jsonl(&path)?;
            observed.extend(candidates.resolve_all(&rows)?);
        }

        let n_observed = total_count(&observed);
        if config.audit.ballots_total < n_observed {
            return Err(RunnerError::Audit(AuditError::InsufficientBallots {
                requested: config.audit.ballots_total,
                observed: n_observed,
            }));
        }

        Ok(Self {
            config,
            outputs,
            candidates,
            params,
            observed,
            cancel: CancellationToken::new(),
        })
    }

    /// Token that aborts a running audit when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn observed_ballots(&self) -> u64 {
        total_count(&self.observed)
    }

    pub fn run(&self) -> Result<RunSummary, RunnerError> {
        ensure_parent(self.outputs.json.parent())?;
        ensure_parent(self.outputs.summary_md.parent())?;

        let settings = &self.config.audit;
        let mut tree = DirichletTree::new(self.params.clone(), &self.config.election.seed);
        tree.update_all(&self.observed)?;

        let request = AuditRequest {
            n_elections: settings.elections,
            n_ballots: settings.ballots_total,
            n_winners: settings.winners,
            n_workers: settings.workers(),
            seed: settings.seed.clone(),
        };
        let start = Instant::now();
        let result = PosteriorAuditSampler::new(request.clone())
            .with_cancellation(self.cancel.clone())
            .run(&mut tree)?;
        event!(
            target: "dirtree_audit::runner",
            Level::INFO,
            run_id = %self.config.run_id,
            elections = request.n_elections,
            workers = request.n_workers,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "posterior simulation complete"
        );

        let order = match evaluate_election(
            &self.observed,
            self.candidates.len(),
            settings.winners,
            tree.engine_mut(),
        ) {
            Ok(outcome) => Some(
                outcome
                    .order()
                    .into_iter()
                    .map(|c| self.candidates.name(c).to_string())
                    .collect(),
            ),
            Err(ElectionError::NoBallots) => None,
            Err(err) => return Err(err.into()),
        };

        let predictive = tree
            .sample_ballots(settings.predictive_samples)?
            .iter()
            .map(|bc| self.candidates.named(bc))
            .collect();

        let mut marginals = Vec::new();
        if settings.marginal_samples > 0 {
            for bc in tree.observed() {
                let samples =
                    tree.marginal_probability_samples(&bc.ballot, settings.marginal_samples)?;
                marginals.push(MarginalReport::from_samples(
                    self.candidates.describe(&bc.ballot),
                    bc.count,
                    &samples,
                ));
            }
        }

        let report = AuditReport {
            run_id: self.config.run_id.clone(),
            parameters: ParametersReport {
                min_depth: self.params.min_depth(),
                max_depth: self.params.max_depth(),
                concentration: self.params.concentration(),
                vanilla_equivalent: self.params.vanilla_equivalent(),
                elections: request.n_elections,
                ballots_total: request.n_ballots,
                winners: request.n_winners,
                workers: request.n_workers,
            },
            observed: ObservedReport {
                ballots: tree.n_observed(),
                distinct: tree.observed().len(),
                order,
                dirichlet_reducible: tree.is_dirichlet_reducible(),
            },
            candidates: candidate_reports(&self.candidates, &result),
            predictive,
            marginals,
        };

        report.write_json(&self.outputs.json)?;
        report.write_markdown(&self.outputs.summary_md)?;
        let plot_path = match report.render_plot(&self.outputs.plots_dir) {
            Ok(path) => Some(path),
            Err(err) => {
                event!(
                    target: "dirtree_audit::runner",
                    Level::WARN,
                    error = %err,
                    "plot rendering skipped"
                );
                None
            }
        };

        Ok(RunSummary {
            elections: request.n_elections,
            ballots_total: request.n_ballots,
            observed_ballots: tree.n_observed(),
            win_probabilities: report
                .candidates
                .iter()
                .map(|c| (c.name.clone(), c.probability))
                .collect(),
            json_path: self.outputs.json.clone(),
            summary_path: self.outputs.summary_md.clone(),
            plot_path,
        })
    }
}

fn ensure_parent(path: Option<&Path>) -> Result<(), RunnerError> {
    if let Some(dir) = path.filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("invalid tree parameters: {0}")]
    Parameters(#[from] ParameterError),
    #[error("ballot input: {0}")]
    Ballots(#[from] BallotFileError),
    #[error("tree error: {0}")]
    Tree(#[from] TreeError),
    #[error("observed election: {0}")]
    Election(#[from] ElectionError),
    #[error("audit failed: {0}")]
    Audit(#[from] AuditError),
    #[error("report error: {0}")]
    Report(#[from] ReportError),
}
