//! Parallel posterior estimation of win probabilities.
//!
//! Per-batch seeds are drawn sequentially from the tree's default engine
//! before fan-out; afterwards each worker owns its engine and reads the tree
//! without locks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{Level, event};

use crate::irv::elimination_order;
use crate::model::Candidate;
use crate::random::engine_from_u64;
use crate::tree::{DirichletTree, TreeError};

/// What to estimate and how to split the work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRequest {
    /// Posterior elections to simulate.
    pub n_elections: usize,
    /// Ballots in each complete election, observed ones included.
    pub n_ballots: u64,
    /// Seats; a candidate wins when it is among the last `n_winners`
    /// eliminated.
    pub n_winners: usize,
    pub n_workers: usize,
    /// Re-seeds the tree's default engine before seeds are drawn.
    pub seed: Option<String>,
}

/// Cooperative cancellation shared between the caller and workers.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-candidate win tallies over the simulated elections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinProbabilities {
    /// Elections with at least one non-empty ballot; the denominator of
    /// every probability.
    pub n_elections: usize,
    pub n_winners: usize,
    pub win_counts: Vec<u64>,
    pub probabilities: Vec<f64>,
}

impl WinProbabilities {
    fn from_counts(win_counts: Vec<u64>, n_elections: usize, n_winners: usize) -> Self {
        let probabilities = win_counts
            .iter()
            .map(|&wins| wins as f64 / n_elections as f64)
            .collect();
        Self {
            n_elections,
            n_winners,
            win_counts,
            probabilities,
        }
    }

    pub fn probability(&self, candidate: Candidate) -> Option<f64> {
        self.probabilities.get(candidate).copied()
    }
}

struct BatchTally {
    wins: Vec<u64>,
    contested: usize,
}

#[derive(Debug, Clone, Copy)]
struct Batch {
    index: usize,
    seed: u64,
    n_elections: usize,
}

/// Splits `n_elections` into `n_workers` equal batches and a remainder batch,
/// each paired with its own seed. Zero-sized batches are dropped after the
/// seeds are assigned.
fn plan_batches<R: Rng + ?Sized>(n_elections: usize, n_workers: usize, rng: &mut R) -> Vec<Batch> {
    let seeds: Vec<u64> = (0..=n_workers).map(|_| rng.next_u64()).collect();
    let (batch_size, remainder) = if n_elections <= 1 {
        (0, n_elections)
    } else {
        (n_elections / n_workers, n_elections % n_workers)
    };
    seeds
        .into_iter()
        .enumerate()
        .map(|(index, seed)| Batch {
            index,
            seed,
            n_elections: if index < n_workers { batch_size } else { remainder },
        })
        .filter(|batch| batch.n_elections > 0)
        .collect()
}

/// Estimates each candidate's probability of winning once all
/// `n_ballots` are counted, given the ballots observed so far.
#[derive(Debug, Clone)]
pub struct PosteriorAuditSampler {
    request: AuditRequest,
    cancel: CancellationToken,
}

impl PosteriorAuditSampler {
    pub fn new(request: AuditRequest) -> Self {
        Self {
            request,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn validate(&self, tree: &DirichletTree) -> Result<(), AuditError> {
        let request = &self.request;
        let n_candidates = tree.n_candidates();
        if request.n_ballots < tree.n_observed() {
            return Err(AuditError::InsufficientBallots {
                requested: request.n_ballots,
                observed: tree.n_observed(),
            });
        }
        if request.n_winners == 0 || request.n_winners >= n_candidates {
            return Err(AuditError::InvalidWinnerCount {
                n_winners: request.n_winners,
                n_candidates,
            });
        }
        if request.n_workers == 0 {
            return Err(AuditError::NoWorkers);
        }
        if request.n_elections == 0 {
            return Err(AuditError::NoElections);
        }
        if request.n_ballots == 0 {
            return Err(AuditError::NoBallots);
        }
        Ok(())
    }

    /// Runs the simulation. Nothing is returned unless every batch completes.
    ///
    /// Simulated elections in which every ballot is empty have no winner and
    /// are left out of the tallies.
    pub fn run(&self, tree: &mut DirichletTree) -> Result<WinProbabilities, AuditError> {
        self.validate(tree)?;
        if let Some(seed) = &self.request.seed {
            tree.set_seed(seed);
        }
        let batches = plan_batches(
            self.request.n_elections,
            self.request.n_workers,
            tree.engine_mut(),
        );

        let start = Instant::now();
        let tree: &DirichletTree = tree;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.request.n_workers)
            .build()?;
        let batch_tallies = pool.install(|| {
            batches
                .into_par_iter()
                .map(|batch| self.run_batch(tree, batch))
                .collect::<Result<Vec<_>, _>>()
        })?;

        let mut win_counts = vec![0u64; tree.n_candidates()];
        let mut contested = 0usize;
        for tally in batch_tallies {
            contested += tally.contested;
            for (total, wins) in win_counts.iter_mut().zip(tally.wins) {
                *total += wins;
            }
        }
        if contested == 0 {
            return Err(AuditError::NoContestedElections);
        }

        let result = WinProbabilities::from_counts(win_counts, contested, self.request.n_winners);
        event!(
            target: "dirtree_core::audit",
            Level::INFO,
            n_elections = self.request.n_elections,
            contested,
            n_ballots = self.request.n_ballots,
            n_workers = self.request.n_workers,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "posterior audit finished"
        );
        Ok(result)
    }

    fn run_batch(&self, tree: &DirichletTree, batch: Batch) -> Result<BatchTally, AuditError> {
        let n_candidates = tree.n_candidates();
        let first_winner = n_candidates - self.request.n_winners;
        let mut rng = engine_from_u64(batch.seed);
        let mut tally = BatchTally {
            wins: vec![0u64; n_candidates],
            contested: 0,
        };
        for _ in 0..batch.n_elections {
            if self.cancel.is_cancelled() {
                return Err(AuditError::Cancelled);
            }
            let election = tree
                .posterior_set_with(self.request.n_ballots, &mut rng)?
                .ok_or(AuditError::InsufficientBallots {
                    requested: self.request.n_ballots,
                    observed: tree.n_observed(),
                })?;
            if election.iter().all(|bc| bc.ballot.is_empty()) {
                continue;
            }
            let order = elimination_order(&election, n_candidates, &mut rng);
            for &winner in &order[first_winner..] {
                tally.wins[winner] += 1;
            }
            tally.contested += 1;
        }
        event!(
            target: "dirtree_core::audit",
            Level::DEBUG,
            batch = batch.index,
            n_elections = batch.n_elections,
            contested = tally.contested,
            "batch finished"
        );
        Ok(tally)
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("requested {requested} ballots but {observed} were already observed")]
    InsufficientBallots { requested: u64, observed: u64 },
    #[error("winner count {n_winners} must lie in [1, {n_candidates})")]
    InvalidWinnerCount {
        n_winners: usize,
        n_candidates: usize,
    },
    #[error("at least one worker is required")]
    NoWorkers,
    #[error("at least one election is required")]
    NoElections,
    #[error("each election needs at least one ballot")]
    NoBallots,
    #[error("every simulated election consisted of empty ballots")]
    NoContestedElections,
    #[error("audit cancelled")]
    Cancelled,
    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Tree(#[from] TreeError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Ballot;
    use crate::tree::TreeParameters;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    fn request(n_elections: usize, n_ballots: u64, n_workers: usize) -> AuditRequest {
        AuditRequest {
            n_elections,
            n_ballots,
            n_winners: 1,
            n_workers,
            seed: None,
        }
    }

    fn observed_tree() -> DirichletTree {
        let params = TreeParameters::new(3, 0, 3, 1.0, false).unwrap();
        let mut tree = DirichletTree::new(params, "audit");
        tree.update(&Ballot::new(vec![0, 1, 2]), 30).unwrap();
        tree.update(&Ballot::new(vec![1, 2, 0]), 20).unwrap();
        tree.update(&Ballot::new(vec![2, 0, 1]), 10).unwrap();
        tree
    }

    #[test]
    fn batches_cover_every_election() {
        let mut rng = StdRng::seed_from_u64(0);
        let batches = plan_batches(10, 3, &mut rng);
        assert_eq!(batches.iter().map(|b| b.n_elections).sum::<usize>(), 10);
        assert_eq!(batches.len(), 4);
        assert_eq!(batches[3].n_elections, 1);

        let single = plan_batches(1, 4, &mut rng);
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].index, 4);
    }

    #[test]
    fn seeds_are_drawn_even_for_empty_batches() {
        let mut a = StdRng::seed_from_u64(3);
        let mut b = StdRng::seed_from_u64(3);
        plan_batches(4, 4, &mut a);
        plan_batches(1, 4, &mut b);
        assert_eq!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn probabilities_sum_to_winner_count() {
        let mut tree = observed_tree();
        let result = PosteriorAuditSampler::new(request(50, 100, 2))
            .run(&mut tree)
            .unwrap();
        let total: f64 = result.probabilities.iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert_eq!(result.win_counts.iter().sum::<u64>(), 50);
    }

    #[test]
    fn fully_observed_election_is_certain() {
        let mut tree = observed_tree();
        let result = PosteriorAuditSampler::new(request(20, 60, 3))
            .run(&mut tree)
            .unwrap();
        assert_eq!(result.probabilities, vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn same_seed_same_estimate() {
        let mut req = request(40, 200, 4);
        req.seed = Some("repeat".into());
        let a = PosteriorAuditSampler::new(req.clone())
            .run(&mut observed_tree())
            .unwrap();
        let b = PosteriorAuditSampler::new(req).run(&mut observed_tree()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_invalid_requests() {
        let mut tree = observed_tree();
        let run = |req: AuditRequest, tree: &mut DirichletTree| {
            PosteriorAuditSampler::new(req).run(tree).unwrap_err()
        };
        assert!(matches!(
            run(request(5, 59, 1), &mut tree),
            AuditError::InsufficientBallots {
                requested: 59,
                observed: 60
            }
        ));
        assert!(matches!(run(request(5, 60, 0), &mut tree), AuditError::NoWorkers));
        assert!(matches!(run(request(0, 60, 1), &mut tree), AuditError::NoElections));
        let mut req = request(5, 60, 1);
        req.n_winners = 3;
        assert!(matches!(
            run(req, &mut tree),
            AuditError::InvalidWinnerCount { .. }
        ));
    }

    #[test]
    fn zero_ballot_elections_are_rejected() {
        let params = TreeParameters::new(4, 0, 4, 1.0, false).unwrap();
        let mut tree = DirichletTree::new(params, "empty");
        let err = PosteriorAuditSampler::new(request(4000, 0, 2))
            .run(&mut tree)
            .unwrap_err();
        assert!(matches!(err, AuditError::NoBallots));
    }

    #[test]
    fn elections_of_empty_ballots_have_no_winner() {
        let params = TreeParameters::new(3, 0, 3, 1.0, false).unwrap();
        let mut tree = DirichletTree::new(params, "blank");
        tree.update(&Ballot::new(Vec::new()), 5).unwrap();
        let err = PosteriorAuditSampler::new(request(20, 5, 2))
            .run(&mut tree)
            .unwrap_err();
        assert!(matches!(err, AuditError::NoContestedElections));
    }

    #[test]
    fn empty_draws_leave_the_denominator() {
        // One unobserved ballot per election; with min_depth 0 some draws
        // stop at the root and come back empty.
        let params = TreeParameters::new(4, 0, 4, 1.0, false).unwrap();
        let mut tree = DirichletTree::new(params, "sparse");
        let result = PosteriorAuditSampler::new(request(400, 1, 2))
            .run(&mut tree)
            .unwrap();
        assert!(result.n_elections < 400);
        assert!(result.n_elections > 0);
        assert_eq!(
            result.win_counts.iter().sum::<u64>(),
            result.n_elections as u64
        );
        let total: f64 = result.probabilities.iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn cancelled_audit_returns_nothing() {
        let mut tree = observed_tree();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = PosteriorAuditSampler::new(request(10, 100, 2))
            .with_cancellation(cancel)
            .run(&mut tree)
            .unwrap_err();
        assert!(matches!(err, AuditError::Cancelled));
    }
}
