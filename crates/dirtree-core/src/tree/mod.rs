//! Dirichlet-tree posterior over ranked ballots.
//!
//! `DirichletTree` owns the root node, the parameters, the record of observed
//! ballots and a default engine. Every sampling operation has a `_with`
//! variant taking a caller-owned engine; those borrow the tree immutably and
//! may run concurrently from several threads.

mod node;
mod params;

use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use thiserror::Error;
use tracing::{Level, event};

use crate::model::{Ballot, BallotCount, BallotError};
use crate::random::{DEFAULT_SEED, Engine, VariateError, seeded_engine};

use node::DirichletTreeNode;
pub use params::{ParameterError, TreeParameters};

/// Observed state shared by every sampling call.
#[derive(Debug, Clone)]
struct Posterior {
    params: TreeParameters,
    root: DirichletTreeNode,
    observed: BTreeMap<Ballot, u64>,
    n_observed: u64,
    /// Lengths of observed ballots, with near-complete ballots counted as
    /// complete.
    observed_depths: BTreeSet<usize>,
}

impl Posterior {
    fn new(params: TreeParameters) -> Self {
        let root = DirichletTreeNode::new(0, params.n_candidates());
        Self {
            params,
            root,
            observed: BTreeMap::new(),
            n_observed: 0,
            observed_depths: BTreeSet::new(),
        }
    }

    fn effective_depth(&self, ballot: &Ballot) -> usize {
        let n = self.params.n_candidates();
        if ballot.len() + 1 >= n { n } else { ballot.len() }
    }

    /// Whether a ballot of effective length `depth` stops before `min_depth`.
    /// Empty ballots carry no preference and never count.
    fn is_short(&self, depth: usize) -> bool {
        depth > 0 && depth < self.params.min_depth()
    }

    fn shortest_below_min(&self) -> Option<usize> {
        self.observed_depths
            .iter()
            .copied()
            .find(|&depth| self.is_short(depth))
    }

    fn record(&mut self, ballot: &Ballot, count: u64) {
        let mut path = self.params.default_path();
        self.root.update(ballot.preferences(), &mut path, count);
        let depth = self.effective_depth(ballot);
        self.observed_depths.insert(depth);
        *self.observed.entry(ballot.clone()).or_insert(0) += count;
        self.n_observed += count;
    }

    fn sample_ballots<R: Rng + ?Sized>(
        &self,
        n_ballots: u64,
        rng: &mut R,
    ) -> Result<Vec<BallotCount>, VariateError> {
        let mut out = Vec::new();
        let mut path = self.params.default_path();
        node::sample_ballots(
            Some(&self.root),
            0,
            n_ballots,
            &mut path,
            &self.params,
            &mut out,
            rng,
        )?;
        Ok(out)
    }

    fn observed_ballots(&self) -> Vec<BallotCount> {
        self.observed
            .iter()
            .map(|(ballot, &count)| BallotCount::new(ballot.clone(), count))
            .collect()
    }

    fn posterior_set<R: Rng + ?Sized>(
        &self,
        n_total: u64,
        rng: &mut R,
    ) -> Result<Option<Vec<BallotCount>>, VariateError> {
        let Some(remaining) = n_total.checked_sub(self.n_observed) else {
            return Ok(None);
        };
        let mut set = self.observed_ballots();
        set.extend(self.sample_ballots(remaining, rng)?);
        Ok(Some(set))
    }
}

/// A Dirichlet-tree posterior over rankings of `n_candidates` candidates.
#[derive(Debug, Clone)]
pub struct DirichletTree {
    posterior: Posterior,
    engine: Engine,
}

impl DirichletTree {
    /// Builds an empty tree whose default engine is seeded from `seed`.
    pub fn new(params: TreeParameters, seed: &str) -> Self {
        Self {
            posterior: Posterior::new(params),
            engine: seeded_engine(seed),
        }
    }

    /// Builds an empty tree seeded with [`DEFAULT_SEED`].
    pub fn with_default_seed(params: TreeParameters) -> Self {
        Self::new(params, DEFAULT_SEED)
    }

    pub fn parameters(&self) -> &TreeParameters {
        &self.posterior.params
    }

    pub fn n_candidates(&self) -> usize {
        self.posterior.params.n_candidates()
    }

    /// Total weight passed to `update` since construction or the last reset.
    pub fn n_observed(&self) -> u64 {
        self.posterior.n_observed
    }

    /// Distinct observed ballots with their accumulated counts, in ballot
    /// order.
    pub fn observed(&self) -> Vec<BallotCount> {
        self.posterior.observed_ballots()
    }

    /// Re-seeds the default engine.
    pub fn set_seed(&mut self, seed: &str) {
        self.engine = seeded_engine(seed);
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Drops every observation. Parameters and the engine are kept.
    pub fn reset(&mut self) {
        let params = self.posterior.params.clone();
        self.posterior = Posterior::new(params);
    }

    /// Records `count` observations of `ballot`.
    ///
    /// Invalid ballots are rejected before anything changes.
    pub fn update(&mut self, ballot: &Ballot, count: u64) -> Result<(), TreeError> {
        if count == 0 {
            return Err(BallotError::ZeroCount.into());
        }
        ballot.validate(self.n_candidates())?;
        self.warn_if_short(ballot);
        self.posterior.record(ballot, count);
        Ok(())
    }

    /// Records a batch of weighted ballots. The whole batch is validated
    /// first, so a bad entry leaves the tree untouched.
    pub fn update_all(&mut self, ballots: &[BallotCount]) -> Result<(), TreeError> {
        let n_candidates = self.n_candidates();
        for bc in ballots {
            bc.validate(n_candidates)?;
        }
        for bc in ballots {
            self.warn_if_short(&bc.ballot);
            self.posterior.record(&bc.ballot, bc.count);
        }
        Ok(())
    }

    fn warn_if_short(&self, ballot: &Ballot) {
        let params = &self.posterior.params;
        let depth = self.posterior.effective_depth(ballot);
        if params.vanilla_equivalent() && self.posterior.is_short(depth) {
            event!(
                target: "dirtree_core::tree",
                Level::WARN,
                ballot = %ballot,
                min_depth = params.min_depth(),
                "observed ballot shorter than min_depth; tree is no longer Dirichlet-reducible"
            );
        }
    }

    /// `false` once any non-empty observed ballot is shorter than
    /// `min_depth`.
    pub fn is_dirichlet_reducible(&self) -> bool {
        self.posterior.shortest_below_min().is_none()
    }

    pub fn set_min_depth(&mut self, min_depth: usize) -> Result<(), TreeError> {
        self.posterior.params.set_min_depth(min_depth)?;
        self.warn_if_not_reducible();
        Ok(())
    }

    pub fn set_max_depth(&mut self, max_depth: usize) -> Result<(), TreeError> {
        self.posterior.params.set_max_depth(max_depth)?;
        Ok(())
    }

    pub fn set_concentration(&mut self, concentration: f64) -> Result<(), TreeError> {
        self.posterior.params.set_concentration(concentration)?;
        Ok(())
    }

    pub fn set_vanilla_equivalent(&mut self, vanilla_equivalent: bool) {
        self.posterior.params.set_vanilla_equivalent(vanilla_equivalent);
        self.warn_if_not_reducible();
    }

    fn warn_if_not_reducible(&self) {
        if self.posterior.params.vanilla_equivalent() && !self.is_dirichlet_reducible() {
            event!(
                target: "dirtree_core::tree",
                Level::WARN,
                min_depth = self.posterior.params.min_depth(),
                shortest_observed = ?self.posterior.shortest_below_min(),
                "observed ballots shorter than min_depth; tree is no longer Dirichlet-reducible"
            );
        }
    }

    /// Draws `n_ballots` from the posterior predictive using the default
    /// engine.
    pub fn sample_ballots(&mut self, n_ballots: u64) -> Result<Vec<BallotCount>, TreeError> {
        Ok(self.posterior.sample_ballots(n_ballots, &mut self.engine)?)
    }

    pub fn sample_ballots_with<R: Rng + ?Sized>(
        &self,
        n_ballots: u64,
        rng: &mut R,
    ) -> Result<Vec<BallotCount>, TreeError> {
        Ok(self.posterior.sample_ballots(n_ballots, rng)?)
    }

    /// Draws `n_elections` independent elections of `n_ballots` each.
    pub fn sample(
        &mut self,
        n_elections: usize,
        n_ballots: u64,
    ) -> Result<Vec<Vec<BallotCount>>, TreeError> {
        let Self { posterior, engine } = self;
        (0..n_elections)
            .map(|_| posterior.sample_ballots(n_ballots, engine).map_err(TreeError::from))
            .collect()
    }

    pub fn sample_with<R: Rng + ?Sized>(
        &self,
        n_elections: usize,
        n_ballots: u64,
        rng: &mut R,
    ) -> Result<Vec<Vec<BallotCount>>, TreeError> {
        (0..n_elections)
            .map(|_| self.sample_ballots_with(n_ballots, rng))
            .collect()
    }

    /// Completes the observed ballots to `n_total` with posterior draws.
    ///
    /// Returns `None` when fewer ballots are requested than were observed.
    pub fn posterior_set_with<R: Rng + ?Sized>(
        &self,
        n_total: u64,
        rng: &mut R,
    ) -> Result<Option<Vec<BallotCount>>, TreeError> {
        Ok(self.posterior.posterior_set(n_total, rng)?)
    }

    /// `n_sets` complete hypothetical elections of `n_total` ballots.
    ///
    /// Empty when `n_total` is below the observed count.
    pub fn posterior_sets(
        &mut self,
        n_sets: usize,
        n_total: u64,
    ) -> Result<Vec<Vec<BallotCount>>, TreeError> {
        let Self { posterior, engine } = self;
        posterior_sets(posterior, n_sets, n_total, engine)
    }

    pub fn posterior_sets_with<R: Rng + ?Sized>(
        &self,
        n_sets: usize,
        n_total: u64,
        rng: &mut R,
    ) -> Result<Vec<Vec<BallotCount>>, TreeError> {
        posterior_sets(&self.posterior, n_sets, n_total, rng)
    }

    /// A single stochastic estimate of the probability of `ballot`.
    ///
    /// Successive calls return different values; average
    /// [`marginal_probability_samples`](Self::marginal_probability_samples)
    /// for a lower-variance estimate.
    pub fn marginal_probability(&mut self, ballot: &Ballot) -> Result<f64, TreeError> {
        let Self { posterior, engine } = self;
        marginal_probability(posterior, ballot, engine)
    }

    pub fn marginal_probability_with<R: Rng + ?Sized>(
        &self,
        ballot: &Ballot,
        rng: &mut R,
    ) -> Result<f64, TreeError> {
        marginal_probability(&self.posterior, ballot, rng)
    }

    /// `n_samples` independent marginal-probability draws from the default
    /// engine.
    pub fn marginal_probability_samples(
        &mut self,
        ballot: &Ballot,
        n_samples: usize,
    ) -> Result<Vec<f64>, TreeError> {
        let Self { posterior, engine } = self;
        (0..n_samples)
            .map(|_| marginal_probability(posterior, ballot, engine))
            .collect()
    }
}

fn posterior_sets<R: Rng + ?Sized>(
    posterior: &Posterior,
    n_sets: usize,
    n_total: u64,
    rng: &mut R,
) -> Result<Vec<Vec<BallotCount>>, TreeError> {
    if n_total < posterior.n_observed {
        return Ok(Vec::new());
    }
    let mut sets = Vec::with_capacity(n_sets);
    for _ in 0..n_sets {
        if let Some(set) = posterior.posterior_set(n_total, rng)? {
            sets.push(set);
        }
    }
    Ok(sets)
}

fn marginal_probability<R: Rng + ?Sized>(
    posterior: &Posterior,
    ballot: &Ballot,
    rng: &mut R,
) -> Result<f64, TreeError> {
    ballot.validate(posterior.params.n_candidates())?;
    Ok(node::marginal_probability(
        Some(&posterior.root),
        ballot,
        &posterior.params,
        rng,
    )?)
}

#[derive(Debug, Error)]
pub enum TreeError {
    #[error(transparent)]
    Ballot(#[from] BallotError),
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    #[error("variate draw failed: {0}")]
    Variate(#[from] VariateError),
}
