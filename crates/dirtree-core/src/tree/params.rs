use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Candidate;

/// Shape and prior of a Dirichlet-tree over rankings.
///
/// The candidate count is fixed at construction. Depth bounds, the
/// concentration `a0` and the vanilla-Dirichlet flag may change later; every
/// setter validates before mutating. Deserialized values go through the same
/// checks as [`TreeParameters::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTreeParameters")]
pub struct TreeParameters {
    n_candidates: usize,
    min_depth: usize,
    max_depth: usize,
    concentration: f64,
    vanilla_equivalent: bool,
    /// `leaf_counts[d]` is the number of distinct ballots reachable from a
    /// node at depth `d`.
    #[serde(skip)]
    leaf_counts: Vec<f64>,
}

/// Serialized form; derived state is rebuilt on conversion.
#[derive(Deserialize)]
struct RawTreeParameters {
    n_candidates: usize,
    min_depth: usize,
    max_depth: usize,
    concentration: f64,
    #[serde(default)]
    vanilla_equivalent: bool,
}

impl TryFrom<RawTreeParameters> for TreeParameters {
    type Error = ParameterError;

    fn try_from(raw: RawTreeParameters) -> Result<Self, Self::Error> {
        Self::new(
            raw.n_candidates,
            raw.min_depth,
            raw.max_depth,
            raw.concentration,
            raw.vanilla_equivalent,
        )
    }
}

impl TreeParameters {
    pub fn new(
        n_candidates: usize,
        min_depth: usize,
        max_depth: usize,
        concentration: f64,
        vanilla_equivalent: bool,
    ) -> Result<Self, ParameterError> {
        if n_candidates < 2 {
            return Err(ParameterError::TooFewCandidates {
                found: n_candidates,
            });
        }
        validate_depths(n_candidates, min_depth, max_depth)?;
        validate_concentration(concentration)?;

        let mut params = Self {
            n_candidates,
            min_depth,
            max_depth,
            concentration,
            vanilla_equivalent,
            leaf_counts: Vec::new(),
        };
        params.recompute_leaf_counts();
        Ok(params)
    }

    /// Parameters accepting any ballot length, up to complete rankings.
    pub fn complete(n_candidates: usize, concentration: f64) -> Result<Self, ParameterError> {
        Self::new(n_candidates, 0, n_candidates, concentration, false)
    }

    pub fn n_candidates(&self) -> usize {
        self.n_candidates
    }

    pub fn min_depth(&self) -> usize {
        self.min_depth
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn concentration(&self) -> f64 {
        self.concentration
    }

    pub fn vanilla_equivalent(&self) -> bool {
        self.vanilla_equivalent
    }

    pub fn set_min_depth(&mut self, min_depth: usize) -> Result<(), ParameterError> {
        validate_depths(self.n_candidates, min_depth, self.max_depth)?;
        self.min_depth = min_depth;
        self.recompute_leaf_counts();
        Ok(())
    }

    pub fn set_max_depth(&mut self, max_depth: usize) -> Result<(), ParameterError> {
        validate_depths(self.n_candidates, self.min_depth, max_depth)?;
        self.max_depth = max_depth;
        self.recompute_leaf_counts();
        Ok(())
    }

    pub fn set_concentration(&mut self, concentration: f64) -> Result<(), ParameterError> {
        validate_concentration(concentration)?;
        self.concentration = concentration;
        Ok(())
    }

    pub fn set_vanilla_equivalent(&mut self, vanilla_equivalent: bool) {
        self.vanilla_equivalent = vanilla_equivalent;
    }

    /// The identity permutation `[0, 1, .., n-1]` every traversal starts from.
    pub fn default_path(&self) -> Vec<Candidate> {
        (0..self.n_candidates).collect()
    }

    /// Depth at which sampling stops splitting.
    ///
    /// Either `max_depth` truncates the ballot, or only one candidate is left
    /// and the ranking is complete.
    pub fn leaf_depth(&self) -> usize {
        self.max_depth.min(self.n_candidates - 1)
    }

    /// Remaining candidates to choose from at `depth`.
    pub fn n_children(&self, depth: usize) -> usize {
        self.n_candidates - depth
    }

    /// Whether a ballot may stop at `depth`.
    pub fn allows_termination(&self, depth: usize) -> bool {
        depth >= self.min_depth
    }

    /// Outcomes of a split at `depth`: one per remaining candidate, plus the
    /// terminal outcome when stopping is allowed.
    pub fn n_outcomes(&self, depth: usize) -> usize {
        self.n_children(depth) + usize::from(self.allows_termination(depth))
    }

    /// Multiplier applied to `a0` on a branch leaving a node at `depth`.
    ///
    /// Equals the number of ballots below that branch, which is what makes the
    /// tree collapse to a flat Dirichlet over ballots.
    pub fn depth_factor(&self, depth: usize) -> f64 {
        self.leaf_counts.get(depth + 1).copied().unwrap_or(1.0)
    }

    /// Prior concentration on the branch choosing a further candidate.
    pub fn branch_prior(&self, depth: usize) -> f64 {
        if self.vanilla_equivalent {
            self.concentration * self.depth_factor(depth)
        } else {
            self.concentration
        }
    }

    /// Prior concentration on stopping the ballot.
    ///
    /// Stays `a0` under `vanilla_equivalent`: the terminal outcome is a
    /// single ballot, so its factor is 1. This deliberately differs from
    /// scaling every outcome by the depth factor, which would not reduce to a
    /// flat Dirichlet when ballots may stop early.
    pub fn terminal_prior(&self) -> f64 {
        self.concentration
    }

    /// Prior parameters for every outcome of a split at `depth`, terminal last.
    pub fn prior_alphas(&self, depth: usize) -> Vec<f64> {
        let mut alphas = vec![self.branch_prior(depth); self.n_children(depth)];
        if self.allows_termination(depth) {
            alphas.push(self.terminal_prior());
        }
        alphas
    }

    fn recompute_leaf_counts(&mut self) {
        let leaf_depth = self.leaf_depth();
        let mut counts = vec![1.0; leaf_depth + 1];
        for depth in (0..leaf_depth).rev() {
            let terminal = if self.allows_termination(depth) { 1.0 } else { 0.0 };
            counts[depth] = terminal + self.n_children(depth) as f64 * counts[depth + 1];
        }
        self.leaf_counts = counts;
    }
}

fn validate_depths(
    n_candidates: usize,
    min_depth: usize,
    max_depth: usize,
) -> Result<(), ParameterError> {
    if min_depth > max_depth {
        return Err(ParameterError::DepthOrder {
            min_depth,
            max_depth,
        });
    }
    if max_depth > n_candidates {
        return Err(ParameterError::MaxDepthExceedsCandidates {
            max_depth,
            n_candidates,
        });
    }
    Ok(())
}

fn validate_concentration(concentration: f64) -> Result<(), ParameterError> {
    if concentration.is_finite() && concentration > 0.0 {
        Ok(())
    } else {
        Err(ParameterError::InvalidConcentration { concentration })
    }
}

/// Rejected tree configurations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("at least two candidates are required, found {found}")]
    TooFewCandidates { found: usize },
    #[error("min_depth {min_depth} exceeds max_depth {max_depth}")]
    DepthOrder { min_depth: usize, max_depth: usize },
    #[error("max_depth {max_depth} exceeds the {n_candidates} candidates")]
    MaxDepthExceedsCandidates {
        max_depth: usize,
        n_candidates: usize,
    },
    #[error("concentration must be positive and finite, got {concentration}")]
    InvalidConcentration { concentration: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_depths() {
        assert_eq!(
            TreeParameters::new(4, 3, 2, 1.0, false),
            Err(ParameterError::DepthOrder {
                min_depth: 3,
                max_depth: 2
            })
        );
        assert!(matches!(
            TreeParameters::new(4, 0, 5, 1.0, false),
            Err(ParameterError::MaxDepthExceedsCandidates { .. })
        ));
        assert!(matches!(
            TreeParameters::new(1, 0, 1, 1.0, false),
            Err(ParameterError::TooFewCandidates { found: 1 })
        ));
        assert!(matches!(
            TreeParameters::new(3, 0, 3, 0.0, false),
            Err(ParameterError::InvalidConcentration { .. })
        ));
    }

    #[test]
    fn failed_setter_leaves_parameters_untouched() {
        let mut params = TreeParameters::new(5, 1, 3, 1.0, true).unwrap();
        let before = params.clone();
        assert!(params.set_min_depth(4).is_err());
        assert!(params.set_max_depth(0).is_err());
        assert!(params.set_concentration(-2.0).is_err());
        assert_eq!(params, before);
        assert_eq!(params.depth_factor(0), before.depth_factor(0));
    }

    #[test]
    fn leaf_counts_enumerate_every_ballot() {
        // Three candidates, any length: the empty ballot, three singletons and
        // six complete rankings.
        let params = TreeParameters::new(3, 0, 3, 1.0, true).unwrap();
        assert_eq!(params.leaf_depth(), 2);
        assert_eq!(params.depth_factor(0), 3.0);
        assert_eq!(params.depth_factor(1), 1.0);
        let total = params.terminal_prior()
            + params.n_children(0) as f64 * params.branch_prior(0);
        assert_eq!(total, 10.0);
    }

    #[test]
    fn complete_rankings_only() {
        let params = TreeParameters::new(4, 4, 4, 2.0, true).unwrap();
        assert_eq!(params.n_outcomes(0), 4);
        assert_eq!(params.n_outcomes(2), 2);
        // 3! complete rankings follow each first preference.
        assert_eq!(params.branch_prior(0), 12.0);
        assert_eq!(params.branch_prior(1), 4.0);
        assert_eq!(params.branch_prior(2), 2.0);
    }

    #[test]
    fn changing_depths_recomputes_factors() {
        let mut params = TreeParameters::new(4, 4, 4, 1.0, true).unwrap();
        assert_eq!(params.depth_factor(0), 6.0);
        params.set_min_depth(0).unwrap();
        params.set_max_depth(1).unwrap();
        assert_eq!(params.leaf_depth(), 1);
        assert_eq!(params.depth_factor(0), 1.0);
    }

    #[test]
    fn deserialized_parameters_rebuild_factors() {
        let params = TreeParameters::new(4, 4, 4, 1.0, true).unwrap();
        let json = serde_json::to_string(&params).unwrap();
        assert!(!json.contains("leaf_counts"));
        let back: TreeParameters = serde_json::from_str(&json).unwrap();
        assert_eq!(back.branch_prior(0), 6.0);
        assert_eq!(back, params);
    }

    #[test]
    fn deserialization_validates_depths() {
        let inverted = r#"{"n_candidates":4,"min_depth":3,"max_depth":2,"concentration":1.0}"#;
        assert!(serde_json::from_str::<TreeParameters>(inverted).is_err());
        let too_deep = r#"{"n_candidates":3,"min_depth":0,"max_depth":4,"concentration":1.0}"#;
        assert!(serde_json::from_str::<TreeParameters>(too_deep).is_err());
    }

    #[test]
    fn plain_prior_ignores_factors() {
        let params = TreeParameters::new(4, 0, 4, 0.5, false).unwrap();
        assert_eq!(params.prior_alphas(0), vec![0.5; 5]);
        assert_eq!(params.prior_alphas(2), vec![0.5; 3]);
    }
}
