use rand::Rng;

use crate::model::{Ballot, BallotCount, Candidate};
use crate::random::{VariateError, beta, dirichlet_multinomial};

use super::params::TreeParameters;

/// One split of the Dirichlet-tree.
///
/// A node at depth `d` chooses among the `n - d` candidates not yet ranked
/// plus stopping the ballot. Child `i` corresponds to `path[d + i]` of the
/// permutation carried down by the caller, so a node never stores candidate
/// ids. Children are created only when a ballot passes through them.
#[derive(Debug, Clone)]
pub(crate) struct DirichletTreeNode {
    depth: usize,
    /// Observed counts per outcome, the terminal outcome last.
    counts: Vec<f64>,
    children: Vec<Option<Box<DirichletTreeNode>>>,
}

impl DirichletTreeNode {
    pub(crate) fn new(depth: usize, n_candidates: usize) -> Self {
        let n_children = n_candidates - depth;
        Self {
            depth,
            counts: vec![0.0; n_children + 1],
            children: vec![None; n_children],
        }
    }

    fn n_children(&self) -> usize {
        self.children.len()
    }

    /// Adds `count` observations of `ballot` along its path.
    ///
    /// `path` must hold the permutation reaching this node. Ballots of length
    /// `n - 1` and `n` record identically since the last choice is forced.
    pub(crate) fn update(&mut self, ballot: &[Candidate], path: &mut [Candidate], count: u64) {
        let depth = self.depth;
        if depth == ballot.len() {
            let terminal = self.n_children();
            self.counts[terminal] += count as f64;
            return;
        }

        let Some(offset) = path[depth..].iter().position(|&c| c == ballot[depth]) else {
            return;
        };
        self.counts[offset] += count as f64;
        if self.n_children() <= 2 {
            return;
        }

        let n_candidates = path.len();
        let child = self.children[offset]
            .get_or_insert_with(|| Box::new(DirichletTreeNode::new(depth + 1, n_candidates)));
        path.swap(depth, depth + offset);
        child.update(ballot, path, count);
        path.swap(depth, depth + offset);
    }

    fn child(&self, offset: usize) -> Option<&DirichletTreeNode> {
        self.children.get(offset).and_then(|c| c.as_deref())
    }
}

/// Prior plus observed parameters for the split at `depth`, terminal last
/// when stopping is allowed. `node` is `None` below the observed part of the
/// tree, where only the prior applies.
fn posterior_alphas(
    node: Option<&DirichletTreeNode>,
    depth: usize,
    params: &TreeParameters,
) -> Vec<f64> {
    let mut alphas = params.prior_alphas(depth);
    if let Some(node) = node {
        let n_children = node.n_children();
        for (alpha, observed) in alphas.iter_mut().zip(&node.counts[..n_children]) {
            *alpha += observed;
        }
        if params.allows_termination(depth) {
            alphas[n_children] += node.counts[n_children];
        }
    }
    alphas
}

/// Distributes `count` ballots below `node` and appends the resulting
/// ballots to `out`.
///
/// Unobserved subtrees are sampled from the prior without being
/// materialized.
pub(crate) fn sample_ballots<R: Rng + ?Sized>(
    node: Option<&DirichletTreeNode>,
    depth: usize,
    count: u64,
    path: &mut Vec<Candidate>,
    params: &TreeParameters,
    out: &mut Vec<BallotCount>,
    rng: &mut R,
) -> Result<(), VariateError> {
    if count == 0 {
        return Ok(());
    }
    let n_candidates = params.n_candidates();
    if depth + 1 == n_candidates {
        out.push(BallotCount::new(path.clone(), count));
        return Ok(());
    }
    if depth == params.max_depth() {
        out.push(BallotCount::new(path[..depth].to_vec(), count));
        return Ok(());
    }

    let alphas = posterior_alphas(node, depth, params);
    let draws = dirichlet_multinomial(count, &alphas, rng)?;
    let n_children = params.n_children(depth);
    if params.allows_termination(depth) && draws[n_children] > 0 {
        out.push(BallotCount::new(path[..depth].to_vec(), draws[n_children]));
    }

    for (offset, &drawn) in draws[..n_children].iter().enumerate() {
        if drawn == 0 {
            continue;
        }
        let child = node.and_then(|n| n.child(offset));
        path.swap(depth, depth + offset);
        let result = sample_ballots(child, depth + 1, drawn, path, params, out, rng);
        path.swap(depth, depth + offset);
        result?;
    }
    Ok(())
}

/// One draw of the probability the tree assigns to `ballot`.
///
/// The value is a product of Beta draws along the ballot's path, so repeated
/// calls differ. Ballots outside the depth bounds get zero.
pub(crate) fn marginal_probability<R: Rng + ?Sized>(
    root: Option<&DirichletTreeNode>,
    ballot: &Ballot,
    params: &TreeParameters,
    rng: &mut R,
) -> Result<f64, VariateError> {
    let n_candidates = params.n_candidates();
    let complete = ballot.len() + 1 >= n_candidates;
    let length = ballot.len().min(n_candidates - 1);
    if !complete && (length < params.min_depth() || length > params.max_depth()) {
        return Ok(0.0);
    }
    if complete && params.max_depth() + 1 < n_candidates {
        return Ok(0.0);
    }

    let preferences = ballot.preferences();
    let mut path = params.default_path();
    let mut node = root;
    let mut probability = 1.0;
    for depth in 0..=length {
        if depth == params.leaf_depth() {
            break;
        }
        let alphas = posterior_alphas(node, depth, params);
        let total: f64 = alphas.iter().sum();
        let offset = if depth == length {
            params.n_children(depth)
        } else {
            match path[depth..].iter().position(|&c| c == preferences[depth]) {
                Some(offset) => offset,
                None => return Ok(0.0),
            }
        };
        let chosen = alphas[offset];
        probability *= beta(chosen, total - chosen, rng)?;
        if depth == length {
            break;
        }
        node = node.and_then(|n| n.child(offset));
        path.swap(depth, depth + offset);
    }
    Ok(probability)
}
