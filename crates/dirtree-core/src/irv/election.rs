use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{BallotCount, BallotError, Candidate};

use super::tabulation::elimination_order;

/// Result of one instant-runoff count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionOutcome {
    /// Candidates that lost, first eliminated first.
    pub elimination_order: Vec<Candidate>,
    /// The last `n_winners` candidates standing, in the order they would have
    /// been eliminated; the overall winner is last.
    pub winners: Vec<Candidate>,
}

impl ElectionOutcome {
    /// The full elimination order, winners included.
    pub fn order(&self) -> Vec<Candidate> {
        let mut order = self.elimination_order.clone();
        order.extend_from_slice(&self.winners);
        order
    }

    pub fn winner(&self) -> Option<Candidate> {
        self.winners.last().copied()
    }
}

/// Validates `ballots` and counts them by instant-runoff.
pub fn evaluate_election<R: Rng + ?Sized>(
    ballots: &[BallotCount],
    n_candidates: usize,
    n_winners: usize,
    rng: &mut R,
) -> Result<ElectionOutcome, ElectionError> {
    if n_winners == 0 || n_winners >= n_candidates {
        return Err(ElectionError::InvalidWinnerCount {
            n_winners,
            n_candidates,
        });
    }
    for bc in ballots {
        bc.validate(n_candidates)?;
    }
    if ballots.iter().all(|bc| bc.ballot.is_empty()) {
        return Err(ElectionError::NoBallots);
    }

    let mut order = elimination_order(ballots, n_candidates, rng);
    let winners = order.split_off(n_candidates - n_winners);
    Ok(ElectionOutcome {
        elimination_order: order,
        winners,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ElectionError {
    #[error("election has no non-empty ballots")]
    NoBallots,
    #[error("winner count {n_winners} must lie in [1, {n_candidates})")]
    InvalidWinnerCount {
        n_winners: usize,
        n_candidates: usize,
    },
    #[error(transparent)]
    Ballot(#[from] BallotError),
}
