use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Index of a candidate in `[0, n_candidates)`.
pub type Candidate = usize;

/// A ranking of distinct candidates, most preferred first. May be partial.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ballot {
    preferences: Vec<Candidate>,
}

impl Ballot {
    /// Builds a ballot without checking it against a candidate count.
    pub fn new(preferences: Vec<Candidate>) -> Self {
        Self { preferences }
    }

    /// Builds a ballot, rejecting out-of-range or repeated candidates.
    pub fn validated(
        preferences: Vec<Candidate>,
        n_candidates: usize,
    ) -> Result<Self, BallotError> {
        let ballot = Self::new(preferences);
        ballot.validate(n_candidates)?;
        Ok(ballot)
    }

    /// Checks every preference is in range and appears once.
    pub fn validate(&self, n_candidates: usize) -> Result<(), BallotError> {
        let mut seen = vec![false; n_candidates];
        for &candidate in &self.preferences {
            let slot = seen
                .get_mut(candidate)
                .ok_or(BallotError::CandidateOutOfRange {
                    candidate,
                    n_candidates,
                })?;
            if *slot {
                return Err(BallotError::DuplicateCandidate { candidate });
            }
            *slot = true;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.preferences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.preferences.is_empty()
    }

    pub fn preferences(&self) -> &[Candidate] {
        &self.preferences
    }

    pub fn first_preference(&self) -> Option<Candidate> {
        self.preferences.first().copied()
    }

    /// Drops the current first preference. Returns `true` once the ballot is
    /// exhausted.
    pub fn eliminate_first_preference(&mut self) -> bool {
        if !self.preferences.is_empty() {
            self.preferences.remove(0);
        }
        self.preferences.is_empty()
    }
}

impl From<Vec<Candidate>> for Ballot {
    fn from(preferences: Vec<Candidate>) -> Self {
        Self::new(preferences)
    }
}

impl fmt::Display for Ballot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for candidate in &self.preferences {
            if !first {
                write!(f, ">")?;
            }
            write!(f, "{candidate}")?;
            first = false;
        }
        Ok(())
    }
}

/// A ballot together with how many times it was cast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotCount {
    pub ballot: Ballot,
    pub count: u64,
}

impl BallotCount {
    pub fn new(ballot: impl Into<Ballot>, count: u64) -> Self {
        Self {
            ballot: ballot.into(),
            count,
        }
    }

    /// Validates the ballot and requires a positive count.
    pub fn validate(&self, n_candidates: usize) -> Result<(), BallotError> {
        if self.count == 0 {
            return Err(BallotError::ZeroCount);
        }
        self.ballot.validate(n_candidates)
    }
}

/// Total weight of a collection of weighted ballots.
pub fn total_count(ballots: &[BallotCount]) -> u64 {
    ballots.iter().map(|bc| bc.count).sum()
}

/// Problems with a single ballot presented for ingestion or tabulation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BallotError {
    #[error("candidate {candidate} is out of range for {n_candidates} candidates")]
    CandidateOutOfRange {
        candidate: Candidate,
        n_candidates: usize,
    },
    #[error("candidate {candidate} appears more than once")]
    DuplicateCandidate { candidate: Candidate },
    #[error("ballot count must be positive")]
    ZeroCount,
}
