use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use dirtree_core::{Ballot, BallotCount, BallotError, Candidate};
use thiserror::Error;

use crate::config::NamedBallot;

/// Maps candidate names to the indices the tree works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSet {
    names: Vec<String>,
    index: HashMap<String, Candidate>,
}

impl CandidateSet {
    pub fn new(names: &[String]) -> Self {
        let index = names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect();
        Self {
            names: names.to_vec(),
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, candidate: Candidate) -> &str {
        self.names.get(candidate).map(String::as_str).unwrap_or("?")
    }

    pub fn resolve(&self, named: &NamedBallot) -> Result<BallotCount, BallotFileError> {
        let preferences = named
            .preferences
            .iter()
            .map(|name| {
                self.index
                    .get(name)
                    .copied()
                    .ok_or_else(|| BallotFileError::UnknownCandidate { name: name.clone() })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let ballot = BallotCount::new(preferences, named.count);
        ballot.validate(self.len())?;
        Ok(ballot)
    }

    pub fn resolve_all(&self, named: &[NamedBallot]) -> Result<Vec<BallotCount>, BallotFileError> {
        named.iter().map(|b| self.resolve(b)).collect()
    }

    pub fn describe(&self, ballot: &Ballot) -> Vec<String> {
        ballot
            .preferences()
            .iter()
            .map(|&c| self.name(c).to_string())
            .collect()
    }

    pub fn named(&self, ballot: &BallotCount) -> NamedBallot {
        NamedBallot {
            preferences: self.describe(&ballot.ballot),
            count: ballot.count,
        }
    }
}

/// Reads one `{"preferences": [...], "count": n}` object per line. Blank
/// lines are skipped.
pub fn load_jsonl(path: impl AsRef<Path>) -> Result<Vec<NamedBallot>, BallotFileError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| BallotFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut ballots = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| BallotFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let ballot: NamedBallot =
            serde_json::from_str(&line).map_err(|source| BallotFileError::Parse {
                path: path.to_path_buf(),
                line: idx + 1,
                source,
            })?;
        ballots.push(ballot);
    }
    Ok(ballots)
}

#[derive(Debug, Error)]
pub enum BallotFileError {
    #[error("failed to read ballots {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed ballot at {path:?}:{line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown candidate '{name}'")]
    UnknownCandidate { name: String },
    #[error(transparent)]
    Invalid(#[from] BallotError),
}
