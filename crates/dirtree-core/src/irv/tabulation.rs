use rand::Rng;
use rand::seq::SliceRandom;

use crate::model::{BallotCount, Candidate};

/// A ballot as seen during tabulation: its preferences, the position of the
/// current standing preference and its weight.
struct Standing<'a> {
    preferences: &'a [Candidate],
    cursor: usize,
    count: u64,
}

impl Standing<'_> {
    /// Moves past eliminated preferences. Returns the new standing
    /// preference, or `None` once the ballot is exhausted.
    fn advance(&mut self, eliminated: &[bool]) -> Option<Candidate> {
        while let Some(&candidate) = self.preferences.get(self.cursor) {
            if !eliminated[candidate] {
                return Some(candidate);
            }
            self.cursor += 1;
        }
        None
    }
}

/// Runs instant-runoff elimination over `ballots` and returns every
/// candidate in elimination order; the last entry is the winner.
///
/// Exactly `n_candidates` rounds are run, so the result is always a
/// permutation of `0..n_candidates`. Ties for the lowest tally are broken
/// uniformly at random with `rng`; tie-free rounds draw nothing. Empty
/// ballots are ignored. Every preference must be below `n_candidates`.
pub(crate) fn elimination_order<R: Rng + ?Sized>(
    ballots: &[BallotCount],
    n_candidates: usize,
    rng: &mut R,
) -> Vec<Candidate> {
    let mut standing: Vec<Standing<'_>> = ballots
        .iter()
        .filter(|bc| bc.count > 0 && !bc.ballot.is_empty())
        .map(|bc| Standing {
            preferences: bc.ballot.preferences(),
            cursor: 0,
            count: bc.count,
        })
        .collect();

    let mut eliminated = vec![false; n_candidates];
    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); n_candidates];
    let mut tallies = vec![0u64; n_candidates];
    for (idx, entry) in standing.iter().enumerate() {
        let first = entry.preferences[0];
        buckets[first].push(idx);
        tallies[first] += entry.count;
    }

    let mut order = Vec::with_capacity(n_candidates);
    let mut tied = Vec::with_capacity(n_candidates);
    for _ in 0..n_candidates {
        let Some(lowest) = (0..n_candidates)
            .filter(|&c| !eliminated[c])
            .map(|c| tallies[c])
            .min()
        else {
            break;
        };
        tied.clear();
        tied.extend((0..n_candidates).filter(|&c| !eliminated[c] && tallies[c] == lowest));
        let loser = if tied.len() == 1 {
            tied[0]
        } else {
            match tied.choose(rng) {
                Some(&candidate) => candidate,
                None => break,
            }
        };

        eliminated[loser] = true;
        tallies[loser] = 0;
        order.push(loser);

        for idx in std::mem::take(&mut buckets[loser]) {
            let entry = &mut standing[idx];
            if let Some(next) = entry.advance(&eliminated) {
                buckets[next].push(idx);
                tallies[next] += entry.count;
            }
        }
    }
    order
}
