pub mod ballot;

pub use ballot::{Ballot, BallotCount, BallotError, Candidate, total_count};
