//! Instant-runoff tabulation.
//!
//! - `tabulation`: the elimination loop over validated weighted ballots.
//! - `election`: input validation and winner extraction for callers.

mod election;
mod tabulation;

pub use election::{ElectionError, ElectionOutcome, evaluate_election};
pub(crate) use tabulation::elimination_order;
