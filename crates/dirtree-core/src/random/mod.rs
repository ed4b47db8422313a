//! Randomness for the Dirichlet-tree.
//!
//! - `variate`: Dirichlet, multinomial, Dirichlet-multinomial and Beta draws.
//! - `seed`: reproducible engine construction and warm-up.

mod seed;
mod variate;

pub use seed::{DEFAULT_SEED, Engine, WARMUP_DRAWS, engine_from_u64, seeded_engine};
pub use variate::{VariateError, beta, dirichlet, dirichlet_multinomial, multinomial};
