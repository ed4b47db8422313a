pub mod audit;
pub mod irv;
pub mod model;
pub mod random;
pub mod tree;

pub use audit::{AuditError, AuditRequest, CancellationToken, PosteriorAuditSampler, WinProbabilities};
pub use irv::{ElectionError, ElectionOutcome, evaluate_election};
pub use model::{Ballot, BallotCount, BallotError, Candidate};
pub use tree::{DirichletTree, ParameterError, TreeError, TreeParameters};

pub struct LibInfo;

impl LibInfo {
    pub const fn name() -> &'static str {
        "dirtree"
    }

    pub const fn description() -> &'static str {
        "Dirichlet-tree posterior audits for instant-runoff elections"
    }

    pub const fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}
