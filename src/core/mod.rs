mod engine;
mod optimizer;
mod types;

pub use engine::{run_ensemble, run_policy_comparison, simulate};
pub use optimizer::optimize;
pub use types::{
    CandidateScore, ComparisonResult, EnsembleResult, Milestone, MilestoneTable, NumericAnomaly,
    OptimizationResult, PathResult, ReturnModel, SimError, SimulationConfig,
};
