pub mod agent;
pub mod cancel;
pub mod candidates;
pub mod convergence;
pub mod nutri_eval;
pub mod optimizer;
pub mod report;
pub mod targets;

pub use cancel::CancellationFlag;
pub use optimizer::{OptimizationOutcome, Optimizer};
pub use report::{OptimizationReport, TerminalStatus};
pub use targets::TargetSpec;
