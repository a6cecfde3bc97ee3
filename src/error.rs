//! Error types for the optimization core.

use thiserror::Error;

use crate::api_connection::connection::ApiConnectionError;

#[derive(Debug, Error)]
pub enum OptimError {
    #[error("recipe has no ingredients")]
    EmptyRecipe,

    #[error("total recipe mass is zero, cannot normalize per 100g")]
    DivisionByZero,

    #[error("invalid recipe: {0}")]
    InvalidRecipe(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("targets could not be reached (best loss {final_loss:.6} after {iterations} iterations)")]
    Infeasible { final_loss: f64, iterations: u32 },

    #[error("invalid optimizer configuration: {0}")]
    InvalidConfig(String),

    #[error("agent request failed: {0}")]
    Agent(#[from] ApiConnectionError),

    #[error("agent returned an unusable proposal: {0}")]
    AgentResponse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for optimization operations
pub type OptimResult<T> = Result<T, OptimError>;
