//! Optimizer configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! overrides. CLI flags are applied on top of the file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::api_connection::endpoints::{DEFAULT_MODEL, OPENROUTER_BASE_URL};
use crate::error::{OptimError, OptimResult};

pub const DEFAULT_API_KEY_ENV_VAR: &str = "OPENROUTER_API_KEY";

/// Where candidate quantity vectors come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Deterministic coordinate perturbation.
    #[default]
    Numeric,
    /// External agent, numeric fallback on failure or timeout.
    Agent,
    /// Agent and numeric candidates scored together.
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OptimizerConfig {
    pub max_iterations: u32,
    /// Weight of the relative quantity-change penalty.
    pub reg_weight: f64,
    /// Added to target² in the loss denominator.
    pub epsilon: f64,
    /// Initial step, as a fraction of an ingredient's reference quantity.
    pub initial_step: f64,
    /// Geometric decay of the step per iteration.
    pub step_decay: f64,
    /// Step multiplier applied after a rejected iteration.
    pub step_shrink: f64,
    /// K: iterations over which the loss must plateau.
    pub convergence_window: usize,
    pub relative_tolerance: f64,
    /// Allowed deviation of each constrained nutrient, as a fraction of its target.
    pub target_tolerance: f64,
    /// M: consecutive non-improving iterations before giving up.
    pub divergence_patience: usize,
    /// Optional cap on |q - q0| / q0 for every ingredient.
    pub max_relative_change: Option<f64>,
    /// Adds an Atwater kcal target when macros are constrained and kcal is not.
    pub derive_kcal_target: bool,
    /// Score candidates on the rayon pool.
    pub parallel: bool,
    pub strategy: Strategy,
    pub agent: AgentConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            reg_weight: 0.01,
            epsilon: 1e-6,
            initial_step: 0.1,
            step_decay: 0.98,
            step_shrink: 0.5,
            convergence_window: 5,
            relative_tolerance: 1e-4,
            target_tolerance: 0.05,
            divergence_patience: 10,
            max_relative_change: None,
            derive_kcal_target: false,
            parallel: true,
            strategy: Strategy::Numeric,
            agent: AgentConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub model: String,
    pub api_key_env_var: String,
    pub base_url: String,
    pub timeout_ms: u64,
    pub temperature: f32,
    pub max_tokens: u32,
    /// OpenRouter upstream providers to route to; empty lets OpenRouter choose.
    pub provider_only: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_key_env_var: DEFAULT_API_KEY_ENV_VAR.to_string(),
            base_url: OPENROUTER_BASE_URL.to_string(),
            timeout_ms: 20_000,
            temperature: 0.1,
            max_tokens: 1024,
            provider_only: vec!["Cerebras".to_string()],
        }
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl OptimizerConfig {
    pub fn from_json_str(json: &str) -> OptimResult<Self> {
        let config: OptimizerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_json_file(path: &Path) -> OptimResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> OptimResult<()> {
        let fail = |msg: String| Err(OptimError::InvalidConfig(msg));

        if self.max_iterations == 0 {
            return fail("max_iterations must be at least 1".to_string());
        }
        if !(self.reg_weight.is_finite() && self.reg_weight >= 0.0) {
            return fail(format!("reg_weight must be non-negative, got {}", self.reg_weight));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return fail(format!("epsilon must be positive, got {}", self.epsilon));
        }
        if !(self.initial_step.is_finite() && self.initial_step > 0.0) {
            return fail(format!("initial_step must be positive, got {}", self.initial_step));
        }
        if !(self.step_decay > 0.0 && self.step_decay <= 1.0) {
            return fail(format!("step_decay must be in (0, 1], got {}", self.step_decay));
        }
        if !(self.step_shrink > 0.0 && self.step_shrink < 1.0) {
            return fail(format!("step_shrink must be in (0, 1), got {}", self.step_shrink));
        }
        if self.convergence_window == 0 {
            return fail("convergence_window must be at least 1".to_string());
        }
        if self.divergence_patience == 0 {
            return fail("divergence_patience must be at least 1".to_string());
        }
        if !(self.relative_tolerance.is_finite() && self.relative_tolerance >= 0.0) {
            return fail(format!("relative_tolerance must be non-negative, got {}", self.relative_tolerance));
        }
        if !(self.target_tolerance.is_finite() && self.target_tolerance >= 0.0) {
            return fail(format!("target_tolerance must be non-negative, got {}", self.target_tolerance));
        }
        if let Some(change) = self.max_relative_change {
            if !(change.is_finite() && change >= 0.0) {
                return fail(format!("max_relative_change must be non-negative, got {}", change));
            }
        }
        if self.strategy != Strategy::Numeric && self.agent.timeout_ms == 0 {
            return fail("agent.timeout_ms must be positive".to_string());
        }
        Ok(())
    }
}
