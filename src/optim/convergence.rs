use serde::{Deserialize, Serialize};

use crate::config::OptimizerConfig;

/// Below this, a loss counts as already minimal and further relative
/// improvement is treated as none.
const LOSS_FLOOR: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    /// Best-so-far loss after this iteration.
    pub best_loss: f64,
    /// Lowest loss among this iteration's candidates, if any were scored.
    pub proposed_loss: Option<f64>,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LossHistory {
    pub initial_loss: f64,
    pub records: Vec<IterationRecord>,
}

impl LossHistory {
    pub fn new(initial_loss: f64) -> Self {
        Self { initial_loss, records: Vec::new() }
    }

    pub fn push(&mut self, record: IterationRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Initial loss followed by the best-so-far loss of every iteration.
    pub fn best_losses(&self) -> Vec<f64> {
        std::iter::once(self.initial_loss)
            .chain(self.records.iter().map(|r| r.best_loss))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Converged,
    Diverged,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceMonitor {
    pub window: usize,
    pub relative_tolerance: f64,
    pub divergence_patience: usize,
}

impl Default for ConvergenceMonitor {
    fn default() -> Self {
        Self::from_config(&OptimizerConfig::default())
    }
}

impl ConvergenceMonitor {
    pub fn from_config(config: &OptimizerConfig) -> Self {
        Self {
            window: config.convergence_window,
            relative_tolerance: config.relative_tolerance,
            divergence_patience: config.divergence_patience,
        }
    }

    /// Relative drop of the best loss over the last `window` iterations, or
    /// `None` while the history is shorter than the window.
    pub fn recent_improvement(&self, history: &LossHistory) -> Option<f64> {
        if history.len() < self.window {
            return None;
        }
        let best = history.best_losses();
        let newest = best[best.len() - 1];
        let oldest = best[best.len() - 1 - self.window];
        if oldest <= LOSS_FLOOR {
            return Some(0.0);
        }
        Some((oldest - newest) / oldest)
    }

    /// Trailing iterations in which no candidate beat the best loss.
    pub fn stalled_iterations(&self, history: &LossHistory) -> usize {
        history.records.iter().rev().take_while(|r| !r.accepted).count()
    }

    /// Converged takes precedence: a plateau inside the tolerance band is
    /// success even if the last iterations were all rejected.
    pub fn observe(&self, history: &LossHistory, targets_met: bool) -> Verdict {
        if targets_met {
            if let Some(improvement) = self.recent_improvement(history) {
                if improvement < self.relative_tolerance {
                    return Verdict::Converged;
                }
            }
        }
        if self.stalled_iterations(history) >= self.divergence_patience {
            return Verdict::Diverged;
        }
        Verdict::Continue
    }
}
