use serde::{Deserialize, Serialize};
use std::fmt;

use crate::nutrients::{Nutrient, NutrientVector};
use crate::optim::nutri_eval::within_tolerance;
use crate::optim::targets::ResolvedTargets;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Converged,
    MaxIter,
    Diverged,
    Cancelled,
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TerminalStatus::Converged => "converged",
            TerminalStatus::MaxIter => "max_iter",
            TerminalStatus::Diverged => "diverged",
            TerminalStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutrientOutcome {
    pub nutrient: Nutrient,
    pub baseline: f64,
    pub target: f64,
    pub achieved: f64,
    /// (achieved - target) / target × 100, or 0 when both are zero.
    pub deviation_percent: f64,
    pub within_tolerance: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub status: TerminalStatus,
    pub iterations_run: u32,
    pub initial_loss: f64,
    pub final_loss: f64,
    pub achieved_vs_target: Vec<NutrientOutcome>,
}

impl OptimizationReport {
    pub fn new(
        status: TerminalStatus,
        iterations_run: u32,
        initial_loss: f64,
        final_loss: f64,
        targets: &ResolvedTargets,
        achieved: &NutrientVector,
        band: f64,
    ) -> Self {
        let achieved_vs_target = targets
            .constrained
            .iter()
            .map(|&nutrient| {
                let target = targets.values.get(nutrient);
                let value = achieved.get(nutrient);
                NutrientOutcome {
                    nutrient,
                    baseline: targets.baseline.get(nutrient),
                    target,
                    achieved: value,
                    deviation_percent: deviation_percent(value, target),
                    within_tolerance: within_tolerance(value, target, band),
                }
            })
            .collect();
        Self { status, iterations_run, initial_loss, final_loss, achieved_vs_target }
    }

    pub fn all_within_tolerance(&self) -> bool {
        self.achieved_vs_target.iter().all(|o| o.within_tolerance)
    }

    /// Human-readable multi-line summary for the terminal.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "Status: {} after {} iterations (loss {:.6} -> {:.6})",
            self.status, self.iterations_run, self.initial_loss, self.final_loss
        )];
        for o in &self.achieved_vs_target {
            lines.push(format!(
                "  {:<14} {:>9.2} -> {:>9.2} {} (target {:.2}, {:+.1}%){}",
                o.nutrient.to_string(),
                o.baseline,
                o.achieved,
                o.nutrient.unit(),
                o.target,
                o.deviation_percent,
                if o.within_tolerance { "" } else { "  [out of band]" }
            ));
        }
        lines.join("\n")
    }
}

fn deviation_percent(achieved: f64, target: f64) -> f64 {
    if target.abs() > f64::EPSILON {
        (achieved - target) / target * 100.0
    } else if achieved.abs() > f64::EPSILON {
        100.0
    } else {
        0.0
    }
}
