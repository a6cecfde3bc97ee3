use serde::{Deserialize, Serialize};

use crate::config::OptimizerConfig;
use crate::nutrients::{Nutrient, NutrientVector};
use crate::optim::targets::ResolvedTargets;
use crate::recipe::Ingredient;
use crate::recipe_aggregator::NutritionalProfile;

/// Floor for the regularization denominator, so ingredients that start at
/// 0 g still have a finite penalty.
pub const MIN_REFERENCE_G: f64 = 1.0;

/// Absolute band used when a target is exactly zero.
const ZERO_TARGET_BAND: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LossBreakdown {
    pub nutrient: f64,
    pub regularization: f64,
    pub total: f64,
}

/// Scale-invariant MSE over constrained nutrients plus an L2 penalty on
/// relative quantity changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossFunction {
    pub reg_weight: f64,
    pub epsilon: f64,
}

impl Default for LossFunction {
    fn default() -> Self {
        Self { reg_weight: 0.01, epsilon: 1e-6 }
    }
}

impl LossFunction {
    pub fn new(reg_weight: f64, epsilon: f64) -> Self {
        Self { reg_weight, epsilon }
    }

    pub fn from_config(config: &OptimizerConfig) -> Self {
        Self::new(config.reg_weight, config.epsilon)
    }

    /// (1/|C|) Σ (current - target)² / (target² + ε)
    pub fn nutrient_error(&self, current: &NutrientVector, targets: &ResolvedTargets) -> f64 {
        if targets.constrained.is_empty() {
            return 0.0;
        }
        let sum: f64 = targets
            .constrained
            .iter()
            .map(|&n| {
                let target = targets.values.get(n);
                (current.get(n) - target).powi(2) / (target.powi(2) + self.epsilon)
            })
            .sum();
        sum / targets.constrained.len() as f64
    }

    /// reg_weight × (1/N) Σ ((q - q0) / q0)²
    pub fn regularization(&self, quantities: &[f64], originals: &[f64]) -> f64 {
        if quantities.is_empty() || self.reg_weight == 0.0 {
            return 0.0;
        }
        let sum: f64 = quantities
            .iter()
            .zip(originals)
            .map(|(&q, &q0)| ((q - q0) / reference_g(q0)).powi(2))
            .sum();
        self.reg_weight * sum / quantities.len() as f64
    }

    /// Defined as 0 when nothing is constrained.
    pub fn evaluate(
        &self,
        profile: &NutritionalProfile,
        targets: &ResolvedTargets,
        quantities: &[f64],
        originals: &[f64],
    ) -> LossBreakdown {
        if targets.constrained.is_empty() {
            return LossBreakdown::default();
        }
        let nutrient = self.nutrient_error(&profile.aggregated, targets);
        let regularization = self.regularization(quantities, originals);
        LossBreakdown { nutrient, regularization, total: nutrient + regularization }
    }

    /// ∂loss/∂q_i for every ingredient at `quantities`.
    pub fn gradient(
        &self,
        ingredients: &[Ingredient],
        quantities: &[f64],
        aggregated: &NutrientVector,
        targets: &ResolvedTargets,
        originals: &[f64],
    ) -> Vec<f64> {
        let n_constrained = targets.constrained.len();
        if n_constrained == 0 {
            return vec![0.0; ingredients.len()];
        }
        // Per-nutrient weight of the residual, shared by every ingredient.
        let weights: Vec<(Nutrient, f64)> = targets
            .constrained
            .iter()
            .map(|&n| {
                let target = targets.values.get(n);
                let w = 2.0 * (aggregated.get(n) - target)
                    / ((target.powi(2) + self.epsilon) * n_constrained as f64);
                (n, w)
            })
            .collect();
        let n_ingredients = ingredients.len() as f64;

        ingredients
            .iter()
            .zip(quantities.iter().zip(originals))
            .map(|(ingredient, (&q, &q0))| {
                let nutrient_part: f64 = weights
                    .iter()
                    .map(|&(n, w)| w * ingredient.density.get(n))
                    .sum();
                let reference = reference_g(q0);
                let reg_part = self.reg_weight * 2.0 * (q - q0) / (reference * reference * n_ingredients);
                nutrient_part + reg_part
            })
            .collect()
    }
}

pub fn reference_g(original_g: f64) -> f64 {
    original_g.max(MIN_REFERENCE_G)
}

/// |current - target| ≤ band × |target|
pub fn within_tolerance(current: f64, target: f64, band: f64) -> bool {
    let allowed = (band * target.abs()).max(ZERO_TARGET_BAND);
    (current - target).abs() <= allowed
}

pub fn targets_met(aggregated: &NutrientVector, targets: &ResolvedTargets, band: f64) -> bool {
    targets
        .constrained
        .iter()
        .all(|&n| within_tolerance(aggregated.get(n), targets.values.get(n), band))
}
