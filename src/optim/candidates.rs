//! Candidate generation.
//!
//! The optimizer only scores and accepts candidates; where they come from is
//! behind [`CandidateGenerator`]. [`NumericPerturbation`] is the default,
//! deterministic strategy; the agent-backed one lives in `optim::agent`.

use async_trait::async_trait;

use crate::error::OptimResult;
use crate::optim::nutri_eval::{reference_g, LossFunction};
use crate::optim::targets::ResolvedTargets;
use crate::recipe::{QuantityBounds, Recipe};
use crate::recipe_aggregator::NutritionalProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    /// One ingredient moved against its gradient.
    Coordinate(usize),
    /// Every relevant ingredient moved along the normalized gradient.
    Joint,
    Agent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub quantities: Vec<f64>,
    pub source: CandidateSource,
}

/// Read-only snapshot handed to generators for one iteration.
pub struct ProposalContext<'a> {
    pub recipe: &'a Recipe,
    pub quantities: &'a [f64],
    pub originals: &'a [f64],
    /// Effective per-ingredient bounds, already intersected with any global band.
    pub bounds: &'a [QuantityBounds],
    pub targets: &'a ResolvedTargets,
    pub profile: &'a NutritionalProfile,
    pub loss: f64,
    pub loss_fn: &'a LossFunction,
    /// Fraction of an ingredient's reference quantity to move this iteration.
    pub step: f64,
    pub iteration: u32,
}

#[async_trait]
pub trait CandidateGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Proposes full quantity vectors. An empty list means "no suggestion".
    async fn propose(&self, ctx: &ProposalContext<'_>) -> OptimResult<Vec<Candidate>>;
}

/// Gradient-sign coordinate search plus one joint gradient step.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericPerturbation;

impl NumericPerturbation {
    pub fn perturb(&self, ctx: &ProposalContext<'_>) -> Vec<Candidate> {
        let ingredients = &ctx.recipe.ingredients;
        let gradient = ctx.loss_fn.gradient(
            ingredients,
            ctx.quantities,
            &ctx.profile.aggregated,
            ctx.targets,
            ctx.originals,
        );

        let relevant: Vec<usize> = (0..ingredients.len())
            .filter(|&i| {
                let ingredient = &ingredients[i];
                !ctx.bounds[i].is_pinned()
                    && gradient[i] != 0.0
                    && gradient[i].is_finite()
                    && ctx
                        .targets
                        .constrained
                        .iter()
                        .any(|&n| ingredient.density.get(n) != 0.0)
            })
            .collect();

        if relevant.is_empty() {
            return Vec::new();
        }

        let reference = |i: usize| reference_g(ctx.originals[i].max(ctx.quantities[i]));
        let mut candidates = Vec::with_capacity(relevant.len() + 1);

        for &i in &relevant {
            let moved = ctx.bounds[i].clamp(ctx.quantities[i] - ctx.step * reference(i) * gradient[i].signum());
            if moved != ctx.quantities[i] {
                let mut quantities = ctx.quantities.to_vec();
                quantities[i] = moved;
                candidates.push(Candidate { quantities, source: CandidateSource::Coordinate(i) });
            }
        }

        if relevant.len() > 1 {
            let max_abs = relevant.iter().map(|&i| gradient[i].abs()).fold(0.0_f64, f64::max);
            let mut quantities = ctx.quantities.to_vec();
            for &i in &relevant {
                let delta = ctx.step * reference(i) * gradient[i] / max_abs;
                quantities[i] = ctx.bounds[i].clamp(ctx.quantities[i] - delta);
            }
            if quantities.as_slice() != ctx.quantities {
                candidates.push(Candidate { quantities, source: CandidateSource::Joint });
            }
        }

        candidates
    }
}

#[async_trait]
impl CandidateGenerator for NumericPerturbation {
    fn name(&self) -> &str {
        "numeric"
    }

    async fn propose(&self, ctx: &ProposalContext<'_>) -> OptimResult<Vec<Candidate>> {
        Ok(self.perturb(ctx))
    }
}
