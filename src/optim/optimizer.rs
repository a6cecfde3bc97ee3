//! The agentic optimization loop.
//!
//! Each iteration asks the configured generators for candidate quantity
//! vectors, scores them against the resolved targets, and keeps the best one
//! only if it strictly lowers the loss. The loop ends on convergence,
//! divergence, cancellation or the iteration cap.

use rayon::prelude::*;

use crate::config::{OptimizerConfig, Strategy};
use crate::error::{OptimError, OptimResult};
use crate::optim::agent::ExternalAgent;
use crate::optim::cancel::CancellationFlag;
use crate::optim::candidates::{Candidate, CandidateGenerator, NumericPerturbation, ProposalContext};
use crate::optim::convergence::{ConvergenceMonitor, IterationRecord, LossHistory, Verdict};
use crate::optim::nutri_eval::{targets_met, LossFunction};
use crate::optim::report::{OptimizationReport, TerminalStatus};
use crate::optim::targets::{resolve_with, ResolvedTargets, TargetSpec};
use crate::recipe::{QuantityBounds, Recipe};
use crate::recipe_aggregator::{aggregate, aggregate_quantities, NutritionalProfile};

pub struct Optimizer {
    config: OptimizerConfig,
    loss_fn: LossFunction,
    monitor: ConvergenceMonitor,
    numeric: NumericPerturbation,
    external: Option<Box<dyn CandidateGenerator>>,
}

/// Best-so-far point of a run.
#[derive(Debug, Clone)]
struct OptimizationState {
    quantities: Vec<f64>,
    profile: NutritionalProfile,
    loss: f64,
    /// Consecutive iterations without an accepted candidate.
    rejections: u32,
}

#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub status: TerminalStatus,
    pub quantities: Vec<f64>,
    pub profile: NutritionalProfile,
    pub targets: ResolvedTargets,
    pub history: LossHistory,
    report: OptimizationReport,
}

impl OptimizationOutcome {
    pub fn report(&self) -> &OptimizationReport {
        &self.report
    }

    pub fn into_report(self) -> OptimizationReport {
        self.report
    }

    /// Diverged runs become [`OptimError::Infeasible`]; every other status is
    /// a usable result.
    pub fn into_result(self) -> OptimResult<Self> {
        match self.status {
            TerminalStatus::Diverged => Err(OptimError::Infeasible {
                final_loss: self.report.final_loss,
                iterations: self.report.iterations_run,
            }),
            _ => Ok(self),
        }
    }
}

enum ExternalProposal {
    Proposed(Vec<Candidate>),
    Failed,
    Cancelled,
}

impl Optimizer {
    /// Numeric-only optimizer, whatever `config.strategy` says.
    pub fn new(config: OptimizerConfig) -> OptimResult<Self> {
        config.validate()?;
        Ok(Self {
            loss_fn: LossFunction::from_config(&config),
            monitor: ConvergenceMonitor::from_config(&config),
            numeric: NumericPerturbation,
            external: None,
            config,
        })
    }

    /// Consults `generator` every iteration under the agent timeout. Numeric
    /// candidates join when the strategy is hybrid or the generator yields
    /// nothing usable.
    pub fn with_generator(config: OptimizerConfig, generator: Box<dyn CandidateGenerator>) -> OptimResult<Self> {
        let mut optimizer = Self::new(config)?;
        optimizer.external = Some(generator);
        Ok(optimizer)
    }

    /// Builds the generator set `config.strategy` asks for.
    pub fn from_config(config: OptimizerConfig) -> OptimResult<Self> {
        match config.strategy {
            Strategy::Numeric => Self::new(config),
            Strategy::Agent | Strategy::Hybrid => {
                let agent = ExternalAgent::from_config(&config.agent);
                Self::with_generator(config, Box::new(agent))
            }
        }
    }

    /// Optimizes `recipe` in place toward `spec`. On return the recipe holds
    /// the best quantities found, whatever the terminal status.
    pub async fn run(
        &self,
        recipe: &mut Recipe,
        spec: &TargetSpec,
        cancel: &CancellationFlag,
    ) -> OptimResult<OptimizationOutcome> {
        if recipe.ingredients.is_empty() {
            return Err(OptimError::EmptyRecipe);
        }
        let baseline = aggregate(recipe)?;
        let targets = resolve_with(spec, &baseline, self.config.derive_kcal_target)?;
        let originals = recipe.quantities();
        let bounds = self.effective_bounds(recipe, &originals);

        let initial_loss = self.loss_fn.evaluate(&baseline, &targets, &originals, &originals).total;
        let mut history = LossHistory::new(initial_loss);
        let mut state = OptimizationState {
            quantities: originals.clone(),
            profile: baseline,
            loss: initial_loss,
            rejections: 0,
        };

        tracing::info!(
            "Optimizing '{}': {} ingredients, {} constrained nutrients, initial loss {:.6}",
            recipe.title,
            recipe.ingredients.len(),
            targets.constrained.len(),
            initial_loss
        );

        if targets.constrained.is_empty() {
            tracing::info!("No nutrient is constrained; leaving quantities unchanged.");
            return Ok(self.finish(TerminalStatus::Converged, 0, state, targets, history));
        }

        let mut status = TerminalStatus::MaxIter;
        let mut iterations_run = 0;

        for t in 0..self.config.max_iterations {
            if cancel.is_cancelled() {
                status = TerminalStatus::Cancelled;
                break;
            }
            let iteration = t + 1;
            let step = self.config.initial_step
                * self.config.step_decay.powi(t as i32)
                * self.config.step_shrink.powi(state.rejections as i32);

            let candidates = {
                let ctx = ProposalContext {
                    recipe: &*recipe,
                    quantities: &state.quantities,
                    originals: &originals,
                    bounds: &bounds,
                    targets: &targets,
                    profile: &state.profile,
                    loss: state.loss,
                    loss_fn: &self.loss_fn,
                    step,
                    iteration,
                };
                match self.collect_candidates(&ctx, cancel).await {
                    Some(candidates) => candidates,
                    None => {
                        status = TerminalStatus::Cancelled;
                        break;
                    }
                }
            };
            iterations_run = iteration;

            let best = self.best_candidate(recipe, &candidates, &originals, &targets);
            let proposed_loss = best.as_ref().map(|(_, _, loss)| *loss);
            let accepted = match best {
                Some((index, profile, loss)) if loss < state.loss => {
                    tracing::debug!(
                        "Iteration {}: accepted {:?} candidate, loss {:.6} -> {:.6}",
                        iteration,
                        candidates[index].source,
                        state.loss,
                        loss
                    );
                    state.quantities = candidates[index].quantities.clone();
                    state.profile = profile;
                    state.loss = loss;
                    state.rejections = 0;
                    true
                }
                _ => {
                    tracing::debug!(
                        "Iteration {}: {} candidates, none below {:.6} (step {:.4})",
                        iteration,
                        candidates.len(),
                        state.loss,
                        step
                    );
                    state.rejections += 1;
                    false
                }
            };

            history.push(IterationRecord { iteration, best_loss: state.loss, proposed_loss, accepted });

            let met = targets_met(&state.profile.aggregated, &targets, self.config.target_tolerance);
            match self.monitor.observe(&history, met) {
                Verdict::Converged => {
                    status = TerminalStatus::Converged;
                    break;
                }
                Verdict::Diverged => {
                    status = TerminalStatus::Diverged;
                    break;
                }
                Verdict::Continue => {}
            }
        }

        recipe.set_quantities(&state.quantities);
        let outcome = self.finish(status, iterations_run, state, targets, history);
        tracing::info!(
            "Optimization finished: {} after {} iterations, loss {:.6} -> {:.6}",
            outcome.status,
            outcome.report().iterations_run,
            outcome.report().initial_loss,
            outcome.report().final_loss
        );
        Ok(outcome)
    }

    /// Per-ingredient bounds intersected with the global relative-change band.
    fn effective_bounds(&self, recipe: &Recipe, originals: &[f64]) -> Vec<QuantityBounds> {
        recipe
            .ingredients
            .iter()
            .zip(originals)
            .map(|(ingredient, &q0)| match self.config.max_relative_change {
                Some(change) => ingredient.bounds.intersect(&QuantityBounds {
                    min_g: Some((q0 * (1.0 - change)).max(0.0)),
                    max_g: Some(q0 * (1.0 + change)),
                }),
                None => ingredient.bounds,
            })
            .collect()
    }

    /// `None` when the run was cancelled while waiting on the generator.
    async fn collect_candidates(
        &self,
        ctx: &ProposalContext<'_>,
        cancel: &CancellationFlag,
    ) -> Option<Vec<Candidate>> {
        let Some(generator) = self.external.as_deref() else {
            return Some(self.numeric.perturb(ctx));
        };

        let mut candidates = match self.ask_external(generator, ctx, cancel).await {
            ExternalProposal::Cancelled => return None,
            ExternalProposal::Proposed(candidates) => candidates,
            ExternalProposal::Failed => Vec::new(),
        };
        if candidates.is_empty() || self.config.strategy == Strategy::Hybrid {
            candidates.extend(self.numeric.perturb(ctx));
        }
        Some(candidates)
    }

    async fn ask_external(
        &self,
        generator: &dyn CandidateGenerator,
        ctx: &ProposalContext<'_>,
        cancel: &CancellationFlag,
    ) -> ExternalProposal {
        let timeout = self.config.agent.timeout();
        tokio::select! {
            _ = cancel.cancelled() => ExternalProposal::Cancelled,
            result = tokio::time::timeout(timeout, generator.propose(ctx)) => match result {
                Ok(Ok(candidates)) => ExternalProposal::Proposed(
                    candidates
                        .into_iter()
                        .filter(|c| {
                            c.quantities.len() == ctx.quantities.len()
                                && c.quantities.iter().all(|q| q.is_finite())
                        })
                        .map(|mut c| {
                            for (q, bounds) in c.quantities.iter_mut().zip(ctx.bounds) {
                                *q = bounds.clamp(*q);
                            }
                            c
                        })
                        .collect(),
                ),
                Ok(Err(e)) => {
                    tracing::warn!(
                        "Iteration {}: {} generator failed, falling back to numeric candidates: {}",
                        ctx.iteration,
                        generator.name(),
                        e
                    );
                    ExternalProposal::Failed
                }
                Err(_) => {
                    tracing::warn!(
                        "Iteration {}: {} generator timed out after {:?}, falling back to numeric candidates",
                        ctx.iteration,
                        generator.name(),
                        timeout
                    );
                    ExternalProposal::Failed
                }
            },
        }
    }

    /// Scores every candidate and returns the lowest-loss one. Ties keep the
    /// earliest candidate so runs are reproducible.
    fn best_candidate(
        &self,
        recipe: &Recipe,
        candidates: &[Candidate],
        originals: &[f64],
        targets: &ResolvedTargets,
    ) -> Option<(usize, NutritionalProfile, f64)> {
        let score = |candidate: &Candidate| -> Option<(NutritionalProfile, f64)> {
            let profile = aggregate_quantities(&recipe.ingredients, &candidate.quantities).ok()?;
            let loss = self.loss_fn.evaluate(&profile, targets, &candidate.quantities, originals).total;
            loss.is_finite().then_some((profile, loss))
        };

        let scored: Vec<Option<(NutritionalProfile, f64)>> = if self.config.parallel {
            candidates.par_iter().map(score).collect()
        } else {
            candidates.iter().map(score).collect()
        };

        scored
            .into_iter()
            .enumerate()
            .filter_map(|(i, s)| s.map(|(profile, loss)| (i, profile, loss)))
            .min_by(|a, b| a.2.total_cmp(&b.2))
    }

    fn finish(
        &self,
        status: TerminalStatus,
        iterations_run: u32,
        state: OptimizationState,
        targets: ResolvedTargets,
        history: LossHistory,
    ) -> OptimizationOutcome {
        let report = OptimizationReport::new(
            status,
            iterations_run,
            history.initial_loss,
            state.loss,
            &targets,
            &state.profile.aggregated,
            self.config.target_tolerance,
        );
        OptimizationOutcome {
            status,
            quantities: state.quantities,
            profile: state.profile,
            targets,
            history,
            report,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nutrients::{Nutrient, NutrientVector};
    use crate::optim::candidates::CandidateSource;
    use crate::recipe::Ingredient;
    use async_trait::async_trait;

    fn shortbread() -> Recipe {
        Recipe::new(
            "shortbread",
            vec![
                Ingredient::new("flour", 200.0, NutrientVector { carbohydrate_g: 0.75, protein_g: 0.1, ..Default::default() }),
                Ingredient::new("butter", 100.0, NutrientVector { fat_g: 0.82, ..Default::default() }),
                Ingredient::new("sugar", 60.0, NutrientVector { carbohydrate_g: 1.0, sugars_g: 1.0, ..Default::default() }),
            ],
            vec![],
        )
    }

    fn carb_only() -> Recipe {
        Recipe::new(
            "flatbread",
            vec![
                Ingredient::new("flour", 200.0, NutrientVector { carbohydrate_g: 0.75, ..Default::default() }),
                Ingredient::new("oil", 100.0, NutrientVector { fat_g: 1.0, ..Default::default() }),
                Ingredient::new("water", 20.0, NutrientVector { water_g: 1.0, ..Default::default() }),
            ],
            vec![],
        )
    }

    fn carb_target(recipe: &Recipe, percent: f64) -> f64 {
        aggregate(recipe).unwrap().aggregated.carbohydrate_g * (1.0 + percent / 100.0)
    }

    struct FixedGenerator(Vec<f64>);

    #[async_trait]
    impl CandidateGenerator for FixedGenerator {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn propose(&self, _ctx: &ProposalContext<'_>) -> OptimResult<Vec<Candidate>> {
            Ok(vec![Candidate { quantities: self.0.clone(), source: CandidateSource::Agent }])
        }
    }

    /// Proposes removing every ingredient.
    struct ZeroingGenerator;

    #[async_trait]
    impl CandidateGenerator for ZeroingGenerator {
        fn name(&self) -> &str {
            "zeroing"
        }

        async fn propose(&self, ctx: &ProposalContext<'_>) -> OptimResult<Vec<Candidate>> {
            Ok(vec![Candidate { quantities: vec![0.0; ctx.quantities.len()], source: CandidateSource::Agent }])
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl CandidateGenerator for FailingGenerator {
        fn name(&self) -> &str {
            "failing"
        }

        async fn propose(&self, _ctx: &ProposalContext<'_>) -> OptimResult<Vec<Candidate>> {
            Err(OptimError::AgentResponse("garbage".to_string()))
        }
    }

    struct HangingGenerator;

    #[async_trait]
    impl CandidateGenerator for HangingGenerator {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn propose(&self, _ctx: &ProposalContext<'_>) -> OptimResult<Vec<Candidate>> {
            std::future::pending::<()>().await;
            Ok(Vec::new())
        }
    }

    /// Cancels the run from inside the proposal, then never answers.
    struct CancellingGenerator(CancellationFlag);

    #[async_trait]
    impl CandidateGenerator for CancellingGenerator {
        fn name(&self) -> &str {
            "cancelling"
        }

        async fn propose(&self, _ctx: &ProposalContext<'_>) -> OptimResult<Vec<Candidate>> {
            self.0.cancel();
            std::future::pending::<()>().await;
            Ok(Vec::new())
        }
    }

    fn agent_config(timeout_ms: u64) -> OptimizerConfig {
        let mut config = OptimizerConfig { strategy: Strategy::Agent, ..OptimizerConfig::default() };
        config.agent.timeout_ms = timeout_ms;
        config
    }

    #[tokio::test]
    async fn test_numeric_reaches_carb_reduction() {
        let mut recipe = carb_only();
        let target = carb_target(&recipe, -10.0);
        let optimizer = Optimizer::new(OptimizerConfig::default()).unwrap();
        let spec = TargetSpec::new().relative(Nutrient::Carbohydrate, -10.0);

        let outcome = optimizer.run(&mut recipe, &spec, &CancellationFlag::new()).await.unwrap();

        assert_eq!(outcome.status, TerminalStatus::Converged);
        let carb = outcome.profile.aggregated.carbohydrate_g;
        assert!((carb - target).abs() <= 0.05 * target, "carb {} vs target {}", carb, target);
        assert!(outcome.report().all_within_tolerance());
        assert!(outcome.report().final_loss < outcome.report().initial_loss);
        // oil and water carry no carbohydrate
        assert_eq!(recipe.ingredients[1].quantity_g, 100.0);
        assert_eq!(recipe.ingredients[2].quantity_g, 20.0);
        assert_eq!(recipe.quantities(), outcome.quantities);
    }

    #[tokio::test]
    async fn test_best_loss_never_increases() {
        let mut recipe = shortbread();
        let optimizer = Optimizer::new(OptimizerConfig::default()).unwrap();
        let spec = TargetSpec::new()
            .relative(Nutrient::Fat, -20.0)
            .relative(Nutrient::Protein, 10.0);

        let outcome = optimizer.run(&mut recipe, &spec, &CancellationFlag::new()).await.unwrap();

        let best = outcome.history.best_losses();
        assert!(best.windows(2).all(|w| w[1] <= w[0]));
        assert!(outcome.history.len() as u32 <= OptimizerConfig::default().max_iterations);
        assert!(recipe.quantities().iter().all(|&q| q >= 0.0));
    }

    #[tokio::test]
    async fn test_sequential_and_parallel_scoring_agree() {
        let spec = TargetSpec::new().relative(Nutrient::Fat, -20.0).relative(Nutrient::Carbohydrate, -5.0);

        let mut a = shortbread();
        let parallel = Optimizer::new(OptimizerConfig::default()).unwrap();
        let pa = parallel.run(&mut a, &spec, &CancellationFlag::new()).await.unwrap();

        let mut b = shortbread();
        let sequential = Optimizer::new(OptimizerConfig { parallel: false, ..OptimizerConfig::default() }).unwrap();
        let pb = sequential.run(&mut b, &spec, &CancellationFlag::new()).await.unwrap();

        assert_eq!(pa.quantities, pb.quantities);
        assert_eq!(pa.status, pb.status);
    }

    #[tokio::test]
    async fn test_empty_spec_leaves_recipe_unchanged() {
        let mut recipe = shortbread();
        let before = recipe.quantities();
        let optimizer = Optimizer::new(OptimizerConfig::default()).unwrap();

        let outcome = optimizer.run(&mut recipe, &TargetSpec::new(), &CancellationFlag::new()).await.unwrap();

        assert_eq!(outcome.status, TerminalStatus::Converged);
        assert_eq!(outcome.report().iterations_run, 0);
        assert_eq!(outcome.report().final_loss, 0.0);
        assert_eq!(recipe.quantities(), before);
    }

    #[tokio::test]
    async fn test_empty_recipe_and_invalid_target_fail_fast() {
        let optimizer = Optimizer::new(OptimizerConfig::default()).unwrap();
        let cancel = CancellationFlag::new();

        let mut empty = Recipe::new("nothing", vec![], vec![]);
        let spec = TargetSpec::new().relative(Nutrient::Fat, -10.0);
        assert!(matches!(optimizer.run(&mut empty, &spec, &cancel).await, Err(OptimError::EmptyRecipe)));

        let mut recipe = shortbread();
        let spec = TargetSpec::new().relative(Nutrient::Fat, -100.0);
        assert!(matches!(optimizer.run(&mut recipe, &spec, &cancel).await, Err(OptimError::InvalidTarget(_))));
    }

    #[tokio::test]
    async fn test_unreachable_target_diverges() {
        // Only water can move, and water carries no fat.
        let mut recipe = Recipe::new(
            "pinned",
            vec![
                Ingredient::new("butter", 50.0, NutrientVector { fat_g: 0.82, ..Default::default() }).with_bounds(Some(50.0), Some(50.0)),
                Ingredient::new("water", 50.0, NutrientVector { water_g: 1.0, ..Default::default() }),
            ],
            vec![],
        );
        let optimizer = Optimizer::new(OptimizerConfig::default()).unwrap();
        let spec = TargetSpec::new().relative(Nutrient::Fat, -50.0);

        let outcome = optimizer.run(&mut recipe, &spec, &CancellationFlag::new()).await.unwrap();
        assert_eq!(outcome.status, TerminalStatus::Diverged);
        assert_eq!(outcome.report().iterations_run, 10);
        assert!(matches!(outcome.into_result(), Err(OptimError::Infeasible { iterations: 10, .. })));
    }

    #[tokio::test]
    async fn test_zero_mass_candidates_are_never_accepted() {
        // With a zero carb target, emptying the bowl would look ideal.
        let mut recipe = Recipe::new(
            "flour only",
            vec![Ingredient::new("flour", 100.0, NutrientVector { carbohydrate_g: 0.75, ..Default::default() })],
            vec![],
        );
        let mut config = agent_config(1_000);
        config.strategy = Strategy::Hybrid;
        let optimizer = Optimizer::with_generator(config, Box::new(ZeroingGenerator)).unwrap();
        let spec = TargetSpec::new().absolute(Nutrient::Carbohydrate, 0.0);

        let outcome = optimizer.run(&mut recipe, &spec, &CancellationFlag::new()).await.unwrap();

        assert!(outcome.quantities[0] > 0.0);
        assert!(outcome.profile.total_mass_g > 0.0);
        assert!(outcome.history.records.iter().all(|r| r.best_loss.is_finite()));
        assert!(aggregate(&recipe).unwrap().total_mass_g > 0.0);
        assert!(recipe.ingredients[0].quantity_g < 100.0);
    }

    #[tokio::test]
    async fn test_max_relative_change_bounds_every_ingredient() {
        let mut recipe = carb_only();
        let config = OptimizerConfig { max_relative_change: Some(0.05), ..OptimizerConfig::default() };
        let optimizer = Optimizer::new(config).unwrap();
        let spec = TargetSpec::new().relative(Nutrient::Carbohydrate, -30.0);

        let outcome = optimizer.run(&mut recipe, &spec, &CancellationFlag::new()).await.unwrap();
        assert!(outcome.quantities[0] >= 190.0 - 1e-9);
        assert_ne!(outcome.status, TerminalStatus::Converged);
    }

    #[tokio::test]
    async fn test_agent_candidate_is_used() {
        let mut recipe = carb_only();
        let proposal = vec![180.0, 100.0, 20.0];
        let optimizer = Optimizer::with_generator(agent_config(1_000), Box::new(FixedGenerator(proposal.clone()))).unwrap();
        let spec = TargetSpec::new().relative(Nutrient::Carbohydrate, -10.0);

        let outcome = optimizer.run(&mut recipe, &spec, &CancellationFlag::new()).await.unwrap();

        assert_eq!(outcome.status, TerminalStatus::Converged);
        assert!(outcome.history.records[0].accepted);
        assert_eq!(outcome.quantities, proposal);
    }

    #[tokio::test]
    async fn test_hybrid_keeps_numeric_candidates() {
        let mut recipe = carb_only();
        let mut config = agent_config(1_000);
        config.strategy = Strategy::Hybrid;
        // A poor suggestion that should lose to the numeric step.
        let optimizer = Optimizer::with_generator(config, Box::new(FixedGenerator(vec![400.0, 100.0, 20.0]))).unwrap();
        let target = carb_target(&recipe, -10.0);
        let spec = TargetSpec::new().relative(Nutrient::Carbohydrate, -10.0);

        let outcome = optimizer.run(&mut recipe, &spec, &CancellationFlag::new()).await.unwrap();
        let carb = outcome.profile.aggregated.carbohydrate_g;
        assert!((carb - target).abs() <= 0.05 * target);
    }

    #[tokio::test]
    async fn test_failing_agent_falls_back_to_numeric() {
        let mut recipe = carb_only();
        let target = carb_target(&recipe, -10.0);
        let optimizer = Optimizer::with_generator(agent_config(1_000), Box::new(FailingGenerator)).unwrap();
        let spec = TargetSpec::new().relative(Nutrient::Carbohydrate, -10.0);

        let outcome = optimizer.run(&mut recipe, &spec, &CancellationFlag::new()).await.unwrap();
        assert_eq!(outcome.status, TerminalStatus::Converged);
        assert!((outcome.profile.aggregated.carbohydrate_g - target).abs() <= 0.05 * target);
    }

    #[tokio::test]
    async fn test_agent_timeout_falls_back_to_numeric() {
        let mut recipe = carb_only();
        let target = carb_target(&recipe, -10.0);
        let optimizer = Optimizer::with_generator(agent_config(5), Box::new(HangingGenerator)).unwrap();
        let spec = TargetSpec::new().relative(Nutrient::Carbohydrate, -10.0);

        let outcome = optimizer.run(&mut recipe, &spec, &CancellationFlag::new()).await.unwrap();
        assert_eq!(outcome.status, TerminalStatus::Converged);
        assert!((outcome.profile.aggregated.carbohydrate_g - target).abs() <= 0.05 * target);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let mut recipe = shortbread();
        let before = recipe.quantities();
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let optimizer = Optimizer::new(OptimizerConfig::default()).unwrap();
        let spec = TargetSpec::new().relative(Nutrient::Fat, -20.0);

        let outcome = optimizer.run(&mut recipe, &spec, &cancel).await.unwrap();
        assert_eq!(outcome.status, TerminalStatus::Cancelled);
        assert_eq!(outcome.report().iterations_run, 0);
        assert_eq!(recipe.quantities(), before);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_agent_call() {
        let mut recipe = shortbread();
        let cancel = CancellationFlag::new();
        let generator = CancellingGenerator(cancel.clone());
        let optimizer = Optimizer::with_generator(agent_config(60_000), Box::new(generator)).unwrap();
        let spec = TargetSpec::new().relative(Nutrient::Fat, -20.0);

        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            optimizer.run(&mut recipe, &spec, &cancel),
        )
        .await
        .expect("cancellation should end the run")
        .unwrap();
        assert_eq!(outcome.status, TerminalStatus::Cancelled);
    }
}
