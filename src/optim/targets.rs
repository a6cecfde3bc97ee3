use serde::{Deserialize, Serialize};

use crate::error::{OptimError, OptimResult};
use crate::nutrients::{Nutrient, NutrientVector};
use crate::recipe_aggregator::NutritionalProfile;

/// Desired change to one aggregated nutrient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Goal {
    /// Signed percentage of the baseline, e.g. -10 for a 10% reduction.
    Relative { percent: f64 },
    /// Literal target in the nutrient's unit.
    Absolute { grams: f64 },
}

/// Ordered set of nutrient goals. Validation happens in [`resolve`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetSpec {
    goals: Vec<(Nutrient, Goal)>,
}

/// Absolute targets for the constrained nutrients. Entries of `values` for
/// nutrients outside `constrained` carry no meaning.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTargets {
    pub values: NutrientVector,
    pub constrained: Vec<Nutrient>,
    pub baseline: NutrientVector,
}

impl ResolvedTargets {
    pub fn is_constrained(&self, nutrient: Nutrient) -> bool {
        self.constrained.contains(&nutrient)
    }

    pub fn target(&self, nutrient: Nutrient) -> Option<f64> {
        self.is_constrained(nutrient).then(|| self.values.get(nutrient))
    }
}

impl TargetSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_goal(mut self, nutrient: Nutrient, goal: Goal) -> Self {
        self.goals.push((nutrient, goal));
        self
    }

    pub fn relative(self, nutrient: Nutrient, percent: f64) -> Self {
        self.with_goal(nutrient, Goal::Relative { percent })
    }

    pub fn absolute(self, nutrient: Nutrient, grams: f64) -> Self {
        self.with_goal(nutrient, Goal::Absolute { grams })
    }

    pub fn goals(&self) -> &[(Nutrient, Goal)] {
        &self.goals
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    /// Parses `nutrient:delta` (relative) and `nutrient=grams` (absolute) directives.
    pub fn parse_directives<S: AsRef<str>>(directives: &[S]) -> OptimResult<Self> {
        let mut spec = TargetSpec::new();
        for directive in directives {
            let (nutrient, goal) = parse_directive(directive.as_ref())?;
            spec.goals.push((nutrient, goal));
        }
        Ok(spec)
    }
}

/// `carb:-10`, `carb:-10%`, `fat=25` or `fat=25g`.
pub fn parse_directive(directive: &str) -> OptimResult<(Nutrient, Goal)> {
    let invalid = || {
        OptimError::InvalidTarget(format!(
            "'{}' is neither 'nutrient:percent' nor 'nutrient=grams'",
            directive
        ))
    };

    if let Some((name, value)) = directive.split_once('=') {
        let nutrient: Nutrient = name.parse()?;
        let value = value.trim();
        let value = value.strip_suffix('g').unwrap_or(value).trim();
        let grams: f64 = value.parse().map_err(|_| invalid())?;
        return Ok((nutrient, Goal::Absolute { grams }));
    }

    let (name, value) = directive.split_once(':').ok_or_else(invalid)?;
    let nutrient: Nutrient = name.parse()?;
    let value = value.trim();
    let value = value.strip_suffix('%').unwrap_or(value).trim();
    let percent: f64 = value.parse().map_err(|_| invalid())?;
    Ok((nutrient, Goal::Relative { percent }))
}

pub fn resolve(spec: &TargetSpec, baseline: &NutritionalProfile) -> OptimResult<ResolvedTargets> {
    resolve_with(spec, baseline, false)
}

/// Resolves goals against the baseline's aggregated values. With
/// `derive_kcal`, an Atwater kcal target follows the macro targets unless
/// kcal is constrained explicitly.
pub fn resolve_with(
    spec: &TargetSpec,
    baseline: &NutritionalProfile,
    derive_kcal: bool,
) -> OptimResult<ResolvedTargets> {
    let base = baseline.aggregated;
    let mut values = base;
    let mut constrained: Vec<Nutrient> = Vec::new();

    for &(nutrient, goal) in &spec.goals {
        if constrained.contains(&nutrient) {
            return Err(OptimError::InvalidTarget(format!(
                "{} is targeted more than once",
                nutrient
            )));
        }
        let target = match goal {
            Goal::Relative { percent } => {
                if !percent.is_finite() {
                    return Err(OptimError::InvalidTarget(format!(
                        "{}: percentage must be finite",
                        nutrient
                    )));
                }
                if percent <= -100.0 {
                    return Err(OptimError::InvalidTarget(format!(
                        "{}: a change of {}% would leave no {} at all",
                        nutrient, percent, nutrient
                    )));
                }
                base.get(nutrient) * (1.0 + percent / 100.0)
            }
            Goal::Absolute { grams } => {
                if !grams.is_finite() || grams < 0.0 {
                    return Err(OptimError::InvalidTarget(format!(
                        "{}: absolute target must be a non-negative amount, got {}",
                        nutrient, grams
                    )));
                }
                grams
            }
        };
        values.set(nutrient, target);
        constrained.push(nutrient);
    }

    let macros = [Nutrient::Protein, Nutrient::Carbohydrate, Nutrient::Fat];
    if derive_kcal
        && !constrained.contains(&Nutrient::Kcal)
        && macros.iter().any(|m| constrained.contains(m))
    {
        let kcal = values.protein_g * 4.0 + values.carbohydrate_g * 4.0 + values.fat_g * 9.0;
        values.set(Nutrient::Kcal, kcal);
        constrained.push(Nutrient::Kcal);
    }

    constrained.sort();
    Ok(ResolvedTargets { values, constrained, baseline: base })
}
