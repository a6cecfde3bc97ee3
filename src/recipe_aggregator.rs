use serde::{Deserialize, Serialize};

use crate::error::{OptimError, OptimResult};
use crate::nutrients::NutrientVector;
use crate::optim::report::OptimizationReport;
use crate::recipe::{Ingredient, Recipe, RecipeDocument};

/// Aggregated and per-100g nutrients of a recipe at its current quantities.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct NutritionalProfile {
    pub total_mass_g: f64,
    pub aggregated: NutrientVector,
    pub per_100g: NutrientVector,
}

/// Output document: the recipe with recomputed nutrition and, after an
/// optimization run, its report.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EnrichedRecipeOutput {
    #[serde(flatten)]
    pub recipe: RecipeDocument,
    pub nutritional_profile: NutritionalProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimization_report: Option<OptimizationReport>,
}

impl EnrichedRecipeOutput {
    pub fn from_recipe(recipe: &Recipe, report: Option<OptimizationReport>) -> OptimResult<Self> {
        Ok(Self {
            recipe: recipe.to_document(),
            nutritional_profile: aggregate(recipe)?,
            optimization_report: report,
        })
    }
}

pub fn aggregate(recipe: &Recipe) -> OptimResult<NutritionalProfile> {
    let quantities = recipe.quantities();
    aggregate_quantities(&recipe.ingredients, &quantities)
}

/// Aggregates `ingredients` as if their quantities were `quantities`, so
/// candidates can be scored without touching the recipe.
pub fn aggregate_quantities(
    ingredients: &[Ingredient],
    quantities: &[f64],
) -> OptimResult<NutritionalProfile> {
    debug_assert_eq!(ingredients.len(), quantities.len());

    let mut aggregated = NutrientVector::default();
    let mut total_mass_g = 0.0_f64;
    for (ingredient, &grams) in ingredients.iter().zip(quantities) {
        total_mass_g += grams;
        aggregated.add_scaled(&ingredient.density, grams);
    }

    if total_mass_g <= 0.0 {
        return Err(OptimError::DivisionByZero);
    }

    let scale_factor = 100.0 / total_mass_g;
    Ok(NutritionalProfile {
        total_mass_g,
        aggregated,
        per_100g: aggregated * scale_factor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nutrients::Nutrient;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_recipe(rng: &mut StdRng) -> Recipe {
        let count = rng.gen_range(1..12);
        let ingredients = (0..count)
            .map(|i| {
                let mut density = NutrientVector::default();
                for nutrient in Nutrient::ALL {
                    density.set(nutrient, rng.gen_range(0.0..1.0));
                }
                density.kcal *= 9.0;
                Ingredient::new(format!("ingredient {}", i), rng.gen_range(0.5..400.0), density)
            })
            .collect();
        Recipe::new("random", ingredients, vec![])
    }

    #[test]
    fn test_total_mass_is_sum_of_quantities() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let recipe = random_recipe(&mut rng);
            let profile = aggregate(&recipe).unwrap();
            let expected: f64 = recipe.ingredients.iter().map(|i| i.quantity_g).sum();
            assert!((profile.total_mass_g - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_per_100g_is_aggregated_scaled_by_mass() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let recipe = random_recipe(&mut rng);
            let profile = aggregate(&recipe).unwrap();
            for nutrient in Nutrient::ALL {
                let expected = profile.aggregated.get(nutrient) * 100.0 / profile.total_mass_g;
                assert!((profile.per_100g.get(nutrient) - expected).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_aggregated_is_weighted_sum() {
        let flour = Ingredient::new(
            "flour",
            200.0,
            NutrientVector { carbohydrate_g: 0.75, protein_g: 0.1, ..Default::default() },
        );
        let butter = Ingredient::new(
            "butter",
            50.0,
            NutrientVector { fat_g: 0.8, fa_saturated_g: 0.5, ..Default::default() },
        );
        let recipe = Recipe::new("t", vec![flour, butter], vec![]);
        let profile = aggregate(&recipe).unwrap();

        assert_eq!(profile.total_mass_g, 250.0);
        assert!((profile.aggregated.carbohydrate_g - 150.0).abs() < 1e-9);
        assert!((profile.aggregated.fat_g - 40.0).abs() < 1e-9);
        assert!((profile.per_100g.carbohydrate_g - 60.0).abs() < 1e-9);
        assert!((profile.per_100g.fat_g - 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_mass_is_division_by_zero() {
        let recipe = Recipe::new(
            "empty pot",
            vec![Ingredient::new("water", 0.0, NutrientVector { water_g: 1.0, ..Default::default() })],
            vec![],
        );
        assert!(matches!(aggregate(&recipe), Err(OptimError::DivisionByZero)));
        assert!(matches!(aggregate_quantities(&[], &[]), Err(OptimError::DivisionByZero)));
    }

    #[test]
    fn test_aggregate_quantities_ignores_recipe_state() {
        let recipe = Recipe::new(
            "t",
            vec![Ingredient::new("sugar", 10.0, NutrientVector { sugars_g: 1.0, ..Default::default() })],
            vec![],
        );
        let profile = aggregate_quantities(&recipe.ingredients, &[40.0]).unwrap();
        assert_eq!(profile.aggregated.sugars_g, 40.0);
        assert_eq!(recipe.ingredients[0].quantity_g, 10.0);
    }
}
