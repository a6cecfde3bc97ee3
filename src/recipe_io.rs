use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{OptimError, OptimResult};
use crate::recipe::{Recipe, RecipeDocument};
use crate::recipe_aggregator::EnrichedRecipeOutput;

const ENRICHED_SUFFIX: &str = "_enriched";

pub async fn load_recipe(path: &Path) -> OptimResult<Recipe> {
    let content = fs::read_to_string(path).await?;
    let document: RecipeDocument = serde_json::from_str(&content)?;
    let rows = document.ingredients.len();
    let recipe = Recipe::from_document(document)?;
    // Rows without nutrition alone leave nothing to optimize.
    if recipe.ingredients.is_empty() {
        return Err(OptimError::EmptyRecipe);
    }
    tracing::debug!(
        "Loaded '{}' with {} of {} ingredients usable from {}",
        recipe.title,
        recipe.ingredients.len(),
        rows,
        path.display()
    );
    Ok(recipe)
}

pub async fn save_output(path: &Path, output: &EnrichedRecipeOutput) -> OptimResult<()> {
    let json = serde_json::to_string_pretty(output)?;
    fs::write(path, json).await?;
    Ok(())
}

/// `dir/crepes_enriched.json` and `dir/crepes.json` both map to
/// `dir/crepes_optimized.json`.
pub fn optimized_output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let stem = stem.strip_suffix(ENRICHED_SUFFIX).unwrap_or(&stem);
    let parent = input.parent().unwrap_or_else(|| Path::new(""));
    parent.join(format!("{}_optimized.json", stem))
}
