use anyhow::{Context, Result};
use recipe_rebalance::cli::parse_args;
use recipe_rebalance::optim::{CancellationFlag, Optimizer, TerminalStatus};
use recipe_rebalance::recipe_aggregator::{aggregate, EnrichedRecipeOutput};
use recipe_rebalance::recipe_io::{load_recipe, optimized_output_path, save_output};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("recipe_rebalance=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok(); // Load .env file for API keys
    init_tracing();

    let cli_args = parse_args();
    let spec = cli_args.target_spec().context("Invalid optimization target")?;
    let config = cli_args
        .optimizer_config()
        .await
        .context("Invalid optimizer configuration")?;

    tracing::info!("Input recipe file: {}", cli_args.recipe_file.display());
    let mut recipe = load_recipe(&cli_args.recipe_file)
        .await
        .with_context(|| format!("Failed to load recipe file '{}'", cli_args.recipe_file.display()))?;

    let baseline = aggregate(&recipe).context("Failed to compute the recipe's nutritional profile")?;
    tracing::info!(
        "Baseline: {:.1} g total, {:.1} kcal, {:.1} g protein, {:.1} g carbohydrate, {:.1} g fat",
        baseline.total_mass_g,
        baseline.aggregated.kcal,
        baseline.aggregated.protein_g,
        baseline.aggregated.carbohydrate_g,
        baseline.aggregated.fat_g
    );

    let cancel = CancellationFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, stopping after the current iteration.");
                cancel.cancel();
            }
        });
    }

    let optimizer = Optimizer::from_config(config).context("Failed to set up the optimizer")?;
    let outcome = optimizer
        .run(&mut recipe, &spec, &cancel)
        .await
        .context("Recipe optimization failed")?;

    println!("\n{}", outcome.report().summary());
    if outcome.status == TerminalStatus::Diverged {
        tracing::warn!("The targets could not be reached; saving the closest recipe found.");
    }

    let output = EnrichedRecipeOutput::from_recipe(&recipe, Some(outcome.into_report()))
        .context("Failed to build the optimized recipe document")?;
    let output_path = cli_args
        .output
        .clone()
        .unwrap_or_else(|| optimized_output_path(&cli_args.recipe_file));
    save_output(&output_path, &output)
        .await
        .with_context(|| format!("Failed to write optimized recipe to {:?}", output_path))?;
    println!("\nOptimized recipe saved to '{}'", output_path.display());

    Ok(())
}
