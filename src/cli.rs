use clap::Parser;
use std::path::PathBuf;

use crate::config::{OptimizerConfig, Strategy};
use crate::error::OptimResult;
use crate::optim::targets::TargetSpec;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the enriched recipe JSON file
    #[arg(short, long)]
    pub recipe_file: PathBuf,

    /// Nutrient goal, repeatable: `carb:-10` (percent) or `salt=1.5` (grams)
    #[arg(short = 't', long = "target", value_name = "DIRECTIVE", allow_hyphen_values = true)]
    pub optimization_targets: Vec<String>,

    /// Maximum number of optimization iterations
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Weight of the penalty on changing quantities
    #[arg(long)]
    pub reg_weight: Option<f64>,

    /// Where candidate quantities come from
    #[arg(long, value_enum)]
    pub strategy: Option<Strategy>,

    /// JSON file with optimizer settings; flags override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output path, defaults to `<stem>_optimized.json` next to the input
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl Cli {
    pub fn target_spec(&self) -> OptimResult<TargetSpec> {
        TargetSpec::parse_directives(&self.optimization_targets)
    }

    /// File settings (or defaults) with command-line overrides applied.
    pub async fn optimizer_config(&self) -> OptimResult<OptimizerConfig> {
        let mut config = match &self.config {
            Some(path) => OptimizerConfig::from_json_file(path).await?,
            None => OptimizerConfig::default(),
        };
        if let Some(max_iterations) = self.max_iterations {
            config.max_iterations = max_iterations;
        }
        if let Some(reg_weight) = self.reg_weight {
            config.reg_weight = reg_weight;
        }
        if let Some(strategy) = self.strategy {
            config.strategy = strategy;
        }
        config.validate()?;
        Ok(config)
    }
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
