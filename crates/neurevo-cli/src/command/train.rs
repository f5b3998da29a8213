use std::path::PathBuf;

use anyhow::Context as _;
use neurevo_training::{Experiment, ExperimentOutcome};
use tracing::info;

use super::{ConfigArg, simulation_pool};

#[derive(Debug, Clone, clap::Args)]
pub(crate) struct TrainArg {
    /// Experiment directory; created if missing, resumed otherwise
    dir: PathBuf,
    #[clap(flatten)]
    config: ConfigArg,
}

pub(crate) fn run(arg: &TrainArg) -> anyhow::Result<()> {
    let TrainArg { dir, config } = arg;
    let config = config.load()?;
    let pool = simulation_pool(&config)?;

    let mut experiment = Experiment::open(dir, config, pool)
        .with_context(|| format!("Failed to open experiment {}", dir.display()))?;
    let outcome = experiment
        .run()
        .with_context(|| format!("Experiment {} failed", dir.display()))?;

    let meta = experiment.meta();
    let reason = match outcome {
        ExperimentOutcome::Completed => "generation limit reached",
        ExperimentOutcome::Stagnated => "progress stagnated",
    };
    info!(
        generations = meta.generation_index,
        best_fitness = meta.best_fitness,
        best_brain = %meta.best_brain,
        "experiment finished: {reason}"
    );
    Ok(())
}
