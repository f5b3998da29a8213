use std::path::PathBuf;

use anyhow::Context as _;
use neurevo_training::Experiment;
use tracing::info;

use super::{ConfigArg, simulation_pool};

#[derive(Debug, Clone, clap::Args)]
pub(crate) struct MergeArg {
    /// Parent experiment directories (at least two)
    #[arg(required = true, num_args = 2..)]
    parents: Vec<PathBuf>,
    /// Directory of the new experiment; must not exist
    #[arg(long)]
    output: PathBuf,
    /// Keep training the merged experiment after its initial evaluation
    #[arg(long)]
    run: bool,
    #[clap(flatten)]
    config: ConfigArg,
}

pub(crate) fn run(arg: &MergeArg) -> anyhow::Result<()> {
    let MergeArg {
        parents,
        output,
        run,
        config,
    } = arg;
    let config = config.load()?;
    let pool = simulation_pool(&config)?;

    let mut experiment = Experiment::merge(parents, output, config, pool)
        .with_context(|| format!("Failed to merge experiments into {}", output.display()))?;
    info!(
        dir = %output.display(),
        best_fitness = experiment.meta().best_fitness,
        "merged experiment initialized"
    );

    if *run {
        let outcome = experiment
            .run()
            .with_context(|| format!("Experiment {} failed", output.display()))?;
        info!(
            generations = experiment.meta().generation_index,
            best_fitness = experiment.meta().best_fitness,
            ?outcome,
            "experiment finished"
        );
    }
    Ok(())
}
