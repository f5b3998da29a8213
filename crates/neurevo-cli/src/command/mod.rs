use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use neurevo_genome::{Activation, CrossoverPolicy, GenomeKind};
use neurevo_training::{ChampionPolicy, ContextPool, SeedPolicy, TrainingConfig};

use self::{merge::MergeArg, show_config::ShowConfigArg, train::TrainArg};
use crate::{
    sim::{self, DodgeSimulation},
    util,
};

mod merge;
mod show_config;
mod train;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct CommandArgs {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Clone, Subcommand)]
enum Mode {
    /// Start a new experiment, or resume an existing one
    Train(#[clap(flatten)] TrainArg),
    /// Seed a new experiment with brains from existing experiments
    Merge(#[clap(flatten)] MergeArg),
    /// Print the effective training configuration as JSON
    ShowConfig(#[clap(flatten)] ShowConfigArg),
}

pub fn run() -> anyhow::Result<()> {
    let args = CommandArgs::parse();
    match args.mode {
        Mode::Train(arg) => train::run(&arg)?,
        Mode::Merge(arg) => merge::run(&arg)?,
        Mode::ShowConfig(arg) => show_config::run(&arg)?,
    }
    Ok(())
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, derive_more::FromStr)]
pub enum Algorithm {
    #[default]
    Nn,
    Simple,
}

impl From<Algorithm> for GenomeKind {
    fn from(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Nn => GenomeKind::WeightMatrix,
            Algorithm::Simple => GenomeKind::Parameterless,
        }
    }
}

/// Training configuration: a JSON file, adjusted by command-line overrides.
#[derive(Default, Debug, Clone, clap::Args)]
pub(crate) struct ConfigArg {
    /// Training configuration JSON file (defaults are used when omitted)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Brain algorithm: `nn` or `simple`
    #[arg(long)]
    algorithm: Option<Algorithm>,
    #[arg(long)]
    population_size: Option<usize>,
    /// Fraction of each generation surviving into the next one
    #[arg(long)]
    survivor_rate: Option<f64>,
    /// Per-weight mutation probability
    #[arg(long)]
    mutation_rate: Option<f64>,
    /// Crossover policy: `uniform` or `split`
    #[arg(long)]
    crossover: Option<CrossoverPolicy>,
    /// Keep every survivor unmutated
    #[arg(long, conflicts_with_all = ["champions", "champion_multiplier"])]
    all_survivor_champions: bool,
    /// Keep the best N survivors unmutated
    #[arg(long, conflicts_with = "champion_multiplier")]
    champions: Option<usize>,
    /// Keep survivors above `mean fitness * MULTIPLIER` unmutated
    #[arg(long)]
    champion_multiplier: Option<f32>,
    #[arg(long)]
    max_generations: Option<usize>,
    #[arg(long)]
    max_generations_without_progress: Option<usize>,
    /// Minimum best-fitness gain that counts as progress
    #[arg(long)]
    progress_threshold: Option<f32>,
    /// Number of parallel simulation workers
    #[arg(long)]
    workers: Option<usize>,
    /// Comma-separated simulation seeds
    #[arg(long, value_delimiter = ',', conflicts_with = "random_seeds")]
    seeds: Option<Vec<u64>>,
    /// Play N unseeded simulations per brain instead of fixed seeds
    #[arg(long)]
    random_seeds: Option<usize>,
    /// Hidden layer activation: `relu`, `sigmoid`, `softplus` or `log`
    #[arg(long)]
    activation: Option<Activation>,
    /// Mirror the experiment log to stderr
    #[arg(long)]
    echo_logs: bool,
}

impl ConfigArg {
    /// Builds and validates the effective configuration.
    pub(crate) fn load(&self) -> anyhow::Result<Arc<TrainingConfig>> {
        let mut config = match &self.config {
            Some(path) => util::read_config_file(path)?,
            None => TrainingConfig::default(),
        };
        self.apply(&mut config);
        config
            .validate()
            .context("Invalid training configuration")?;
        if config.algorithm == GenomeKind::WeightMatrix {
            anyhow::ensure!(
                config.network.inputs == sim::SENSOR_FEATURES
                    && config.network.outputs == sim::ACTIONS,
                "the dodge arena needs a network with {} inputs and {} outputs, got {} and {}",
                sim::SENSOR_FEATURES,
                sim::ACTIONS,
                config.network.inputs,
                config.network.outputs,
            );
        }
        Ok(Arc::new(config))
    }

    fn apply(&self, config: &mut TrainingConfig) {
        if let Some(algorithm) = self.algorithm {
            config.algorithm = algorithm.into();
        }
        if let Some(population_size) = self.population_size {
            config.population_size = population_size;
        }
        if let Some(survivor_rate) = self.survivor_rate {
            config.survivor_rate = survivor_rate;
        }
        if let Some(mutation_rate) = self.mutation_rate {
            config.mutation_rate = mutation_rate;
        }
        if let Some(crossover) = self.crossover {
            config.crossover = crossover;
        }
        if self.all_survivor_champions {
            config.champions = ChampionPolicy::AllSurvivors;
        }
        if let Some(count) = self.champions {
            config.champions = ChampionPolicy::Fixed { count };
        }
        if let Some(threshold_multiplier) = self.champion_multiplier {
            config.champions = ChampionPolicy::Performance {
                threshold_multiplier,
            };
        }
        if let Some(max_generations) = self.max_generations {
            config.max_generations = max_generations;
        }
        if let Some(max) = self.max_generations_without_progress {
            config.max_generations_without_progress = max;
        }
        if let Some(threshold) = self.progress_threshold {
            config.progress_improvement_threshold = threshold;
        }
        if let Some(workers) = self.workers {
            config.worker_count = workers;
        }
        if let Some(seeds) = &self.seeds {
            config.seeds = SeedPolicy::Predetermined(seeds.clone());
        }
        if let Some(simulations) = self.random_seeds {
            config.seeds = SeedPolicy::Random { simulations };
        }
        if let Some(activation) = self.activation {
            config.think.hidden_activation = activation;
        }
        if self.echo_logs {
            config.echo_logs = true;
        }
    }
}

/// One dodge arena per worker.
fn simulation_pool(config: &TrainingConfig) -> anyhow::Result<ContextPool<DodgeSimulation>> {
    let contexts = (0..config.worker_count)
        .map(|_| DodgeSimulation::new(config.think.clone()))
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to create simulation contexts")?;
    Ok(ContextPool::new(contexts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_file_values() {
        let args = CommandArgs::parse_from([
            "neurevo",
            "show-config",
            "--algorithm",
            "simple",
            "--population-size",
            "12",
            "--champion-multiplier",
            "1.5",
            "--seeds",
            "4,5,6",
            "--crossover",
            "split",
        ]);
        let Mode::ShowConfig(arg) = args.mode else {
            panic!("expected show-config");
        };
        let config = arg.config.load().unwrap();
        assert_eq!(config.algorithm, GenomeKind::Parameterless);
        assert_eq!(config.population_size, 12);
        assert_eq!(config.crossover, CrossoverPolicy::Split);
        assert_eq!(
            config.champions,
            ChampionPolicy::Performance {
                threshold_multiplier: 1.5
            }
        );
        assert_eq!(config.seeds, SeedPolicy::Predetermined(vec![4, 5, 6]));
        assert!(!config.echo_logs);
    }

    #[test]
    fn test_champion_flags_conflict() {
        assert!(
            CommandArgs::try_parse_from([
                "neurevo",
                "show-config",
                "--all-survivor-champions",
                "--champions",
                "2",
            ])
            .is_err()
        );
        let arg = ConfigArg {
            champions: Some(2),
            ..ConfigArg::default()
        };
        assert_eq!(
            arg.load().unwrap().champions,
            ChampionPolicy::Fixed { count: 2 }
        );
    }

    #[test]
    fn test_invalid_overrides_are_rejected() {
        let arg = ConfigArg {
            population_size: Some(5),
            survivor_rate: Some(0.2),
            ..ConfigArg::default()
        };
        assert!(arg.load().is_err());
    }
}
