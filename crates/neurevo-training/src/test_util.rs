use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use neurevo_genome::{Genome, GenomeKind, Matrix, NetworkShape, WeightMatrixGenome};

use crate::{
    brain::Brain,
    config::{ChampionPolicy, SeedPolicy, TrainingConfig},
    evaluator::{Simulation, SimulationError},
    generation::Generation,
};

/// Scratch directory under the system temp dir, removed on drop.
#[derive(Debug)]
pub(crate) struct TestDir(PathBuf);

impl TestDir {
    pub(crate) fn new(name: &str) -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let unique = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "neurevo-{name}-{}-{unique}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path).unwrap();
        Self(path)
    }

    pub(crate) fn path(&self) -> &Path {
        &self.0
    }

    pub(crate) fn join(&self, name: &str) -> PathBuf {
        self.0.join(name)
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

/// Single-layer network whose first weight is `value`.
pub(crate) fn valued_genome(value: f32) -> Genome {
    let layer = Matrix::try_from(vec![vec![value], vec![0.0]]).unwrap();
    Genome::WeightMatrix(WeightMatrixGenome::from_layers(vec![layer]).unwrap())
}

fn first_weight(genome: &Genome) -> f32 {
    match genome {
        Genome::Parameterless => 1.0,
        Genome::WeightMatrix(network) => network.layers()[0].values()[0],
    }
}

/// Scores a genome by its first weight.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ValueOf;

impl Simulation for ValueOf {
    fn run(&mut self, genome: &Genome, _seed: Option<u64>) -> Result<f32, SimulationError> {
        Ok(first_weight(genome))
    }
}

/// Scores every run with its seed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SeedEcho;

impl Simulation for SeedEcho {
    #[expect(clippy::cast_precision_loss)]
    fn run(&mut self, _genome: &Genome, seed: Option<u64>) -> Result<f32, SimulationError> {
        Ok(seed.unwrap_or_default() as f32)
    }
}

/// Scores a genome by `10 + sum of its weights`, counting runs.
#[derive(Debug, Clone, Default)]
pub(crate) struct WeightSum {
    pub(crate) runs: Arc<AtomicUsize>,
}

impl Simulation for WeightSum {
    fn run(&mut self, genome: &Genome, _seed: Option<u64>) -> Result<f32, SimulationError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(match genome {
            Genome::Parameterless => 10.0,
            Genome::WeightMatrix(network) => {
                10.0 + network
                    .layers()
                    .iter()
                    .flat_map(Matrix::values)
                    .sum::<f32>()
            }
        })
    }
}

/// Always fails.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Broken;

impl Simulation for Broken {
    fn run(&mut self, _genome: &Genome, _seed: Option<u64>) -> Result<f32, SimulationError> {
        Err("simulation crashed".into())
    }
}

/// Small, fast configuration: 2 inputs, 1 output, no hidden layers.
pub(crate) fn small_config(population_size: usize, survivor_rate: f64) -> TrainingConfig {
    TrainingConfig {
        algorithm: GenomeKind::WeightMatrix,
        population_size,
        survivor_rate,
        mutation_rate: 0.1,
        champions: ChampionPolicy::Fixed { count: 1 },
        max_generations: 3,
        max_generations_without_progress: 10,
        progress_improvement_threshold: 0.0,
        worker_count: 2,
        seeds: SeedPolicy::Predetermined(vec![1, 2]),
        network: NetworkShape {
            inputs: 2,
            outputs: 1,
            hidden_layers: 0,
            hidden_layer_size: 0,
        },
        ..TrainingConfig::default()
    }
}

/// Evaluated generation whose brain `i` has genome value and fitness `fitnesses[i]`.
pub(crate) fn evaluated_generation(config: TrainingConfig, fitnesses: &[f32]) -> Generation {
    let brains = fitnesses
        .iter()
        .map(|f| Brain::with_fitness(valued_genome(*f), *f))
        .collect();
    Generation::restore(0, Arc::new(config), brains, true)
}
