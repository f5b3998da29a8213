//! One population snapshot and its lifecycle.
//!
//! ```text
//! CREATED ──evaluate_fitnesses──▶ EVALUATED ──save──▶ PERSISTED
//!                                     │
//!                                     └──breed──▶ new CREATED generation (index + 1)
//! ```
//!
//! A generation is evaluated once, persisted once, and then used as the parent
//! of exactly one child generation. Breeding borrows the parent immutably; the
//! parent never changes after evaluation.

use std::sync::Arc;

use neurevo_genome::CrossoverError;
use rand::Rng;

use crate::{
    brain::Brain,
    breed,
    config::TrainingConfig,
    evaluator::{EvalTask, EvaluationError, FitnessEvaluator, Simulation},
    pool::ContextPool,
};

#[derive(Debug, derive_more::Display, derive_more::Error, derive_more::From)]
pub enum GenerationError {
    #[display("generation has not been evaluated")]
    NotEvaluated,
    #[display("no brain with id {id} (population {len})")]
    Bounds { id: usize, len: usize },
    #[display("fitness-proportional selection needs positive, finite fitness (total {total})")]
    InvalidFitness { total: f32 },
    #[display("population {population} keeps only {survivors} survivors, at least 2 required")]
    TooFewSurvivors { population: usize, survivors: usize },
    #[display("crossover failed")]
    #[from]
    Crossover(CrossoverError),
    #[display("fitness evaluation failed")]
    #[from]
    Evaluation(EvaluationError),
}

/// Fitness statistics of an evaluated generation.
#[derive(Debug, Clone, PartialEq)]
pub struct FitnessSummary {
    pub max: f32,
    pub min: f32,
    pub mean: f32,
    /// Fitness of each brain, indexed by brain id.
    pub fitnesses: Vec<f32>,
}

impl FitnessSummary {
    #[expect(clippy::cast_precision_loss)]
    fn new(fitnesses: Vec<f32>) -> Option<Self> {
        let max = fitnesses.iter().copied().reduce(f32::max)?;
        let min = fitnesses.iter().copied().reduce(f32::min)?;
        let mean = fitnesses.iter().sum::<f32>() / fitnesses.len() as f32;
        Some(Self {
            max,
            min,
            mean,
            fitnesses,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Generation {
    index: usize,
    brains: Vec<Brain>,
    evaluated: bool,
    best_brain_id: Option<usize>,
    config: Arc<TrainingConfig>,
}

impl Generation {
    /// Creates a generation of `population_size` fresh random brains.
    pub fn create<R>(index: usize, config: Arc<TrainingConfig>, rng: &mut R) -> Self
    where
        R: Rng + ?Sized,
    {
        let factory = config.genome_factory();
        let brains = (0..config.population_size)
            .map(|_| Brain::new(factory.create(rng)))
            .collect();
        Self::from_brains(index, config, brains)
    }

    /// Creates a not yet evaluated generation from existing brains.
    #[must_use]
    pub fn from_brains(index: usize, config: Arc<TrainingConfig>, brains: Vec<Brain>) -> Self {
        Self {
            index,
            brains,
            evaluated: false,
            best_brain_id: None,
            config,
        }
    }

    /// Rebuilds a generation whose brains already carry their fitness.
    pub(crate) fn restore(
        index: usize,
        config: Arc<TrainingConfig>,
        brains: Vec<Brain>,
        evaluated: bool,
    ) -> Self {
        let mut generation = Self::from_brains(index, config, brains);
        if evaluated {
            generation.best_brain_id = best_index(&generation.brains);
            generation.evaluated = generation.best_brain_id.is_some();
        }
        generation
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn brains(&self) -> &[Brain] {
        &self.brains
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.brains.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.brains.is_empty()
    }

    #[must_use]
    pub fn is_evaluated(&self) -> bool {
        self.evaluated
    }

    #[must_use]
    pub fn config(&self) -> &Arc<TrainingConfig> {
        &self.config
    }

    pub fn brain(&self, id: usize) -> Result<&Brain, GenerationError> {
        self.brains.get(id).ok_or(GenerationError::Bounds {
            id,
            len: self.brains.len(),
        })
    }

    /// Id of the brain with the highest fitness; ties go to the lowest id.
    pub fn best_brain_id(&self) -> Result<usize, GenerationError> {
        self.best_brain_id.ok_or(GenerationError::NotEvaluated)
    }

    pub fn best_brain(&self) -> Result<&Brain, GenerationError> {
        self.brain(self.best_brain_id()?)
    }

    /// Evaluates every brain and records its fitness.
    ///
    /// Either every brain receives a new fitness or, on error, none does and
    /// the generation is left unevaluated. Calling this again re-evaluates.
    pub fn evaluate_fitnesses<S>(
        &mut self,
        evaluator: &FitnessEvaluator,
        pool: &mut ContextPool<S>,
    ) -> Result<(), GenerationError>
    where
        S: Simulation,
    {
        let seeds = self.config.seeds.seeds();
        let tasks = self
            .brains
            .iter()
            .enumerate()
            .map(|(brain_id, brain)| EvalTask {
                brain_id,
                genome: brain.genome().clone(),
                seeds: seeds.clone(),
            })
            .collect();

        self.evaluated = false;
        self.best_brain_id = None;
        let fitnesses = evaluator.evaluate(pool, tasks)?;
        for (brain_id, fitness) in fitnesses {
            self.brains[brain_id].set_fitness(fitness);
        }
        self.best_brain_id = best_index(&self.brains);
        self.evaluated = self.best_brain_id.is_some();
        Ok(())
    }

    pub fn fitness_summary(&self) -> Result<FitnessSummary, GenerationError> {
        if !self.evaluated {
            return Err(GenerationError::NotEvaluated);
        }
        let fitnesses = self
            .brains
            .iter()
            .map(|brain| brain.fitness().ok_or(GenerationError::NotEvaluated))
            .collect::<Result<Vec<_>, _>>()?;
        FitnessSummary::new(fitnesses).ok_or(GenerationError::NotEvaluated)
    }

    /// Breeds the next generation using the thread-local rng.
    pub fn breed(&self) -> Result<Self, GenerationError> {
        self.breed_with(&mut rand::rng())
    }

    /// Breeds the next generation: survivors first, then crossed-over children.
    pub fn breed_with<R>(&self, rng: &mut R) -> Result<Self, GenerationError>
    where
        R: Rng + ?Sized,
    {
        if !self.evaluated {
            return Err(GenerationError::NotEvaluated);
        }
        let brains = breed::next_brains(&self.brains, &self.config, rng)?;
        Ok(Self::from_brains(
            self.index + 1,
            Arc::clone(&self.config),
            brains,
        ))
    }
}

/// Index of the highest fitness, scanning with a strict `>` so the lowest
/// index wins ties. `None` if any brain is unevaluated or the list is empty.
fn best_index(brains: &[Brain]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (id, brain) in brains.iter().enumerate() {
        let fitness = brain.fitness()?;
        if best.is_none_or(|(_, best_fitness)| fitness > best_fitness) {
            best = Some((id, fitness));
        }
    }
    best.map(|(id, _)| id)
}
