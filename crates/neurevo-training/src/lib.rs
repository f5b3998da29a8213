//! Evolutionary training engine for neurevo brains.
//!
//! This crate evolves populations of [`Brain`]s (a [`neurevo_genome::Genome`]
//! plus its fitness) against an external [`Simulation`], persisting every
//! generation so an experiment can be stopped and resumed at any time.
//!
//! # How Training Works
//!
//! 1. **Create** - Generation 0 is filled with fresh random genomes
//! 2. **Evaluate** - Each brain plays one simulation per seed; its fitness is the mean score
//! 3. **Save** - The evaluated generation is written to `genNNN/`
//! 4. **Commit** - Progress, the best brain so far and the next generation index are recorded
//! 5. **Breed** - Survivors and crossed-over children form the next generation
//! 6. **Repeat** - Until the generation limit is reached or progress stagnates
//!
//! # Architecture
//!
//! ```text
//! Experiment (experiment dir, meta, log)
//!     ↓ drives
//! Generation (brains, best brain id)
//!     ↓ evaluated by                 ↓ bred into
//! FitnessEvaluator                 Generation (index + 1)
//!     ↓ runs tasks on
//! ContextPool<S: Simulation> (one context per worker thread)
//! ```
//!
//! # Configuration
//!
//! Everything tunable lives in [`TrainingConfig`], which is validated once and
//! shared as `Arc<TrainingConfig>`.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use neurevo_training::{ContextPool, Experiment, TrainingConfig};
//!
//! let config = Arc::new(TrainingConfig::default());
//! let pool = ContextPool::new((0..config.worker_count).map(|_| MySimulation::new()));
//! let mut experiment = Experiment::open("runs/first".as_ref(), config, pool)?;
//! let outcome = experiment.run()?;
//! ```
//!
//! # Current Limitations
//!
//! - **No timeouts**: a simulation that never returns blocks its generation forever
//! - **Single writer**: two processes running the same experiment directory corrupt it

pub use self::{
    brain::{Brain, LineageId},
    config::{ChampionPolicy, ConfigError, SeedPolicy, TrainingConfig},
    evaluator::{EvalTask, EvaluationError, FitnessEvaluator, Simulation, SimulationError},
    experiment::{Experiment, ExperimentError, ExperimentOutcome, ExperimentState},
    generation::{FitnessSummary, Generation, GenerationError},
    log::ExperimentLog,
    persistence::{ExperimentMeta, PersistenceError},
    pool::ContextPool,
};

pub mod brain;
mod breed;
pub mod config;
pub mod evaluator;
pub mod experiment;
pub mod generation;
pub mod log;
pub mod persistence;
pub mod pool;

#[cfg(test)]
mod test_util;
