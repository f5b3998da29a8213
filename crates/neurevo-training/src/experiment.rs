//! Resumable experiments.
//!
//! An [`Experiment`] owns an experiment directory and drives the
//! create → evaluate → save → breed loop until the generation limit is hit or
//! progress stagnates.
//!
//! ```text
//! New ──────┐
//!           ├──run──▶ Running ──▶ Completed | Stagnated | Failed
//! Resuming ─┘
//! ```
//!
//! # Crash Recovery
//!
//! `_meta.json` is the commit point of a generation: it is rewritten
//! atomically, after the generation directory and `best.brn` are complete.
//! A generation directory whose index is not yet recorded in the meta is
//! stale and is rebuilt from scratch when the experiment resumes.

use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::Local;
use neurevo_genome::GenomeKind;
use tracing::{error, info, warn};

use crate::{
    brain::Brain,
    config::{ConfigError, TrainingConfig},
    evaluator::{FitnessEvaluator, Simulation},
    generation::{Generation, GenerationError},
    log::ExperimentLog,
    persistence::{
        self, BEST_BRAIN_FILE, EXPERIMENT_META_FILE, ExperimentMeta, LOG_FILE, PersistenceError,
    },
    pool::ContextPool,
};

#[derive(Debug, derive_more::Display, derive_more::Error, derive_more::From)]
pub enum ExperimentError {
    #[display("invalid configuration")]
    #[from]
    Config(ConfigError),
    #[display("{} exists but is not a directory", path.display())]
    NotADirectory { path: PathBuf },
    #[display("parent directory of {} does not exist", path.display())]
    MissingParentDirectory { path: PathBuf },
    #[display("{} already exists", path.display())]
    OutputExists { path: PathBuf },
    #[display("{} evolves {found} brains, configuration expects {expected}", path.display())]
    AlgorithmMismatch {
        path: PathBuf,
        expected: GenomeKind,
        found: GenomeKind,
    },
    #[display("{required} simulation contexts required, pool provides {available}")]
    InsufficientContexts { required: usize, available: usize },
    #[display("merging requires at least 2 parent experiments, got {count}")]
    InsufficientParents { count: usize },
    #[display("{} has no completed generation", path.display())]
    NoCompletedGeneration { path: PathBuf },
    #[display("{} provides {available} brains, {required} required", path.display())]
    InsufficientBrains {
        path: PathBuf,
        required: usize,
        available: usize,
    },
    #[display("generation {index} failed")]
    Generation {
        index: usize,
        source: GenerationError,
    },
    #[display("experiment storage failure")]
    #[from]
    Persistence(PersistenceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::IsVariant)]
pub enum ExperimentState {
    New,
    Resuming,
    Running,
    Completed,
    Stagnated,
    Failed,
}

/// How a finished [`Experiment::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentOutcome {
    /// The configured number of generations has been evaluated.
    Completed,
    /// Too many consecutive generations failed to improve the best fitness.
    Stagnated,
}

#[derive(Debug)]
pub struct Experiment<S> {
    dir: PathBuf,
    config: Arc<TrainingConfig>,
    evaluator: FitnessEvaluator,
    pool: ContextPool<S>,
    meta: ExperimentMeta,
    log: ExperimentLog,
    state: ExperimentState,
    previous: Option<Generation>,
}

impl<S> Experiment<S>
where
    S: Simulation,
{
    /// Starts a new experiment in `dir`, or resumes the one already there.
    pub fn open(
        dir: &Path,
        config: Arc<TrainingConfig>,
        pool: ContextPool<S>,
    ) -> Result<Self, ExperimentError> {
        let meta_path = dir.join(EXPERIMENT_META_FILE);
        let log_path = dir.join(LOG_FILE);

        if dir.exists() {
            if !dir.is_dir() {
                return Err(ExperimentError::NotADirectory {
                    path: dir.to_owned(),
                });
            }
            let mut log = ExperimentLog::open_append(&log_path, config.echo_logs)?;
            log.continued(Local::now())?;
            let resumable = check_resources(&config, &pool)
                .and_then(|()| ExperimentMeta::load(&meta_path).map_err(ExperimentError::from))
                .and_then(|meta| check_algorithm(dir, &config, meta.algorithm).map(|()| meta));
            let meta = match resumable {
                Ok(meta) => meta,
                Err(error) => {
                    record_failure(&mut log, "RESUMING EXPERIMENT", &error);
                    return Err(error);
                }
            };
            info!(
                dir = %dir.display(),
                generation = meta.generation_index,
                "resuming experiment"
            );
            return Ok(Self::new(
                dir,
                config,
                pool,
                meta,
                log,
                ExperimentState::Resuming,
            ));
        }

        check_resources(&config, &pool)?;
        create_experiment_dir(dir)?;
        let meta = ExperimentMeta::new(config.algorithm);
        meta.store(&meta_path)?;
        let mut log = ExperimentLog::create(&log_path, config.echo_logs)?;
        log.started(Local::now())?;
        log.write_echoed(&format!("Starting experiment '{}':\n", experiment_name(dir)))?;
        info!(dir = %dir.display(), "starting experiment");
        Ok(Self::new(dir, config, pool, meta, log, ExperimentState::New))
    }

    /// Creates a new experiment in `dir` whose first generation is taken from
    /// the most recently completed generations of `parents`.
    ///
    /// The merged generation is evaluated and committed as generation 0, so
    /// [`Experiment::run`] continues with generation 1. If the merge fails after
    /// `dir` was created, `dir` is left with its log but without `_meta.json`,
    /// and cannot be opened.
    pub fn merge(
        parents: &[PathBuf],
        dir: &Path,
        config: Arc<TrainingConfig>,
        pool: ContextPool<S>,
    ) -> Result<Self, ExperimentError> {
        check_resources(&config, &pool)?;
        if parents.len() < 2 {
            return Err(ExperimentError::InsufficientParents {
                count: parents.len(),
            });
        }
        if dir.exists() {
            return Err(ExperimentError::OutputExists {
                path: dir.to_owned(),
            });
        }

        create_experiment_dir(dir)?;
        let mut log = ExperimentLog::create(&dir.join(LOG_FILE), config.echo_logs)?;
        log.merged(Local::now(), parents)?;
        log.write_echoed(&format!(
            "Initializing experiment '{}':\n",
            experiment_name(dir)
        ))?;
        info!(dir = %dir.display(), parents = parents.len(), "merging experiments");

        let brains = match merged_brains(parents, &config) {
            Ok(brains) => brains,
            Err(error) => {
                record_failure(&mut log, "MERGING EXPERIMENTS", &error);
                return Err(error);
            }
        };

        // `_meta.json` is first written by the commit of the merged generation.
        let meta = ExperimentMeta::new(config.algorithm);
        let generation = Generation::from_brains(0, Arc::clone(&config), brains);
        let mut experiment = Self::new(dir, config, pool, meta, log, ExperimentState::New);
        experiment.log.write("Performing initial evaluation")?;
        experiment.evaluate_and_commit(generation)?;
        experiment
            .log
            .write_echoed("Finished initializing merged experiment.\n")?;
        Ok(experiment)
    }

    fn new(
        dir: &Path,
        config: Arc<TrainingConfig>,
        pool: ContextPool<S>,
        meta: ExperimentMeta,
        log: ExperimentLog,
        state: ExperimentState,
    ) -> Self {
        Self {
            dir: dir.to_owned(),
            evaluator: FitnessEvaluator::from_config(&config),
            config,
            pool,
            meta,
            log,
            state,
            previous: None,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn config(&self) -> &Arc<TrainingConfig> {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> ExperimentState {
        self.state
    }

    #[must_use]
    pub fn meta(&self) -> &ExperimentMeta {
        &self.meta
    }

    /// Gives the simulation contexts back to the caller.
    #[must_use]
    pub fn into_pool(self) -> ContextPool<S> {
        self.pool
    }

    /// Runs generations until the experiment completes or stagnates.
    ///
    /// Any failure is written to the experiment log, leaves the experiment
    /// `Failed`, and keeps the meta at the last committed generation.
    pub fn run(&mut self) -> Result<ExperimentOutcome, ExperimentError> {
        self.state = ExperimentState::Running;

        if self.previous.is_none()
            && let Some(last) = self.meta.last_generation()
        {
            let path = self.dir.join(persistence::generation_dir_name(last));
            let generation = Generation::load(&path, Arc::clone(&self.config))
                .map_err(|e| self.fail("LOADING", last, e.into()))?;
            self.previous = Some(generation);
        }

        loop {
            let index = self.meta.generation_index;
            if index >= self.config.max_generations {
                self.log
                    .write("Max generations reached. Ending Experiment.\n")?;
                self.state = ExperimentState::Completed;
                info!(generations = index, "experiment completed");
                return Ok(ExperimentOutcome::Completed);
            }
            if self.meta.stagnation_index >= self.config.max_generations_without_progress {
                self.log
                    .write("Progress has stagnated. Ending Experiment.\n")?;
                self.state = ExperimentState::Stagnated;
                info!(generations = index, "experiment stagnated");
                return Ok(ExperimentOutcome::Stagnated);
            }

            let path = self.dir.join(persistence::generation_dir_name(index));
            if path.exists() {
                warn!(dir = %path.display(), "removing incomplete generation");
                fs::remove_dir_all(&path)
                    .map_err(|e| self.fail("CREATING", index, PersistenceError::io(&path, e).into()))?;
            }

            self.log.write(&format!("Generation {index}: Creating"))?;
            let generation = match self.previous.take() {
                Some(previous) => previous.breed(),
                None => Ok(Generation::create(
                    index,
                    Arc::clone(&self.config),
                    &mut rand::rng(),
                )),
            }
            .map_err(|source| self.fail("CREATING", index, ExperimentError::Generation { index, source }))?;

            self.log.write(" - Evaluating")?;
            self.evaluate_and_commit(generation)?;
        }
    }

    /// Evaluates `generation`, saves it, and commits its results to the meta.
    fn evaluate_and_commit(&mut self, mut generation: Generation) -> Result<(), ExperimentError> {
        let index = generation.index();
        let evaluated = generation
            .evaluate_fitnesses(&self.evaluator, &mut self.pool)
            .and_then(|()| Ok((generation.best_brain_id()?, generation.fitness_summary()?)));
        let (best_id, summary) = match evaluated {
            Ok(evaluated) => evaluated,
            Err(source) => {
                return Err(self.fail(
                    "EVALUATING",
                    index,
                    ExperimentError::Generation { index, source },
                ));
            }
        };

        self.log
            .write(&format!(": Best Fitness = {:.2} - Saving", summary.max))?;
        info!(
            generation = index,
            best = summary.max,
            mean = summary.mean,
            "evaluated generation"
        );

        let path = self.dir.join(persistence::generation_dir_name(index));
        generation
            .save(&path)
            .map_err(|e| self.fail("SAVING", index, e.into()))?;
        self.log.write("\n")?;

        self.commit(index, best_id, &generation.brains()[best_id])?;
        self.previous = Some(generation);
        Ok(())
    }

    fn commit(&mut self, index: usize, best_id: usize, best: &Brain) -> Result<(), ExperimentError> {
        let best_fitness = best.fitness().unwrap_or_default();
        let mut meta = self.meta.clone();

        if best_fitness < meta.best_fitness + self.config.progress_improvement_threshold {
            meta.stagnation_index += 1;
        } else {
            meta.stagnation_index = 0;
        }

        if best_fitness >= meta.best_fitness {
            meta.best_fitness = best_fitness;
            meta.best_brain = ExperimentMeta::best_brain_tag(index, best_id);
            let path = self.dir.join(BEST_BRAIN_FILE);
            persistence::encode_brain(best)
                .map_err(|source| PersistenceError::Json {
                    path: path.clone(),
                    source,
                })
                .and_then(|bytes| persistence::write_atomically(&path, &bytes))
                .map_err(|e| self.fail("SAVING BEST BRAIN OF", index, e.into()))?;
        }

        meta.generation_index = index + 1;
        meta.store(&self.dir.join(EXPERIMENT_META_FILE))
            .map_err(|e| self.fail("COMMITTING", index, e.into()))?;
        self.meta = meta;
        Ok(())
    }

    /// Records a fatal error in the experiment log and marks the experiment failed.
    fn fail(&mut self, stage: &str, index: usize, error: ExperimentError) -> ExperimentError {
        self.state = ExperimentState::Failed;
        record_failure(&mut self.log, &format!("{stage} GENERATION {index}"), &error);
        error
    }
}

fn record_failure(log: &mut ExperimentLog, heading: &str, error: &ExperimentError) {
    let chain = error_chain(error);
    error!(failure = heading, error = %chain, "experiment failed");
    if let Err(log_error) = log.write_echoed(&format!("\nERROR {heading}\n{chain}\n")) {
        warn!(error = %log_error, "failed to write experiment log");
    }
}

fn check_resources<S>(
    config: &TrainingConfig,
    pool: &ContextPool<S>,
) -> Result<(), ExperimentError> {
    config.validate()?;
    if pool.available() < config.worker_count {
        return Err(ExperimentError::InsufficientContexts {
            required: config.worker_count,
            available: pool.available(),
        });
    }
    Ok(())
}

fn check_algorithm(
    dir: &Path,
    config: &TrainingConfig,
    found: GenomeKind,
) -> Result<(), ExperimentError> {
    if found == config.algorithm {
        Ok(())
    } else {
        Err(ExperimentError::AlgorithmMismatch {
            path: dir.to_owned(),
            expected: config.algorithm,
            found,
        })
    }
}

fn create_experiment_dir(dir: &Path) -> Result<(), ExperimentError> {
    if let Some(parent) = dir.parent()
        && !parent.as_os_str().is_empty()
        && !parent.is_dir()
    {
        return Err(ExperimentError::MissingParentDirectory {
            path: dir.to_owned(),
        });
    }
    fs::create_dir(dir).map_err(|e| PersistenceError::io(dir, e))?;
    Ok(())
}

/// Equal shares of brains from every parent; the last parent also provides
/// the remainder.
fn merged_brains(
    parents: &[PathBuf],
    config: &Arc<TrainingConfig>,
) -> Result<Vec<Brain>, ExperimentError> {
    let population = config.population_size;
    let share = population / parents.len();
    let mut brains = Vec::with_capacity(population);
    for (i, parent) in parents.iter().enumerate() {
        let required = if i + 1 == parents.len() {
            population - share * i
        } else {
            share
        };
        brains.extend(parent_brains(parent, config, required)?);
    }
    Ok(brains)
}

/// The first `required` brains (in id order) of the last completed generation
/// of the experiment in `parent`, as new unevaluated brains.
fn parent_brains(
    parent: &Path,
    config: &Arc<TrainingConfig>,
    required: usize,
) -> Result<Vec<Brain>, ExperimentError> {
    let meta = ExperimentMeta::load(&parent.join(EXPERIMENT_META_FILE))?;
    check_algorithm(parent, config, meta.algorithm)?;
    let last = meta
        .last_generation()
        .ok_or_else(|| ExperimentError::NoCompletedGeneration {
            path: parent.to_owned(),
        })?;
    let path = parent.join(persistence::generation_dir_name(last));
    let generation = Generation::load(&path, Arc::clone(config))?;
    if generation.len() < required {
        return Err(ExperimentError::InsufficientBrains {
            path,
            required,
            available: generation.len(),
        });
    }
    Ok(generation.brains()[..required]
        .iter()
        .map(|brain| Brain::new(brain.genome().clone()))
        .collect())
}

fn experiment_name(dir: &Path) -> String {
    dir.file_name()
        .map_or_else(|| dir.display().to_string(), |name| name.to_string_lossy().into_owned())
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let _ = write!(text, "\ncaused by: {cause}");
        source = cause.source();
    }
    text
}
