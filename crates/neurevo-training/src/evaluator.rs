//! Concurrent fitness evaluation.
//!
//! The [`FitnessEvaluator`] plays every brain of a generation through the
//! external [`Simulation`] and reports each brain's fitness: the mean score over
//! its seed list.
//!
//! # Worker Model
//!
//! ```text
//!            ┌──────────── job queue (brain id, genome copy, seeds) ───────────┐
//!            ▼                         ▼                                        ▼
//!   worker 0 (context 0)      worker 1 (context 1)         ...       worker N-1 (context N-1)
//!            └──────────────── results keyed by brain id ──────────────────────┘
//! ```
//!
//! - Each worker is a scoped OS thread that checks one context out of the
//!   [`ContextPool`] and owns it until the batch ends.
//! - Genomes are copied into the tasks; workers never touch generation state.
//! - Results are assembled by brain id, independent of completion order.
//!
//! # Failure Semantics
//!
//! The first simulation error (or panic) raises an abort flag: workers stop
//! pulling new tasks and the whole batch fails. Partial results are dropped,
//! so a caller either gets a fitness for every brain or none at all.
//! There is no timeout; a simulation that never returns blocks the batch.

use std::{
    collections::{BTreeMap, BTreeSet},
    panic::{self, AssertUnwindSafe},
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

use neurevo_genome::Genome;
use tracing::{debug, warn};

use crate::{config::TrainingConfig, pool::ContextPool};

/// Error type simulations report failures with.
pub type SimulationError = Box<dyn std::error::Error + Send + Sync>;

/// A simulation context able to score a genome.
///
/// One context is used by one worker at a time. Implementations may keep
/// mutable state (buffers, a game instance) between runs.
pub trait Simulation: Send {
    /// Plays one simulation with `genome` in control and returns its score.
    ///
    /// With `Some(seed)` the run must be deterministic for a given genome.
    fn run(&mut self, genome: &Genome, seed: Option<u64>) -> Result<f32, SimulationError>;
}

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum EvaluationError {
    #[display("{requested} workers requested but only {available} simulation contexts are available")]
    ResourceExhausted { requested: usize, available: usize },
    #[display("brain {brain_id} was submitted more than once")]
    DuplicateTask { brain_id: usize },
    #[display("brain {brain_id} has no simulations to run")]
    NoSeeds { brain_id: usize },
    #[display("simulation failed for brain {brain_id}: {error}")]
    SimulationFailed {
        brain_id: usize,
        error: SimulationError,
    },
    #[display("simulation panicked for brain {brain_id}")]
    SimulationPanicked { brain_id: usize },
    #[display("brain {brain_id} scored a non-finite fitness {fitness}")]
    NonFiniteFitness { brain_id: usize, fitness: f32 },
    #[display("evaluation worker {worker} terminated unexpectedly")]
    WorkerLost { worker: usize },
}

/// One brain to evaluate.
#[derive(Debug, Clone)]
pub struct EvalTask {
    pub brain_id: usize,
    pub genome: Genome,
    pub seeds: Vec<Option<u64>>,
}

#[derive(Debug)]
struct WorkerReport<S> {
    context: Option<S>,
    results: Vec<(usize, f32)>,
    failure: Option<EvaluationError>,
}

/// Runs evaluation tasks on a bounded set of workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitnessEvaluator {
    worker_count: usize,
}

impl FitnessEvaluator {
    /// # Panics
    ///
    /// Panics if `worker_count` is zero.
    #[must_use]
    pub fn new(worker_count: usize) -> Self {
        assert!(worker_count > 0, "at least one worker is required");
        Self { worker_count }
    }

    #[must_use]
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self::new(config.worker_count)
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Evaluates every task and returns the fitness of each brain id.
    ///
    /// Fails with [`EvaluationError::ResourceExhausted`] before running anything
    /// if the pool cannot provide one context per worker.
    pub fn evaluate<S>(
        &self,
        pool: &mut ContextPool<S>,
        tasks: Vec<EvalTask>,
    ) -> Result<BTreeMap<usize, f32>, EvaluationError>
    where
        S: Simulation,
    {
        let mut ids = BTreeSet::new();
        for task in &tasks {
            if !ids.insert(task.brain_id) {
                return Err(EvaluationError::DuplicateTask {
                    brain_id: task.brain_id,
                });
            }
            if task.seeds.is_empty() {
                return Err(EvaluationError::NoSeeds {
                    brain_id: task.brain_id,
                });
            }
        }

        let contexts =
            pool.checkout_many(self.worker_count)
                .ok_or(EvaluationError::ResourceExhausted {
                    requested: self.worker_count,
                    available: pool.available(),
                })?;
        debug!(
            tasks = tasks.len(),
            workers = self.worker_count,
            "starting evaluation batch"
        );

        let task_count = tasks.len();
        let (job_tx, job_rx) = crossbeam_channel::unbounded();
        for task in tasks {
            // The receiver is alive until the end of this function.
            let _ = job_tx.send(task);
        }
        drop(job_tx);

        let abort = AtomicBool::new(false);
        let reports: Vec<WorkerReport<S>> = thread::scope(|s| {
            let handles: Vec<_> = contexts
                .into_iter()
                .map(|context| {
                    let job_rx = job_rx.clone();
                    let abort = &abort;
                    s.spawn(move || run_worker(context, &job_rx, abort))
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(worker, handle)| {
                    handle.join().unwrap_or_else(|_| WorkerReport {
                        context: None,
                        results: vec![],
                        failure: Some(EvaluationError::WorkerLost { worker }),
                    })
                })
                .collect()
        });

        let mut fitnesses = BTreeMap::new();
        let mut first_failure = None;
        let mut lost = 0;
        for report in reports {
            match report.context {
                Some(context) => pool.checkin(context),
                None => lost += 1,
            }
            fitnesses.extend(report.results);
            if first_failure.is_none() {
                first_failure = report.failure;
            }
        }
        if lost > 0 {
            warn!(lost, "simulation contexts lost during evaluation");
            pool.forget(lost);
        }
        if let Some(failure) = first_failure {
            return Err(failure);
        }

        debug_assert_eq!(
            fitnesses.len(),
            task_count,
            "every task must produce exactly one result"
        );
        debug!(brains = fitnesses.len(), "evaluation batch finished");
        Ok(fitnesses)
    }
}

fn run_worker<S>(
    mut context: S,
    job_rx: &crossbeam_channel::Receiver<EvalTask>,
    abort: &AtomicBool,
) -> WorkerReport<S>
where
    S: Simulation,
{
    let mut results = vec![];
    while !abort.load(Ordering::Acquire) {
        let Ok(task) = job_rx.try_recv() else {
            break;
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| average_fitness(&mut context, &task)));
        match outcome {
            Ok(Ok(fitness)) => results.push((task.brain_id, fitness)),
            Ok(Err(failure)) => {
                abort.store(true, Ordering::Release);
                return WorkerReport {
                    context: Some(context),
                    results,
                    failure: Some(failure),
                };
            }
            Err(_) => {
                abort.store(true, Ordering::Release);
                // The context may be left in an inconsistent state; drop it.
                return WorkerReport {
                    context: None,
                    results,
                    failure: Some(EvaluationError::SimulationPanicked {
                        brain_id: task.brain_id,
                    }),
                };
            }
        }
    }
    WorkerReport {
        context: Some(context),
        results,
        failure: None,
    }
}

fn average_fitness<S>(context: &mut S, task: &EvalTask) -> Result<f32, EvaluationError>
where
    S: Simulation,
{
    let mut total = 0.0;
    for seed in &task.seeds {
        total += context
            .run(&task.genome, *seed)
            .map_err(|error| EvaluationError::SimulationFailed {
                brain_id: task.brain_id,
                error,
            })?;
    }
    #[expect(clippy::cast_precision_loss)]
    let fitness = total / task.seeds.len() as f32;
    if !fitness.is_finite() {
        return Err(EvaluationError::NonFiniteFitness {
            brain_id: task.brain_id,
            fitness,
        });
    }
    Ok(fitness)
}
