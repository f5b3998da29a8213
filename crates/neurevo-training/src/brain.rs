use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use neurevo_genome::Genome;
use rand::Rng;

/// Identity of a logical brain, kept across generations for as long as the
/// brain survives breeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
#[display("#{_0}")]
pub struct LineageId(u64);

impl LineageId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A genome paired with its latest fitness score.
///
/// A brain carried into the next generation keeps its [`LineageId`], whether
/// or not its genome is mutated on the way. An unmutated survivor also shares
/// the genome allocation with its record in the parent generation.
#[derive(Debug, Clone)]
pub struct Brain {
    genome: Arc<Genome>,
    lineage: LineageId,
    fitness: Option<f32>,
}

/// Compares genome and fitness; lineage is compared with [`Brain::same_lineage`].
impl PartialEq for Brain {
    fn eq(&self, other: &Self) -> bool {
        self.genome == other.genome && self.fitness == other.fitness
    }
}

impl Brain {
    /// Creates a new logical brain that has not been evaluated yet.
    #[must_use]
    pub fn new(genome: Genome) -> Self {
        Self {
            genome: Arc::new(genome),
            lineage: LineageId::next(),
            fitness: None,
        }
    }

    #[must_use]
    pub fn with_fitness(genome: Genome, fitness: f32) -> Self {
        Self {
            fitness: Some(fitness),
            ..Self::new(genome)
        }
    }

    #[must_use]
    pub fn genome(&self) -> &Genome {
        &self.genome
    }

    #[must_use]
    pub fn lineage(&self) -> LineageId {
        self.lineage
    }

    /// Latest fitness, or `None` before the first evaluation.
    #[must_use]
    pub fn fitness(&self) -> Option<f32> {
        self.fitness
    }

    /// Returns `true` if both records are the same logical brain.
    #[must_use]
    pub fn same_lineage(&self, other: &Self) -> bool {
        self.lineage == other.lineage
    }

    /// The same brain as a member of a new, not yet evaluated generation.
    #[must_use]
    pub fn carry_forward(&self) -> Self {
        Self {
            genome: Arc::clone(&self.genome),
            lineage: self.lineage,
            fitness: None,
        }
    }

    /// Mutates the genome in place; the brain keeps its lineage.
    ///
    /// A genome still shared with another record is copied first.
    pub(crate) fn mutate<R>(&mut self, rate: f64, rng: &mut R)
    where
        R: Rng + ?Sized,
    {
        Arc::make_mut(&mut self.genome).mutate(rate, rng);
    }

    pub(crate) fn set_fitness(&mut self, fitness: f32) {
        self.fitness = Some(fitness);
    }
}
