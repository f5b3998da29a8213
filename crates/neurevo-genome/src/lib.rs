//! Heritable state of evolved decision-making brains.
//!
//! A [`Genome`] is the part of a brain that is inherited, recombined and
//! mutated by the training loop. Two representations exist:
//!
//! - [`Genome::Parameterless`] - a hard-coded controller with no state. Crossover
//!   yields a fresh instance and mutation does nothing.
//! - [`Genome::WeightMatrix`] - a feed-forward network
//!   ([`WeightMatrixGenome`]) whose weights are the genes.
//!
//! # Collaborator Interface
//!
//! The genome does not know about the world it acts in. The decision layer
//! implements [`Sense`] to extract a feature vector from its world state, and
//! [`Genome::sense_and_think`] turns those features into a vector of boolean
//! actions.
//!
//! # Serialization
//!
//! [`Genome::to_bytes`] stores only the genes: the nested weight arrays as JSON
//! for a network, and nothing at all for a parameterless genome. Fitness is
//! not part of the genome and is stored by the training crate alongside it.

use rand::Rng;
use serde::{Deserialize, Serialize};

pub use self::{
    matrix::{Matrix, MatrixShapeError},
    network::{Activation, NetworkShape, ThinkParams, WeightMatrixGenome},
};

pub mod matrix;
pub mod network;
pub mod weights;

/// Error returned when two genomes cannot be recombined.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum CrossoverError {
    #[display("cannot cross a {left} genome with a {right} genome")]
    VariantMismatch { left: GenomeKind, right: GenomeKind },
    #[display("cannot cross networks with {left} and {right} layers")]
    LayerCountMismatch { left: usize, right: usize },
    #[display("layer {layer} shapes differ: {left:?} vs {right:?}")]
    ShapeMismatch {
        layer: usize,
        left: (usize, usize),
        right: (usize, usize),
    },
}

/// Error returned when a genome cannot be built, decoded or evaluated.
#[derive(Debug, derive_more::Display, derive_more::Error, derive_more::From)]
pub enum GenomeError {
    #[display("network has no layers")]
    NoLayers,
    #[display("network has a layer without output nodes")]
    EmptyLayer,
    #[display("layer {layer} has {actual_rows} rows, expected {expected_rows}")]
    Disconnected {
        layer: usize,
        expected_rows: usize,
        actual_rows: usize,
    },
    #[display("network expects {expected} inputs, got {actual}")]
    InputSize { expected: usize, actual: usize },
    #[display("parameterless genome data must be empty, got {len} bytes")]
    UnexpectedData { len: usize },
    #[display("invalid network data")]
    #[from]
    Json(serde_json::Error),
}

/// How two network genomes exchange weights.
#[derive(
    Default,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::FromStr,
)]
#[serde(rename_all = "kebab-case")]
pub enum CrossoverPolicy {
    /// Every weight comes from either parent with equal probability.
    #[default]
    Uniform,
    /// One rectangular block per layer from the first parent, the rest from the second.
    Split,
}

/// Genome representation, also used as the experiment's algorithm identity.
#[derive(
    Default,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::FromStr,
)]
#[serde(rename_all = "kebab-case")]
pub enum GenomeKind {
    Parameterless,
    #[default]
    WeightMatrix,
}

impl GenomeKind {
    /// Short name written to experiment records and artifact file names.
    #[must_use]
    pub fn algorithm_name(self) -> &'static str {
        match self {
            Self::Parameterless => "Simple",
            Self::WeightMatrix => "NN",
        }
    }

    #[must_use]
    pub fn from_algorithm_name(name: &str) -> Option<Self> {
        [Self::Parameterless, Self::WeightMatrix]
            .into_iter()
            .find(|kind| kind.algorithm_name() == name)
    }
}

/// Extracts a feature vector from a world state.
///
/// Implemented by the decision layer that owns the world representation.
pub trait Sense<W: ?Sized> {
    fn sense(&self, world: &W) -> Vec<f32>;
}

/// Heritable state of a brain.
#[derive(Debug, Clone, PartialEq, derive_more::IsVariant)]
pub enum Genome {
    Parameterless,
    WeightMatrix(WeightMatrixGenome),
}

impl Genome {
    #[must_use]
    pub fn kind(&self) -> GenomeKind {
        match self {
            Self::Parameterless => GenomeKind::Parameterless,
            Self::WeightMatrix(_) => GenomeKind::WeightMatrix,
        }
    }

    /// Senses `world` through `sensor` and decides on the actions to take.
    pub fn sense_and_think<W, S>(
        &self,
        sensor: &S,
        world: &W,
        params: &ThinkParams,
    ) -> Result<Vec<bool>, GenomeError>
    where
        W: ?Sized,
        S: Sense<W> + ?Sized,
    {
        self.think(&sensor.sense(world), params)
    }

    pub fn think(&self, features: &[f32], params: &ThinkParams) -> Result<Vec<bool>, GenomeError> {
        match self {
            Self::Parameterless => Ok(params.fixed_actions.clone()),
            Self::WeightMatrix(network) => network.think(features, params),
        }
    }

    /// Recombines two genomes of the same representation and topology.
    pub fn crossover<R>(
        &self,
        other: &Self,
        policy: CrossoverPolicy,
        rng: &mut R,
    ) -> Result<Self, CrossoverError>
    where
        R: Rng + ?Sized,
    {
        match (self, other) {
            (Self::Parameterless, Self::Parameterless) => Ok(Self::Parameterless),
            (Self::WeightMatrix(a), Self::WeightMatrix(b)) => {
                Ok(Self::WeightMatrix(a.crossover(b, policy, rng)?))
            }
            _ => Err(CrossoverError::VariantMismatch {
                left: self.kind(),
                right: other.kind(),
            }),
        }
    }

    /// Replaces each weight with a fresh uniform value with probability `rate`.
    pub fn mutate<R>(&mut self, rate: f64, rng: &mut R)
    where
        R: Rng + ?Sized,
    {
        match self {
            Self::Parameterless => {}
            Self::WeightMatrix(network) => network.mutate(rate, rng),
        }
    }

    /// Encodes the genes of this genome.
    pub fn to_bytes(&self) -> Result<Vec<u8>, GenomeError> {
        match self {
            Self::Parameterless => Ok(vec![]),
            Self::WeightMatrix(network) => Ok(serde_json::to_vec(network)?),
        }
    }

    /// Decodes genes written by [`Genome::to_bytes`].
    pub fn from_bytes(kind: GenomeKind, bytes: &[u8]) -> Result<Self, GenomeError> {
        match kind {
            GenomeKind::Parameterless if bytes.is_empty() => Ok(Self::Parameterless),
            GenomeKind::Parameterless => Err(GenomeError::UnexpectedData { len: bytes.len() }),
            GenomeKind::WeightMatrix => Ok(Self::WeightMatrix(serde_json::from_slice(bytes)?)),
        }
    }
}

/// Creates fresh random genomes for a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenomeFactory {
    kind: GenomeKind,
    shape: NetworkShape,
}

impl GenomeFactory {
    #[must_use]
    pub fn new(kind: GenomeKind, shape: NetworkShape) -> Self {
        Self { kind, shape }
    }

    #[must_use]
    pub fn kind(&self) -> GenomeKind {
        self.kind
    }

    pub fn create<R>(&self, rng: &mut R) -> Genome
    where
        R: Rng + ?Sized,
    {
        match self.kind {
            GenomeKind::Parameterless => Genome::Parameterless,
            GenomeKind::WeightMatrix => {
                Genome::WeightMatrix(WeightMatrixGenome::random(&self.shape, rng))
            }
        }
    }
}
