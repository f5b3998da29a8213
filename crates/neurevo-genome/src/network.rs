//! Feed-forward network genome.
//!
//! A [`WeightMatrixGenome`] is a fully connected feed-forward network stored as
//! one weight matrix per layer. Layer `i` has shape `(in_i + 1, out_i)`: row
//! `r < in_i` holds the weights from input node `r`, and the extra last row
//! holds the bias weights (the bias input is always `1.0`).
//!
//! ```text
//! inputs ─▶ [layer 0] ─activation─▶ ... ─▶ [layer N] ─threshold─▶ actions
//! ```
//!
//! Hidden layers use the configured [`Activation`]; the output layer is passed
//! through a step function at `output_threshold`, producing one boolean action
//! per output node.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{CrossoverError, CrossoverPolicy, GenomeError, matrix::Matrix, weights};

/// Topology of a freshly initialized network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkShape {
    /// Number of sensor features fed to the network.
    pub inputs: usize,
    /// Number of action outputs.
    pub outputs: usize,
    pub hidden_layers: usize,
    pub hidden_layer_size: usize,
}

impl Default for NetworkShape {
    fn default() -> Self {
        Self {
            inputs: 8,
            outputs: 4,
            hidden_layers: 1,
            hidden_layer_size: 8,
        }
    }
}

impl NetworkShape {
    /// Returns `(rows, cols)` of every layer matrix, bias row included.
    pub fn layer_shapes(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..=self.hidden_layers).map(|i| {
            let in_size = if i == 0 {
                self.inputs
            } else {
                self.hidden_layer_size
            };
            let out_size = if i == self.hidden_layers {
                self.outputs
            } else {
                self.hidden_layer_size
            };
            (in_size + 1, out_size)
        })
    }

    /// Checks that every layer has at least one output node.
    pub fn validate(&self) -> Result<(), GenomeError> {
        if self.outputs == 0 || (self.hidden_layers > 0 && self.hidden_layer_size == 0) {
            return Err(GenomeError::EmptyLayer);
        }
        Ok(())
    }
}

/// Activation applied to hidden layer outputs.
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
pub enum Activation {
    #[default]
    Relu,
    Sigmoid,
    Softplus,
    Log,
}

impl Activation {
    #[must_use]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Self::Relu => x.max(0.0),
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::Softplus => x.exp().ln_1p(),
            Self::Log => x.ln(),
        }
    }
}

/// Parameters the decision layer uses to turn network outputs into actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThinkParams {
    pub hidden_activation: Activation,
    /// Output nodes strictly above this value fire their action.
    pub output_threshold: f32,
    /// Actions produced by a parameterless genome, regardless of input.
    pub fixed_actions: Vec<bool>,
}

impl Default for ThinkParams {
    fn default() -> Self {
        Self {
            hidden_activation: Activation::Relu,
            output_threshold: 0.5,
            fixed_actions: vec![true, false, true, true],
        }
    }
}

/// Genome made of per-layer weight matrices.
///
/// Serializes as the nested array of layers; deserialization goes through
/// [`WeightMatrixGenome::from_layers`] so a loaded genome is always connected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "Vec<Matrix>", try_from = "Vec<Matrix>")]
pub struct WeightMatrixGenome {
    layers: Vec<Matrix>,
}

impl From<WeightMatrixGenome> for Vec<Matrix> {
    fn from(genome: WeightMatrixGenome) -> Self {
        genome.layers
    }
}

impl TryFrom<Vec<Matrix>> for WeightMatrixGenome {
    type Error = GenomeError;

    fn try_from(layers: Vec<Matrix>) -> Result<Self, Self::Error> {
        Self::from_layers(layers)
    }
}

impl WeightMatrixGenome {
    /// Builds a network of the given shape with weights uniform in `[-1, 1]`.
    pub fn random<R>(shape: &NetworkShape, rng: &mut R) -> Self
    where
        R: Rng + ?Sized,
    {
        let layers = shape
            .layer_shapes()
            .map(|(rows, cols)| Matrix::from_fn(rows, cols, |_, _| weights::random_weight(rng)))
            .collect();
        Self { layers }
    }

    /// Wraps existing layers, checking that consecutive layers connect.
    pub fn from_layers(layers: Vec<Matrix>) -> Result<Self, GenomeError> {
        if layers.is_empty() {
            return Err(GenomeError::NoLayers);
        }
        for (layer, pair) in layers.windows(2).enumerate() {
            if pair[0].cols() + 1 != pair[1].rows() {
                return Err(GenomeError::Disconnected {
                    layer: layer + 1,
                    expected_rows: pair[0].cols() + 1,
                    actual_rows: pair[1].rows(),
                });
            }
        }
        Ok(Self { layers })
    }

    #[must_use]
    pub fn layers(&self) -> &[Matrix] {
        &self.layers
    }

    /// Number of sensor inputs the network expects.
    #[must_use]
    pub fn input_size(&self) -> usize {
        self.layers[0].rows() - 1
    }

    /// Total number of weights across all layers.
    #[must_use]
    pub fn weight_count(&self) -> usize {
        self.layers.iter().map(|m| m.values().len()).sum()
    }

    pub fn crossover<R>(
        &self,
        other: &Self,
        policy: CrossoverPolicy,
        rng: &mut R,
    ) -> Result<Self, CrossoverError>
    where
        R: Rng + ?Sized,
    {
        if self.layers.len() != other.layers.len() {
            return Err(CrossoverError::LayerCountMismatch {
                left: self.layers.len(),
                right: other.layers.len(),
            });
        }
        // Check every layer before drawing anything from the rng.
        for (layer, (a, b)) in self.layers.iter().zip(&other.layers).enumerate() {
            if a.shape() != b.shape() {
                return Err(CrossoverError::ShapeMismatch {
                    layer,
                    left: a.shape(),
                    right: b.shape(),
                });
            }
        }

        let layers = self
            .layers
            .iter()
            .zip(&other.layers)
            .map(|(a, b)| match policy {
                CrossoverPolicy::Uniform => {
                    let values = weights::uniform_crossover(a.values(), b.values(), rng);
                    Matrix::from_fn(a.rows(), a.cols(), |row, col| values[row * a.cols() + col])
                }
                CrossoverPolicy::Split => weights::split_crossover(a, b, rng),
            })
            .collect();
        Ok(Self { layers })
    }

    pub fn mutate<R>(&mut self, rate: f64, rng: &mut R)
    where
        R: Rng + ?Sized,
    {
        for layer in &mut self.layers {
            weights::mutate(layer.values_mut(), rate, rng);
        }
    }

    /// Feeds `inputs` forward and returns the raw output layer values.
    pub fn forward(&self, inputs: &[f32], activation: Activation) -> Result<Vec<f32>, GenomeError> {
        if inputs.len() != self.input_size() {
            return Err(GenomeError::InputSize {
                expected: self.input_size(),
                actual: inputs.len(),
            });
        }
        let (output_layer, hidden_layers) = self
            .layers
            .split_last()
            .ok_or(GenomeError::NoLayers)?;

        let mut values = inputs.to_vec();
        for layer in hidden_layers {
            values.push(1.0);
            values = layer
                .left_mul(&values)
                .into_iter()
                .map(|x| activation.apply(x))
                .collect();
        }
        values.push(1.0);
        Ok(output_layer.left_mul(&values))
    }

    /// Feeds `inputs` forward and thresholds the outputs into actions.
    pub fn think(&self, inputs: &[f32], params: &ThinkParams) -> Result<Vec<bool>, GenomeError> {
        let outputs = self.forward(inputs, params.hidden_activation)?;
        Ok(outputs
            .into_iter()
            .map(|x| x > params.output_threshold)
            .collect())
    }
}
