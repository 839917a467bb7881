use ndarray::{Array1, Array2, ArrayViewD, Axis};
use ndarray_stats::QuantileExt;
use rand::distributions::{Distribution, Uniform};
use rand::Rng;

use crate::config::HeadingModelSpec;
use crate::model_loader::PretrainedWeights;

pub const INPUT_LAYER: &str = "input_1";
pub const EMBEDDING_LAYER: &str = "embedding";
pub const POOLING_LAYER: &str = "global_average_pooling1d";
pub const HIDDEN_LAYER: &str = "dense";
pub const DROPOUT_LAYER: &str = "dropout";

/// Keras `RandomUniform` default bound for embeddings.
const EMBEDDING_INIT_LIMIT: f32 = 0.05;

#[derive(Debug)]
pub enum NetworkError {
    InvalidSpec(String),
    ShapeMismatch(String),
    TokenOutOfRange { token_id: u32, vocab_size: usize },
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkError::InvalidSpec(s) => write!(f, "Invalid network spec: {}", s),
            NetworkError::ShapeMismatch(s) => write!(f, "Shape mismatch: {}", s),
            NetworkError::TokenOutOfRange { token_id, vocab_size } => {
                write!(f, "Token ID {} is out of vocab size {}", token_id, vocab_size)
            }
        }
    }
}

impl std::error::Error for NetworkError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Sigmoid,
}

impl Activation {
    pub fn keras_name(&self) -> &'static str {
        match self {
            Activation::Relu => "relu",
            Activation::Sigmoid => "sigmoid",
        }
    }

    fn apply(&self, x: f32) -> f32 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::Sigmoid => 1.0 / (1.0 + libm::expf(-x)),
        }
    }
}

/// The three scalar outputs, in model output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputHead {
    IsHeading,
    HeadingLevel,
    Confidence,
}

impl OutputHead {
    pub const ALL: [OutputHead; 3] = [OutputHead::IsHeading, OutputHead::HeadingLevel, OutputHead::Confidence];

    pub fn name(&self) -> &'static str {
        match self {
            OutputHead::IsHeading => "is_heading",
            OutputHead::HeadingLevel => "heading_level",
            OutputHead::Confidence => "confidence",
        }
    }

    pub fn activation(&self) -> Activation {
        match self {
            OutputHead::HeadingLevel => Activation::Relu,
            OutputHead::IsHeading | OutputHead::Confidence => Activation::Sigmoid,
        }
    }
}

/// Fully connected layer; `kernel` is `[in, out]` as Keras stores it.
#[derive(Debug, Clone)]
pub struct Dense {
    pub name: String,
    pub kernel: Array2<f32>,
    pub bias: Array1<f32>,
    pub activation: Activation,
}

impl Dense {
    /// Glorot-uniform kernel, zero bias.
    pub fn glorot<R: Rng + ?Sized>(name: &str, fan_in: usize, fan_out: usize, activation: Activation, rng: &mut R) -> Self {
        let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
        let dist = Uniform::new(-limit, limit);
        Self {
            name: name.to_string(),
            kernel: Array2::from_shape_simple_fn((fan_in, fan_out), || dist.sample(rng)),
            bias: Array1::zeros(fan_out),
            activation,
        }
    }

    pub fn units(&self) -> usize {
        self.kernel.ncols()
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let activation = self.activation;
        (x.dot(&self.kernel) + &self.bias).mapv(|v| activation.apply(v))
    }
}

/// Output of [`HeadingNetwork::forward`]; each field is `(batch, 1)`.
#[derive(Debug, Clone)]
pub struct HeadingPrediction {
    pub is_heading: Array2<f32>,
    pub heading_level: Array2<f32>,
    pub confidence: Array2<f32>,
}

impl HeadingPrediction {
    pub fn head(&self, head: OutputHead) -> &Array2<f32> {
        match head {
            OutputHead::IsHeading => &self.is_heading,
            OutputHead::HeadingLevel => &self.heading_level,
            OutputHead::Confidence => &self.confidence,
        }
    }
}

/// A weight tensor under its TF.js manifest name, e.g. `dense/kernel`.
#[derive(Debug)]
pub struct NamedWeight<'a> {
    pub name: String,
    pub values: ArrayViewD<'a, f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightSummary {
    pub name: String,
    pub shape: Vec<usize>,
    pub min: f32,
    pub max: f32,
}

/// embedding -> mean pool -> dense(relu) -> dropout -> three scalar heads.
#[derive(Debug, Clone)]
pub struct HeadingNetwork {
    spec: HeadingModelSpec,
    embeddings: Array2<f32>,
    hidden: Dense,
    heads: [Dense; 3],
}

impl HeadingNetwork {
    /// Builds a randomly initialised network. Nothing from the pretrained
    /// checkpoint is used here; see [`HeadingNetwork::seed_embedding`].
    pub fn build<R: Rng + ?Sized>(spec: &HeadingModelSpec, rng: &mut R) -> Result<Self, NetworkError> {
        spec.validate().map_err(|e| NetworkError::InvalidSpec(e.to_string()))?;

        let embedding_dist = Uniform::new(-EMBEDDING_INIT_LIMIT, EMBEDDING_INIT_LIMIT);
        let embeddings =
            Array2::from_shape_simple_fn((spec.vocab_size, spec.embedding_dim), || embedding_dist.sample(rng));

        let hidden = Dense::glorot(HIDDEN_LAYER, spec.embedding_dim, spec.hidden_units, Activation::Relu, rng);

        let heads = OutputHead::ALL.map(|head| Dense::glorot(head.name(), spec.hidden_units, 1, head.activation(), rng));

        Ok(Self { spec: spec.clone(), embeddings, hidden, heads })
    }

    pub fn spec(&self) -> &HeadingModelSpec {
        &self.spec
    }

    pub fn embeddings(&self) -> &Array2<f32> {
        &self.embeddings
    }

    pub fn hidden(&self) -> &Dense {
        &self.hidden
    }

    pub fn heads(&self) -> &[Dense] {
        &self.heads
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.heads.iter().map(|h| h.name.as_str()).collect()
    }

    /// Replaces the random embedding table with the pretrained token embedding.
    pub fn seed_embedding(&mut self, weights: &PretrainedWeights) -> Result<(), NetworkError> {
        if weights.token_embedding.dim() != self.embeddings.dim() {
            return Err(NetworkError::ShapeMismatch(format!(
                "pretrained '{}' is {:?}, embedding table is {:?}",
                weights.tensor_name,
                weights.token_embedding.dim(),
                self.embeddings.dim()
            )));
        }
        self.embeddings.assign(&weights.token_embedding);
        Ok(())
    }

    /// Inference pass over `(batch, sequence_length)` token ids. Dropout is
    /// the identity at inference time.
    pub fn forward(&self, input_ids: &Array2<u32>) -> Result<HeadingPrediction, NetworkError> {
        let (batch, seq_len) = input_ids.dim();
        if seq_len != self.spec.sequence_length {
            return Err(NetworkError::ShapeMismatch(format!(
                "input has sequence length {}, network expects {}",
                seq_len, self.spec.sequence_length
            )));
        }

        let mut pooled = Array2::<f32>::zeros((batch, self.spec.embedding_dim));
        for (row, mut out) in input_ids.axis_iter(Axis(0)).zip(pooled.axis_iter_mut(Axis(0))) {
            for &token_id in row.iter() {
                let idx = token_id as usize;
                if idx >= self.spec.vocab_size {
                    return Err(NetworkError::TokenOutOfRange { token_id, vocab_size: self.spec.vocab_size });
                }
                out += &self.embeddings.row(idx);
            }
            out /= seq_len as f32;
        }

        let hidden = self.hidden.forward(&pooled);
        let [is_heading, heading_level, confidence] = &self.heads;
        Ok(HeadingPrediction {
            is_heading: is_heading.forward(&hidden),
            heading_level: heading_level.forward(&hidden),
            confidence: confidence.forward(&hidden),
        })
    }

    /// Weights in Keras `model.weights` order.
    pub fn weights(&self) -> Vec<NamedWeight<'_>> {
        let mut weights = vec![NamedWeight {
            name: format!("{}/embeddings", EMBEDDING_LAYER),
            values: self.embeddings.view().into_dyn(),
        }];
        for dense in std::iter::once(&self.hidden).chain(self.heads.iter()) {
            weights.push(NamedWeight { name: format!("{}/kernel", dense.name), values: dense.kernel.view().into_dyn() });
            weights.push(NamedWeight { name: format!("{}/bias", dense.name), values: dense.bias.view().into_dyn() });
        }
        weights
    }

    pub fn parameter_count(&self) -> usize {
        self.weights().iter().map(|w| w.values.len()).sum()
    }

    pub fn weight_summaries(&self) -> Vec<WeightSummary> {
        self.weights()
            .into_iter()
            .map(|w| WeightSummary {
                shape: w.values.shape().to_vec(),
                min: w.values.min().copied().unwrap_or(f32::NAN),
                max: w.values.max().copied().unwrap_or(f32::NAN),
                name: w.name,
            })
            .collect()
    }
}
