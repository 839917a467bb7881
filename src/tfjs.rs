// src/tfjs.rs
//
// TensorFlow.js "layers-model" writer: model.json (Keras topology + weights
// manifest) and little-endian float32 weight shards.

use serde::Serialize;
use serde_json::{json, Value};
use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::HeadingModelSpec;
use crate::network::{
    HeadingNetwork, OutputHead, DROPOUT_LAYER, EMBEDDING_LAYER, HIDDEN_LAYER, INPUT_LAYER, POOLING_LAYER,
};

pub const MODEL_JSON: &str = "model.json";
pub const LAYERS_MODEL_FORMAT: &str = "layers-model";
const KERAS_VERSION: &str = "2.3.1";
const WEIGHT_GROUP: usize = 1;

#[derive(Debug)]
pub enum TfjsError {
    Io(io::Error),
    Json(serde_json::Error),
    InvalidShardSize(usize),
    NonContiguous(String),
}

impl std::fmt::Display for TfjsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TfjsError::Io(_) => write!(f, "IO error"),
            TfjsError::Json(_) => write!(f, "JSON error"),
            TfjsError::InvalidShardSize(n) => write!(f, "Shard size must be positive, got {}", n),
            TfjsError::NonContiguous(name) => write!(f, "Weight '{}' is not contiguous in memory", name),
        }
    }
}

impl std::error::Error for TfjsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TfjsError::Io(e) => Some(e),
            TfjsError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TfjsError {
    fn from(err: io::Error) -> Self { TfjsError::Io(err) }
}
impl From<serde_json::Error> for TfjsError {
    fn from(err: serde_json::Error) -> Self { TfjsError::Json(err) }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct WeightSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: &'static str,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct WeightGroup {
    pub paths: Vec<String>,
    pub weights: Vec<WeightSpec>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ModelJson {
    format: &'static str,
    generated_by: String,
    converted_by: Option<String>,
    model_topology: Value,
    weights_manifest: Vec<WeightGroup>,
}

/// Files produced by [`write_layers_model`].
#[derive(Debug, Clone)]
pub struct LayersModelFiles {
    pub model_json: PathBuf,
    pub shards: Vec<PathBuf>,
    pub total_weight_bytes: usize,
}

pub fn shard_file_name(group: usize, index: usize, count: usize) -> String {
    format!("group{}-shard{}of{}.bin", group, index, count)
}

fn is_shard_file(name: &str) -> bool {
    name.starts_with("group") && name.contains("-shard") && name.ends_with(".bin")
}

/// Byte size of each shard when `total_bytes` is split into `shard_size` pieces.
pub fn shard_plan(total_bytes: usize, shard_size: usize) -> Vec<usize> {
    if shard_size == 0 {
        return Vec::new();
    }
    let full = total_bytes / shard_size;
    let rest = total_bytes % shard_size;
    let mut sizes = vec![shard_size; full];
    if rest > 0 {
        sizes.push(rest);
    }
    sizes
}

fn keras_layer(class_name: &str, config: Value, inbound: Option<&str>) -> Value {
    let name = config["name"].clone();
    let inbound_nodes = match inbound {
        Some(src) => json!([[[src, 0, 0, {}]]]),
        None => json!([]),
    };
    json!({
        "class_name": class_name,
        "config": config,
        "name": name,
        "inbound_nodes": inbound_nodes,
    })
}

fn dense_config(name: &str, units: usize, activation: &str) -> Value {
    json!({
        "name": name,
        "trainable": true,
        "dtype": "float32",
        "units": units,
        "activation": activation,
        "use_bias": true,
        "kernel_initializer": { "class_name": "GlorotUniform", "config": { "seed": null } },
        "bias_initializer": { "class_name": "Zeros", "config": {} },
        "kernel_regularizer": null,
        "bias_regularizer": null,
        "activity_regularizer": null,
        "kernel_constraint": null,
        "bias_constraint": null,
    })
}

/// Keras functional-model topology for the heading network described by `spec`.
pub fn model_topology(spec: &HeadingModelSpec) -> Value {
    let mut layers = vec![
        keras_layer(
            "InputLayer",
            json!({
                "batch_input_shape": [null, spec.sequence_length],
                "dtype": "float32",
                "sparse": false,
                "ragged": false,
                "name": INPUT_LAYER,
            }),
            None,
        ),
        keras_layer(
            "Embedding",
            json!({
                "name": EMBEDDING_LAYER,
                "trainable": true,
                "batch_input_shape": [null, null],
                "dtype": "float32",
                "input_dim": spec.vocab_size,
                "output_dim": spec.embedding_dim,
                "embeddings_initializer": {
                    "class_name": "RandomUniform",
                    "config": { "minval": -0.05, "maxval": 0.05, "seed": null }
                },
                "embeddings_regularizer": null,
                "activity_regularizer": null,
                "embeddings_constraint": null,
                "mask_zero": false,
                "input_length": null,
            }),
            Some(INPUT_LAYER),
        ),
        keras_layer(
            "GlobalAveragePooling1D",
            json!({
                "name": POOLING_LAYER,
                "trainable": true,
                "dtype": "float32",
                "data_format": "channels_last",
                "keepdims": false,
            }),
            Some(EMBEDDING_LAYER),
        ),
        keras_layer("Dense", dense_config(HIDDEN_LAYER, spec.hidden_units, "relu"), Some(POOLING_LAYER)),
        keras_layer(
            "Dropout",
            json!({
                "name": DROPOUT_LAYER,
                "trainable": true,
                "dtype": "float32",
                "rate": spec.dropout_rate,
                "noise_shape": null,
                "seed": null,
            }),
            Some(HIDDEN_LAYER),
        ),
    ];
    for head in OutputHead::ALL {
        layers.push(keras_layer(
            "Dense",
            dense_config(head.name(), 1, head.activation().keras_name()),
            Some(DROPOUT_LAYER),
        ));
    }

    let output_layers: Vec<Value> = OutputHead::ALL.iter().map(|h| json!([h.name(), 0, 0])).collect();

    json!({
        "class_name": "Model",
        "config": {
            "name": "model",
            "layers": layers,
            "input_layers": [[INPUT_LAYER, 0, 0]],
            "output_layers": output_layers,
        },
        "keras_version": KERAS_VERSION,
        "backend": "tensorflow",
    })
}

fn le_bytes(values: &[f32]) -> Cow<'_, [u8]> {
    if cfg!(target_endian = "little") {
        Cow::Borrowed(bytemuck::cast_slice(values))
    } else {
        Cow::Owned(values.iter().flat_map(|v| v.to_le_bytes()).collect())
    }
}

/// Streams a byte sequence into consecutive fixed-size shard files.
struct ShardWriter<'a> {
    dir: &'a Path,
    plan: Vec<usize>,
    current: Option<BufWriter<File>>,
    remaining: usize,
    written: Vec<PathBuf>,
}

impl<'a> ShardWriter<'a> {
    fn new(dir: &'a Path, plan: Vec<usize>) -> Self {
        Self { dir, plan, current: None, remaining: 0, written: Vec::new() }
    }

    fn open_next(&mut self) -> Result<(), TfjsError> {
        if let Some(mut done) = self.current.take() {
            done.flush()?;
        }
        let index = self.written.len();
        let size = *self.plan.get(index).ok_or_else(|| {
            TfjsError::Io(io::Error::new(io::ErrorKind::InvalidInput, "weight data exceeds shard plan"))
        })?;
        let path = self.dir.join(shard_file_name(WEIGHT_GROUP, index + 1, self.plan.len()));
        self.current = Some(BufWriter::new(File::create(&path)?));
        self.remaining = size;
        self.written.push(path);
        Ok(())
    }

    fn write(&mut self, mut bytes: &[u8]) -> Result<(), TfjsError> {
        while !bytes.is_empty() {
            if self.current.is_none() || self.remaining == 0 {
                self.open_next()?;
            }
            let take = self.remaining.min(bytes.len());
            if let Some(writer) = self.current.as_mut() {
                writer.write_all(&bytes[..take])?;
            }
            self.remaining -= take;
            bytes = &bytes[take..];
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<PathBuf>, TfjsError> {
        if let Some(mut last) = self.current.take() {
            last.flush()?;
        }
        Ok(self.written)
    }
}

/// Deletes shard files left over from a previous export into `dir`.
fn remove_stale_shards(dir: &Path) -> Result<usize, TfjsError> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_str().map(is_shard_file).unwrap_or(false) && entry.path().is_file() {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Writes `network` into `dir` as a TF.js layers-model. `dir` must exist.
pub fn write_layers_model(network: &HeadingNetwork, dir: &Path, shard_size: usize) -> Result<LayersModelFiles, TfjsError> {
    if shard_size == 0 {
        return Err(TfjsError::InvalidShardSize(shard_size));
    }

    let removed = remove_stale_shards(dir)?;
    if removed > 0 {
        log::debug!("Removed {} stale weight shards from {}", removed, dir.display());
    }

    let weights = network.weights();
    let element_size = std::mem::size_of::<f32>();
    let total_weight_bytes: usize = weights.iter().map(|w| w.values.len() * element_size).sum();
    let plan = shard_plan(total_weight_bytes, shard_size);

    let mut writer = ShardWriter::new(dir, plan);
    let mut specs = Vec::with_capacity(weights.len());
    for weight in &weights {
        let values = weight
            .values
            .as_slice()
            .ok_or_else(|| TfjsError::NonContiguous(weight.name.clone()))?;
        writer.write(&le_bytes(values))?;
        specs.push(WeightSpec {
            name: weight.name.clone(),
            shape: weight.values.shape().to_vec(),
            dtype: "float32",
        });
    }
    let shards = writer.finish()?;

    let shard_names = shards
        .iter()
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
        .collect();

    let model_json = ModelJson {
        format: LAYERS_MODEL_FORMAT,
        generated_by: format!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        converted_by: None,
        model_topology: model_topology(network.spec()),
        weights_manifest: vec![WeightGroup { paths: shard_names, weights: specs }],
    };

    let model_json_path = dir.join(MODEL_JSON);
    let file = BufWriter::new(File::create(&model_json_path)?);
    serde_json::to_writer(file, &model_json)?;

    log::info!(
        "Wrote {} ({} weights, {} bytes in {} shards)",
        model_json_path.display(),
        weights.len(),
        total_weight_bytes,
        shards.len()
    );

    Ok(LayersModelFiles { model_json: model_json_path, shards, total_weight_bytes })
}
