use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Default registry entry to convert.
pub const DEFAULT_MODEL_ID: &str = "distilbert/distilgpt2";
/// Default output location, relative to the working directory.
pub const DEFAULT_OUTPUT_DIR: &str = "../public/models/distilgpt2_tfjs";
/// TF.js converter default shard size (4 MiB).
pub const DEFAULT_SHARD_SIZE_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug)]
pub enum ConfigError {
    NotFound(String),
    Io(std::io::Error),
    Json(serde_json::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound(p) => write!(f, "Config file not found at: {}", p),
            ConfigError::Io(_) => write!(f, "Failed to read config file"),
            ConfigError::Json(_) => write!(f, "Failed to deserialize config JSON"),
            ConfigError::Invalid(s) => write!(f, "Invalid model spec: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self { ConfigError::Io(err) }
}
impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self { ConfigError::Json(err) }
}

/// The subset of a GPT-2 style `config.json` the exporter looks at.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SourceModelConfig {
    pub vocab_size: usize,
    #[serde(alias = "hidden_size")]
    pub n_embd: usize,
    #[serde(alias = "max_position_embeddings", default)]
    pub n_positions: Option<usize>,
    #[serde(alias = "num_hidden_layers", default)]
    pub n_layer: Option<usize>,
    #[serde(alias = "num_attention_heads", default)]
    pub n_head: Option<usize>,
    #[serde(default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub bos_token_id: Option<u32>,
    #[serde(default)]
    pub eos_token_id: Option<u32>,
}

impl SourceModelConfig {
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path.display().to_string()));
        }

        let mut file = File::open(config_path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let config: SourceModelConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }
}

/// Fixed topology of the exported heading-detection network.
///
/// The defaults mirror DistilGPT-2's vocabulary and hidden size but are not read
/// from the source model; [`HeadingModelSpec::drift_from`] reports when the two
/// disagree.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadingModelSpec {
    pub sequence_length: usize,
    pub vocab_size: usize,
    pub embedding_dim: usize,
    pub hidden_units: usize,
    pub dropout_rate: f32,
}

impl Default for HeadingModelSpec {
    fn default() -> Self {
        Self {
            sequence_length: 128,
            vocab_size: 50257,
            embedding_dim: 768,
            hidden_units: 768,
            dropout_rate: 0.1,
        }
    }
}

impl HeadingModelSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sequence_length == 0 || self.vocab_size == 0 || self.embedding_dim == 0 || self.hidden_units == 0 {
            return Err(ConfigError::Invalid(format!(
                "all dimensions must be positive, got {:?}",
                self
            )));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(ConfigError::Invalid(format!(
                "dropout rate must be in [0, 1), got {}",
                self.dropout_rate
            )));
        }
        Ok(())
    }

    /// Lists every dimension where the source config disagrees with this spec.
    pub fn drift_from(&self, source: &SourceModelConfig) -> Vec<String> {
        let mut drift = Vec::new();
        if source.vocab_size != self.vocab_size {
            drift.push(format!("vocab_size: source {} vs export {}", source.vocab_size, self.vocab_size));
        }
        if source.n_embd != self.embedding_dim {
            drift.push(format!("n_embd: source {} vs export {}", source.n_embd, self.embedding_dim));
        }
        if let Some(n_positions) = source.n_positions {
            if n_positions < self.sequence_length {
                drift.push(format!(
                    "n_positions: source {} is shorter than export sequence length {}",
                    n_positions, self.sequence_length
                ));
            }
        }
        drift
    }
}
