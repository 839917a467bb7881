use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::path::PathBuf;

use crate::config::{ConfigError, HeadingModelSpec, SourceModelConfig, DEFAULT_MODEL_ID, DEFAULT_OUTPUT_DIR, DEFAULT_SHARD_SIZE_BYTES};
use crate::model_loader::{self, ModelLoaderError, PretrainedWeights};
use crate::network::{HeadingNetwork, NetworkError};
use crate::registry::{ModelRegistry, PretrainedArtifacts, RegistryError};
use crate::tfjs::{self, TfjsError};
use crate::tokenizer::{TokenizerError, TokenizerWrapper};

#[derive(Debug)]
pub enum ExportError {
    Registry(RegistryError),
    Config(ConfigError),
    Tokenizer(TokenizerError),
    ModelLoader(ModelLoaderError),
    Network(NetworkError),
    Tfjs(TfjsError),
    Io(std::io::Error),
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::Registry(e) => write!(f, "Registry error: {}", e),
            ExportError::Config(e) => write!(f, "Config error: {}", e),
            ExportError::Tokenizer(e) => write!(f, "Tokenizer error: {}", e),
            ExportError::ModelLoader(e) => write!(f, "ModelLoader error: {}", e),
            ExportError::Network(e) => write!(f, "Network error: {}", e),
            ExportError::Tfjs(e) => write!(f, "TF.js export error: {}", e),
            ExportError::Io(_) => write!(f, "IO error"),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Registry(e) => std::error::Error::source(e),
            ExportError::Config(e) => std::error::Error::source(e),
            ExportError::Tokenizer(e) => std::error::Error::source(e),
            ExportError::ModelLoader(e) => std::error::Error::source(e),
            ExportError::Network(e) => std::error::Error::source(e),
            ExportError::Tfjs(e) => std::error::Error::source(e),
            ExportError::Io(e) => Some(e),
        }
    }
}

impl From<RegistryError> for ExportError {
    fn from(err: RegistryError) -> Self { ExportError::Registry(err) }
}
impl From<ConfigError> for ExportError {
    fn from(err: ConfigError) -> Self { ExportError::Config(err) }
}
impl From<TokenizerError> for ExportError {
    fn from(err: TokenizerError) -> Self { ExportError::Tokenizer(err) }
}
impl From<ModelLoaderError> for ExportError {
    fn from(err: ModelLoaderError) -> Self { ExportError::ModelLoader(err) }
}
impl From<NetworkError> for ExportError {
    fn from(err: NetworkError) -> Self { ExportError::Network(err) }
}
impl From<TfjsError> for ExportError {
    fn from(err: TfjsError) -> Self { ExportError::Tfjs(err) }
}
impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self { ExportError::Io(err) }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub model_id: String,
    pub output_dir: PathBuf,
    pub spec: HeadingModelSpec,
    /// Fixed RNG seed for the random initialisers; entropy when `None`.
    pub seed: Option<u64>,
    /// Copy the pretrained token embedding into the exported embedding table.
    pub seed_embedding_from_pretrained: bool,
    pub shard_size_bytes: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            spec: HeadingModelSpec::default(),
            seed: None,
            seed_embedding_from_pretrained: true,
            shard_size_bytes: DEFAULT_SHARD_SIZE_BYTES,
        }
    }
}

/// Everything loaded from the registry for one model id.
#[derive(Debug)]
pub struct AcquiredModel {
    pub artifacts: PretrainedArtifacts,
    pub config: SourceModelConfig,
    pub tokenizer: TokenizerWrapper,
    pub weights: PretrainedWeights,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingSource {
    Random,
    Pretrained(String),
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub output_dir: PathBuf,
    pub model_json: PathBuf,
    pub weight_shards: Vec<PathBuf>,
    pub tokenizer_files: Vec<PathBuf>,
    pub parameter_count: usize,
    pub embedding_source: EmbeddingSource,
}

/// Resolves `model_id` and loads its tokenizer, config and token embedding.
pub fn acquire(registry: &dyn ModelRegistry, model_id: &str) -> Result<AcquiredModel, ExportError> {
    log::info!("Resolving pretrained model '{}'", model_id);
    let artifacts = registry.resolve(model_id)?;

    let config = SourceModelConfig::load(&artifacts.config)?;
    log::info!(
        "Source config: model_type={:?} vocab_size={} n_embd={} n_layer={:?}",
        config.model_type,
        config.vocab_size,
        config.n_embd,
        config.n_layer
    );

    let tokenizer = TokenizerWrapper::load(&artifacts.tokenizer)?;
    log::info!("Tokenizer loaded ({} tokens)", tokenizer.get_vocab_size());

    let weights = model_loader::load_token_embedding(&artifacts.weights)?;

    Ok(AcquiredModel { artifacts, config, tokenizer, weights })
}

/// Builds the randomly initialised export network.
pub fn reconstruct(spec: &HeadingModelSpec, seed: Option<u64>) -> Result<HeadingNetwork, ExportError> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let network = HeadingNetwork::build(spec, &mut rng)?;
    log::info!("Built heading network with {} parameters", network.parameter_count());
    Ok(network)
}

/// Applies the pretrained token embedding when it fits the export spec.
fn seed_from_pretrained(network: &mut HeadingNetwork, acquired: &AcquiredModel) -> EmbeddingSource {
    let drift = network.spec().drift_from(&acquired.config);
    for item in &drift {
        log::warn!("Export architecture differs from source model: {}", item);
    }

    match network.seed_embedding(&acquired.weights) {
        Ok(()) => {
            log::info!("Embedding table seeded from '{}'", acquired.weights.tensor_name);
            EmbeddingSource::Pretrained(acquired.weights.tensor_name.clone())
        }
        Err(e) => {
            log::warn!("{}; keeping random embedding table", e);
            EmbeddingSource::Random
        }
    }
}

/// Runs acquisition, reconstruction and export in sequence. Nothing is
/// written until the model has been fully acquired.
pub fn convert(options: &ExportOptions, registry: &dyn ModelRegistry) -> Result<ExportSummary, ExportError> {
    if options.shard_size_bytes == 0 {
        return Err(TfjsError::InvalidShardSize(0).into());
    }

    let acquired = acquire(registry, &options.model_id)?;
    let mut network = reconstruct(&options.spec, options.seed)?;

    let embedding_source = if options.seed_embedding_from_pretrained {
        seed_from_pretrained(&mut network, &acquired)
    } else {
        log::warn!("Pretrained weights are not used; the exported network is randomly initialised");
        EmbeddingSource::Random
    };

    if log::log_enabled!(log::Level::Debug) {
        for summary in network.weight_summaries() {
            log::debug!("{} {:?} min={} max={}", summary.name, summary.shape, summary.min, summary.max);
        }
    }

    fs::create_dir_all(&options.output_dir)?;

    let model_files = tfjs::write_layers_model(&network, &options.output_dir, options.shard_size_bytes)?;
    let tokenizer_files = acquired.tokenizer.save_vocabulary(&options.output_dir, &acquired.config)?;

    Ok(ExportSummary {
        output_dir: options.output_dir.clone(),
        model_json: model_files.model_json,
        weight_shards: model_files.shards,
        tokenizer_files,
        parameter_count: network.parameter_count(),
        embedding_source,
    })
}
