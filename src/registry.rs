// src/registry.rs

use hf_hub::api::sync::{Api, ApiBuilder, ApiError, ApiRepo};
use hf_hub::{Repo, RepoType};
use std::path::PathBuf;

pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const VOCAB_FILE: &str = "vocab.json";
pub const MERGES_FILE: &str = "merges.txt";

/// Where the tokenizer definition of a resolved model lives.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenizerFiles {
    /// A serialized `tokenizers` pipeline.
    Json(PathBuf),
    /// Raw byte-level BPE vocabulary and merges.
    VocabMerges { vocab: PathBuf, merges: PathBuf },
}

/// Local paths of everything the exporter needs from a registry entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PretrainedArtifacts {
    pub model_id: String,
    pub config: PathBuf,
    pub weights: PathBuf,
    pub tokenizer: TokenizerFiles,
}

#[derive(Debug)]
pub enum RegistryError {
    Client(ApiError),
    Hub { model_id: String, file: String, source: ApiError },
    ModelNotFound(String),
    MissingFile { model_id: String, file: String },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::Client(_) => write!(f, "failed to build hub client"),
            RegistryError::Hub { model_id, file, .. } if file.is_empty() => {
                write!(f, "hub lookup failed for {}", model_id)
            }
            RegistryError::Hub { model_id, file, .. } => {
                write!(f, "hub download failed for {}/{}", model_id, file)
            }
            RegistryError::ModelNotFound(id) => write!(f, "model '{}' not found in registry", id),
            RegistryError::MissingFile { model_id, file } => {
                write!(f, "model '{}' has no '{}'", model_id, file)
            }
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegistryError::Client(e) => Some(e),
            RegistryError::Hub { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Resolves a model id to local files, downloading them if needed.
pub trait ModelRegistry {
    fn resolve(&self, model_id: &str) -> Result<PretrainedArtifacts, RegistryError>;
}

/// Hugging Face hub client with the usual on-disk cache.
pub struct HubRegistry {
    api: Api,
    revision: Option<String>,
}

impl HubRegistry {
    pub fn new(
        cache_dir: Option<PathBuf>,
        token: Option<String>,
        revision: Option<String>,
    ) -> Result<Self, RegistryError> {
        let mut builder = ApiBuilder::new().with_progress(false);
        if let Some(dir) = cache_dir {
            builder = builder.with_cache_dir(dir);
        }
        if token.is_some() {
            builder = builder.with_token(token);
        }
        let api = builder.build().map_err(RegistryError::Client)?;
        Ok(Self { api, revision })
    }

    fn repo(&self, model_id: &str) -> ApiRepo {
        match &self.revision {
            Some(rev) => self.api.repo(Repo::with_revision(model_id.to_string(), RepoType::Model, rev.clone())),
            None => self.api.model(model_id.to_string()),
        }
    }
}

fn fetch(repo: &ApiRepo, model_id: &str, file: &str) -> Result<PathBuf, RegistryError> {
    log::debug!("Fetching {}/{}", model_id, file);
    repo.get(file).map_err(|e| RegistryError::Hub {
        model_id: model_id.to_string(),
        file: file.to_string(),
        source: e,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TokenizerLayout {
    Json,
    VocabMerges,
}

/// Picks the tokenizer files to download from a repo file listing.
fn tokenizer_layout<S: AsRef<str>>(files: &[S]) -> Option<TokenizerLayout> {
    let has = |name: &str| files.iter().any(|f| f.as_ref() == name);
    if has(TOKENIZER_FILE) {
        Some(TokenizerLayout::Json)
    } else if has(VOCAB_FILE) && has(MERGES_FILE) {
        Some(TokenizerLayout::VocabMerges)
    } else {
        None
    }
}

impl ModelRegistry for HubRegistry {
    fn resolve(&self, model_id: &str) -> Result<PretrainedArtifacts, RegistryError> {
        let repo = self.repo(model_id);

        let listing = repo.info().map_err(|e| RegistryError::Hub {
            model_id: model_id.to_string(),
            file: String::new(),
            source: e,
        })?;
        let files: Vec<String> = listing.siblings.into_iter().map(|s| s.rfilename).collect();

        let config = fetch(&repo, model_id, CONFIG_FILE)?;

        let tokenizer = match tokenizer_layout(&files) {
            Some(TokenizerLayout::Json) => TokenizerFiles::Json(fetch(&repo, model_id, TOKENIZER_FILE)?),
            Some(TokenizerLayout::VocabMerges) => {
                log::info!("{} has no {}; using {} + {}", model_id, TOKENIZER_FILE, VOCAB_FILE, MERGES_FILE);
                TokenizerFiles::VocabMerges {
                    vocab: fetch(&repo, model_id, VOCAB_FILE)?,
                    merges: fetch(&repo, model_id, MERGES_FILE)?,
                }
            }
            None => {
                return Err(RegistryError::MissingFile {
                    model_id: model_id.to_string(),
                    file: TOKENIZER_FILE.to_string(),
                })
            }
        };

        let weights = fetch(&repo, model_id, WEIGHTS_FILE)?;

        Ok(PretrainedArtifacts {
            model_id: model_id.to_string(),
            config,
            weights,
            tokenizer,
        })
    }
}

/// A directory of hub-style snapshots: `root/<model_id>/config.json`, ...
pub struct LocalRegistry {
    root: PathBuf,
}

impl LocalRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ModelRegistry for LocalRegistry {
    fn resolve(&self, model_id: &str) -> Result<PretrainedArtifacts, RegistryError> {
        let dir = self.root.join(model_id);
        if !dir.is_dir() {
            return Err(RegistryError::ModelNotFound(model_id.to_string()));
        }

        let require = |file: &str| -> Result<PathBuf, RegistryError> {
            let path = dir.join(file);
            if path.is_file() {
                Ok(path)
            } else {
                Err(RegistryError::MissingFile { model_id: model_id.to_string(), file: file.to_string() })
            }
        };

        let config = require(CONFIG_FILE)?;
        let weights = require(WEIGHTS_FILE)?;
        let tokenizer = match require(TOKENIZER_FILE) {
            Ok(path) => TokenizerFiles::Json(path),
            Err(_) => TokenizerFiles::VocabMerges {
                vocab: require(VOCAB_FILE)?,
                merges: require(MERGES_FILE)?,
            },
        };

        Ok(PretrainedArtifacts {
            model_id: model_id.to_string(),
            config,
            weights,
            tokenizer,
        })
    }
}
