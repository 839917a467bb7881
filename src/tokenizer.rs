use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tokenizers::decoders::DecoderWrapper;
use tokenizers::models::bpe::BPE;
use tokenizers::pre_tokenizers::byte_level::ByteLevel;
use tokenizers::pre_tokenizers::PreTokenizerWrapper;
use tokenizers::{Model, Tokenizer};

use crate::config::SourceModelConfig;
use crate::registry::{TokenizerFiles, MERGES_FILE, TOKENIZER_FILE, VOCAB_FILE};

pub const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";
pub const SPECIAL_TOKENS_MAP_FILE: &str = "special_tokens_map.json";

/// GPT-2's single special token, used for bos, eos and unk.
const GPT2_END_OF_TEXT: &str = "<|endoftext|>";
const FALLBACK_MODEL_MAX_LENGTH: usize = 1024;

#[derive(Debug)]
pub enum TokenizerError {
    Load(String, Box<dyn std::error::Error + Send + Sync>),
    Save(String, Box<dyn std::error::Error + Send + Sync>),
    Encode(String),
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for TokenizerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenizerError::Load(what, _) => write!(f, "Failed to load tokenizer from {}", what),
            TokenizerError::Save(what, _) => write!(f, "Failed to save {}", what),
            TokenizerError::Encode(s) => write!(f, "Encoding failed: {}", s),
            TokenizerError::Io(_) => write!(f, "IO error"),
            TokenizerError::Json(_) => write!(f, "JSON error"),
        }
    }
}

impl std::error::Error for TokenizerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TokenizerError::Load(_, e) | TokenizerError::Save(_, e) => Some(e.as_ref()),
            TokenizerError::Io(e) => Some(e),
            TokenizerError::Json(e) => Some(e),
            TokenizerError::Encode(_) => None,
        }
    }
}

impl From<std::io::Error> for TokenizerError {
    fn from(err: std::io::Error) -> Self { TokenizerError::Io(err) }
}
impl From<serde_json::Error> for TokenizerError {
    fn from(err: serde_json::Error) -> Self { TokenizerError::Json(err) }
}

#[derive(Debug)]
pub struct TokenizerWrapper {
    tokenizer: Tokenizer,
}

impl TokenizerWrapper {
    pub fn load(files: &TokenizerFiles) -> Result<Self, TokenizerError> {
        match files {
            TokenizerFiles::Json(path) => Self::from_json(path),
            TokenizerFiles::VocabMerges { vocab, merges } => Self::from_vocab_and_merges(vocab, merges),
        }
    }

    pub fn from_json(tokenizer_path: &Path) -> Result<Self, TokenizerError> {
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| TokenizerError::Load(tokenizer_path.display().to_string(), e))?;
        Ok(Self { tokenizer })
    }

    /// Builds a GPT-2 style byte-level BPE tokenizer from raw vocabulary files.
    pub fn from_vocab_and_merges(vocab_path: &Path, merges_path: &Path) -> Result<Self, TokenizerError> {
        let describe = || format!("{} and {}", vocab_path.display(), merges_path.display());
        let non_utf8 = || TokenizerError::Load(describe(), "path is not valid UTF-8".into());
        let vocab = vocab_path.to_str().ok_or_else(non_utf8)?;
        let merges = merges_path.to_str().ok_or_else(non_utf8)?;

        let bpe_model = BPE::from_file(vocab, merges)
            .build()
            .map_err(|e| TokenizerError::Load(describe(), e))?;

        let mut tokenizer = Tokenizer::new(bpe_model);
        tokenizer.with_pre_tokenizer(PreTokenizerWrapper::ByteLevel(ByteLevel::default().add_prefix_space(false)));
        tokenizer.with_decoder(DecoderWrapper::ByteLevel(ByteLevel::default()));
        Ok(Self { tokenizer })
    }

    pub fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>, TokenizerError> {
        let encoding = self.tokenizer.encode(text, add_special_tokens)
            .map_err(|e| TokenizerError::Encode(format!("'{}': {}", text, e)))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Encodes `text` into exactly `sequence_length` ids, truncating or padding
    /// with `pad_id` on the right.
    pub fn encode_fixed(&self, text: &str, sequence_length: usize, pad_id: u32) -> Result<Vec<u32>, TokenizerError> {
        let mut ids = self.encode(text, false)?;
        ids.resize(sequence_length, pad_id);
        Ok(ids)
    }

    pub fn get_vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.tokenizer.token_to_id(token)
    }

    /// Resolves the end-of-text token from the model config, falling back to
    /// GPT-2's `<|endoftext|>` if the config has no eos id.
    pub fn end_of_text(&self, config: &SourceModelConfig) -> Option<String> {
        config
            .eos_token_id
            .or(config.bos_token_id)
            .and_then(|id| self.tokenizer.id_to_token(id))
            .or_else(|| self.token_to_id(GPT2_END_OF_TEXT).map(|_| GPT2_END_OF_TEXT.to_string()))
    }

    /// Writes `tokenizer.json`, the model vocabulary files and the tokenizer
    /// configs into `dir`. Returns the paths written.
    pub fn save_vocabulary(&self, dir: &Path, config: &SourceModelConfig) -> Result<Vec<PathBuf>, TokenizerError> {
        let mut written = Vec::new();

        let tokenizer_json = dir.join(TOKENIZER_FILE);
        self.tokenizer
            .save(&tokenizer_json, false)
            .map_err(|e| TokenizerError::Save(tokenizer_json.display().to_string(), e))?;
        written.push(tokenizer_json);

        let model_files = self.tokenizer
            .get_model()
            .save(dir, None)
            .map_err(|e| TokenizerError::Save(format!("{} / {}", VOCAB_FILE, MERGES_FILE), e))?;
        written.extend(model_files);

        let special = self.end_of_text(config);
        let model_max_length = config.n_positions.unwrap_or(FALLBACK_MODEL_MAX_LENGTH);

        let special_tokens_map = match &special {
            Some(tok) => json!({ "bos_token": tok, "eos_token": tok, "unk_token": tok }),
            None => json!({}),
        };
        let special_path = dir.join(SPECIAL_TOKENS_MAP_FILE);
        fs::write(&special_path, serde_json::to_string_pretty(&special_tokens_map)?)?;
        written.push(special_path);

        let mut tokenizer_config = json!({
            "add_prefix_space": false,
            "model_max_length": model_max_length,
            "tokenizer_class": "GPT2Tokenizer",
        });
        if let (Some(map), Some(obj)) = (special_tokens_map.as_object(), tokenizer_config.as_object_mut()) {
            obj.extend(map.clone());
        }
        let config_path = dir.join(TOKENIZER_CONFIG_FILE);
        fs::write(&config_path, serde_json::to_string_pretty(&tokenizer_config)?)?;
        written.push(config_path);

        #[cfg(feature = "tokenizer-debug-logs")]
        log::debug!(
            "Saved tokenizer: vocab size {}, special token {:?}, files {:?}",
            self.get_vocab_size(),
            special,
            written
        );

        Ok(written)
    }
}
