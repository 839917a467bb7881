// src/cli.rs

use clap::Parser;
use std::error::Error;
use std::path::PathBuf;

use crate::config::{HeadingModelSpec, DEFAULT_MODEL_ID, DEFAULT_OUTPUT_DIR, DEFAULT_SHARD_SIZE_BYTES};
use crate::export::{self, EmbeddingSource, ExportOptions, ExportSummary};
use crate::registry::{HubRegistry, LocalRegistry, ModelRegistry};

/// Convert a pretrained GPT-2 checkpoint into a TF.js heading-detection model.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Registry id of the pretrained model
    #[clap(long, value_parser, default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,
    /// Hub revision (branch, tag or commit)
    #[clap(long, value_parser)]
    pub revision: Option<String>,
    #[clap(long, value_parser, default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,
    /// Hub cache directory (defaults to the standard Hugging Face cache)
    #[clap(long, value_parser)]
    pub cache_dir: Option<PathBuf>,
    #[clap(long, value_parser, env = "HF_TOKEN", hide_env_values = true)]
    pub hf_token: Option<String>,
    /// Resolve models from <DIR>/<model-id>/ instead of the hub
    #[clap(long, value_parser)]
    pub local_registry: Option<PathBuf>,
    /// Seed for the random initialisers
    #[clap(long, value_parser)]
    pub seed: Option<u64>,
    /// Keep the embedding table randomly initialised instead of copying the pretrained one
    #[clap(long)]
    pub random_embedding: bool,
    #[clap(long, value_parser, default_value_t = DEFAULT_SHARD_SIZE_BYTES)]
    pub shard_size_bytes: usize,
}

impl CliArgs {
    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            model_id: self.model_id.clone(),
            output_dir: self.output_dir.clone(),
            spec: HeadingModelSpec::default(),
            seed: self.seed,
            seed_embedding_from_pretrained: !self.random_embedding,
            shard_size_bytes: self.shard_size_bytes,
        }
    }

    fn registry(&self) -> Result<Box<dyn ModelRegistry>, Box<dyn Error>> {
        match &self.local_registry {
            Some(root) => {
                log::info!("Using local registry at {}", root.display());
                Ok(Box::new(LocalRegistry::new(root.clone())))
            }
            None => Ok(Box::new(HubRegistry::new(
                self.cache_dir.clone(),
                self.hf_token.clone(),
                self.revision.clone(),
            )?)),
        }
    }
}

pub fn completion_message(summary: &ExportSummary) -> String {
    format!("Model and tokenizer saved to {}", summary.output_dir.display())
}

pub fn run(args: &CliArgs) -> Result<ExportSummary, Box<dyn Error>> {
    let registry = args.registry()?;
    let summary = export::convert(&args.export_options(), registry.as_ref())?;

    if summary.embedding_source == EmbeddingSource::Random {
        log::warn!("Exported embedding table is random; the model needs training before use");
    }
    log::info!(
        "{} parameters, {} weight shards, {} tokenizer files",
        summary.parameter_count,
        summary.weight_shards.len(),
        summary.tokenizer_files.len()
    );
    println!("{}", completion_message(&summary));
    Ok(summary)
}

pub fn run_cli() -> Result<(), Box<dyn Error>> {
    let args = CliArgs::parse();
    run(&args).map(|_| ())
}
