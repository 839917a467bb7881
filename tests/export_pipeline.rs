use heading_model_export::cli;
use heading_model_export::export::{self, EmbeddingSource, ExportError, ExportOptions};
use heading_model_export::registry::{LocalRegistry, RegistryError};
use heading_model_export::tokenizer::TokenizerWrapper;
use heading_model_export::{HeadingModelSpec, OutputHead};
use ndarray::Array2;
use safetensors::tensor::{Dtype, TensorView};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const MODEL_ID: &str = "tiny/gpt2";
const VOCAB: usize = 8;
const EMBD: usize = 6;

fn tiny_spec() -> HeadingModelSpec {
    HeadingModelSpec {
        sequence_length: 4,
        vocab_size: VOCAB,
        embedding_dim: EMBD,
        hidden_units: 5,
        dropout_rate: 0.1,
    }
}

fn wte_values() -> Vec<f32> {
    (0..VOCAB * EMBD).map(|i| i as f32 / 100.0).collect()
}

// Lays out a hub-style snapshot under `root/tiny/gpt2/`.
fn write_snapshot(root: &Path) {
    let dir = root.join(MODEL_ID);
    fs::create_dir_all(&dir).unwrap();

    fs::write(
        dir.join("config.json"),
        format!(
            r#"{{"model_type": "gpt2", "vocab_size": {}, "n_embd": {}, "n_positions": 16, "n_layer": 1, "n_head": 1, "bos_token_id": 7, "eos_token_id": 7}}"#,
            VOCAB, EMBD
        ),
    )
    .unwrap();

    let vocab = r#"{"h": 0, "e": 1, "l": 2, "o": 3, "he": 4, "ll": 5, "hell": 6, "<|endoftext|>": 7}"#;
    fs::write(dir.join("vocab.json"), vocab).unwrap();
    fs::write(dir.join("merges.txt"), "#version: 0.2\nh e\nl l\nhe ll\n").unwrap();

    let bytes: Vec<u8> = wte_values().iter().flat_map(|v| v.to_le_bytes()).collect();
    let view = TensorView::new(Dtype::F32, vec![VOCAB, EMBD], &bytes).unwrap();
    safetensors::serialize_to_file(vec![("transformer.wte.weight", view)], &None, &dir.join("model.safetensors"))
        .unwrap();
}

fn options(output_dir: PathBuf) -> ExportOptions {
    ExportOptions {
        model_id: MODEL_ID.to_string(),
        output_dir,
        spec: tiny_spec(),
        seed: Some(1),
        ..ExportOptions::default()
    }
}

fn read_floats(paths: &[PathBuf]) -> Vec<f32> {
    let mut bytes = Vec::new();
    for path in paths {
        bytes.extend(fs::read(path).unwrap());
    }
    bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

#[test]
fn test_convert_writes_model_and_tokenizer() {
    let registry_root = TempDir::new().unwrap();
    write_snapshot(registry_root.path());
    let out = TempDir::new().unwrap();
    let output_dir = out.path().join("public/models/distilgpt2_tfjs");

    let summary = export::convert(&options(output_dir.clone()), &LocalRegistry::new(registry_root.path())).unwrap();

    assert_eq!(summary.output_dir, output_dir);
    assert_eq!(
        cli::completion_message(&summary),
        format!("Model and tokenizer saved to {}", output_dir.display())
    );
    assert_eq!(summary.embedding_source, EmbeddingSource::Pretrained("transformer.wte.weight".to_string()));
    assert_eq!(summary.weight_shards.len(), 1);
    assert!(output_dir.join("group1-shard1of1.bin").is_file());
    for file in ["model.json", "tokenizer.json", "vocab.json", "merges.txt", "tokenizer_config.json", "special_tokens_map.json"] {
        assert!(output_dir.join(file).is_file(), "missing {}", file);
    }

    // The embedding table comes first in the shard data.
    let floats = read_floats(&summary.weight_shards);
    assert_eq!(floats.len(), summary.parameter_count);
    assert_eq!(&floats[..VOCAB * EMBD], wte_values().as_slice());

    let model_json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&summary.model_json).unwrap()).unwrap();
    let outputs: Vec<&str> = model_json["modelTopology"]["config"]["output_layers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o[0].as_str().unwrap())
        .collect();
    assert_eq!(outputs, vec!["is_heading", "heading_level", "confidence"]);

    let special: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output_dir.join("special_tokens_map.json")).unwrap()).unwrap();
    assert_eq!(special["eos_token"], "<|endoftext|>");
}

#[test]
fn test_rerun_overwrites_existing_output() {
    let registry_root = TempDir::new().unwrap();
    write_snapshot(registry_root.path());
    let out = TempDir::new().unwrap();
    let registry = LocalRegistry::new(registry_root.path());

    let first = export::convert(&ExportOptions { shard_size_bytes: 64, ..options(out.path().to_path_buf()) }, &registry)
        .unwrap();
    assert!(first.weight_shards.len() > 1);

    let second = export::convert(&options(out.path().to_path_buf()), &registry).unwrap();
    assert_eq!(second.weight_shards.len(), 1);

    let shard_files = fs::read_dir(out.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".bin"))
        .count();
    assert_eq!(shard_files, 1);
}

#[test]
fn test_unknown_model_leaves_no_output() {
    let registry_root = TempDir::new().unwrap();
    write_snapshot(registry_root.path());
    let out = TempDir::new().unwrap();
    let output_dir = out.path().join("never_created");

    let opts = ExportOptions { model_id: "missing/model".to_string(), ..options(output_dir.clone()) };
    let result = export::convert(&opts, &LocalRegistry::new(registry_root.path()));

    assert!(matches!(result, Err(ExportError::Registry(RegistryError::ModelNotFound(_)))));
    assert!(!output_dir.exists());
}

#[test]
fn test_random_embedding_ignores_pretrained_weights() {
    let registry_root = TempDir::new().unwrap();
    write_snapshot(registry_root.path());
    let out = TempDir::new().unwrap();

    let opts = ExportOptions { seed_embedding_from_pretrained: false, ..options(out.path().to_path_buf()) };
    let summary = export::convert(&opts, &LocalRegistry::new(registry_root.path())).unwrap();

    assert_eq!(summary.embedding_source, EmbeddingSource::Random);
    let floats = read_floats(&summary.weight_shards);
    assert_ne!(&floats[..VOCAB * EMBD], wte_values().as_slice());
    assert!(floats[..VOCAB * EMBD].iter().all(|v| v.abs() <= 0.05));
}

#[test]
fn test_dimension_drift_falls_back_to_random_embedding() {
    let registry_root = TempDir::new().unwrap();
    write_snapshot(registry_root.path());
    let out = TempDir::new().unwrap();

    let spec = HeadingModelSpec { vocab_size: VOCAB + 2, ..tiny_spec() };
    let opts = ExportOptions { spec, ..options(out.path().to_path_buf()) };
    let summary = export::convert(&opts, &LocalRegistry::new(registry_root.path())).unwrap();

    assert_eq!(summary.embedding_source, EmbeddingSource::Random);
}

#[test]
fn test_acquired_tokenizer_feeds_reconstructed_network() {
    let registry_root = TempDir::new().unwrap();
    write_snapshot(registry_root.path());

    let acquired = export::acquire(&LocalRegistry::new(registry_root.path()), MODEL_ID).unwrap();
    assert_eq!(acquired.config.vocab_size, VOCAB);
    assert_eq!(acquired.weights.token_embedding.dim(), (VOCAB, EMBD));

    let mut network = export::reconstruct(&tiny_spec(), Some(3)).unwrap();
    network.seed_embedding(&acquired.weights).unwrap();

    let pad = acquired.tokenizer.token_to_id("<|endoftext|>").unwrap();
    let mut ids = acquired.tokenizer.encode_fixed("hello", 4, pad).unwrap();
    ids.extend(acquired.tokenizer.encode_fixed("hellhello", 4, pad).unwrap());
    let batch = Array2::from_shape_vec((2, 4), ids).unwrap();

    let prediction = network.forward(&batch).unwrap();
    for head in OutputHead::ALL {
        assert_eq!(prediction.head(head).dim(), (2, 1));
    }
}

#[test]
fn test_saved_tokenizer_reloads() {
    let registry_root = TempDir::new().unwrap();
    write_snapshot(registry_root.path());
    let out = TempDir::new().unwrap();

    export::convert(&options(out.path().to_path_buf()), &LocalRegistry::new(registry_root.path())).unwrap();

    let reloaded = TokenizerWrapper::from_json(&out.path().join("tokenizer.json")).unwrap();
    assert_eq!(reloaded.encode("hello", false).unwrap(), vec![6, 3]);
    let from_vocab =
        TokenizerWrapper::from_vocab_and_merges(&out.path().join("vocab.json"), &out.path().join("merges.txt")).unwrap();
    assert_eq!(from_vocab.get_vocab_size(), VOCAB);
}
