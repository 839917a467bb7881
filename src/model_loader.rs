// src/model_loader.rs

use ndarray::Array2;
use safetensors::tensor::{Dtype, SafeTensorError, SafeTensors};
use std::fs;
use std::io;
use std::path::Path;

/// Names the GPT-2 token embedding is stored under, depending on which head
/// class saved the checkpoint.
pub const TOKEN_EMBEDDING_NAMES: [&str; 2] = ["transformer.wte.weight", "wte.weight"];

#[derive(Debug)]
pub enum ModelLoaderError {
    IoError(io::Error),
    SafeTensors(SafeTensorError),
    UnsupportedDtype(String),
    InvalidShape(String),
    TensorNotFound(String),
}

impl std::fmt::Display for ModelLoaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelLoaderError::IoError(_) => write!(f, "IO error"),
            ModelLoaderError::SafeTensors(_) => write!(f, "Invalid safetensors file"),
            ModelLoaderError::UnsupportedDtype(s) => write!(f, "Unsupported dtype: {}", s),
            ModelLoaderError::InvalidShape(s) => write!(f, "Invalid tensor shape: {}", s),
            ModelLoaderError::TensorNotFound(s) => write!(f, "Tensor not found: {}", s),
        }
    }
}

impl std::error::Error for ModelLoaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ModelLoaderError::IoError(e) => Some(e),
            ModelLoaderError::SafeTensors(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ModelLoaderError {
    fn from(err: io::Error) -> ModelLoaderError {
        ModelLoaderError::IoError(err)
    }
}

impl From<SafeTensorError> for ModelLoaderError {
    fn from(err: SafeTensorError) -> ModelLoaderError {
        ModelLoaderError::SafeTensors(err)
    }
}

/// The pieces of the pretrained checkpoint the exporter can reuse.
#[derive(Debug, Clone)]
pub struct PretrainedWeights {
    pub tensor_name: String,
    /// `[vocab_size, n_embd]`
    pub token_embedding: Array2<f32>,
}

impl PretrainedWeights {
    pub fn vocab_size(&self) -> usize {
        self.token_embedding.nrows()
    }

    pub fn embedding_dim(&self) -> usize {
        self.token_embedding.ncols()
    }
}

/// Reads the token embedding matrix out of a `.safetensors` checkpoint.
/// Only F32 checkpoints are supported.
pub fn load_token_embedding(file_path: &Path) -> Result<PretrainedWeights, ModelLoaderError> {
    let buffer = fs::read(file_path)?;
    let tensors = SafeTensors::deserialize(&buffer)?;

    let tensor_name = TOKEN_EMBEDDING_NAMES
        .iter()
        .find(|name| tensors.tensor(name).is_ok())
        .ok_or_else(|| {
            ModelLoaderError::TensorNotFound(format!(
                "none of {:?} in {}",
                TOKEN_EMBEDDING_NAMES,
                file_path.display()
            ))
        })?;
    let view = tensors.tensor(tensor_name)?;

    if view.dtype() != Dtype::F32 {
        return Err(ModelLoaderError::UnsupportedDtype(format!(
            "'{}' is {:?}, only F32 is supported",
            tensor_name,
            view.dtype()
        )));
    }

    let (rows, cols) = match view.shape() {
        [rows, cols] => (*rows, *cols),
        other => {
            return Err(ModelLoaderError::InvalidShape(format!(
                "'{}' has shape {:?}, expected [vocab_size, n_embd]",
                tensor_name, other
            )))
        }
    };

    // Tensor data in the file has no alignment guarantee; decode element-wise.
    let data: Vec<f32> = view
        .data()
        .chunks_exact(std::mem::size_of::<f32>())
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    let token_embedding = Array2::from_shape_vec((rows, cols), data)
        .map_err(|e| ModelLoaderError::InvalidShape(format!("'{}': {}", tensor_name, e)))?;

    log::info!("Loaded pretrained token embedding '{}' {:?}", tensor_name, token_embedding.dim());

    Ok(PretrainedWeights {
        tensor_name: tensor_name.to_string(),
        token_embedding,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use safetensors::tensor::TensorView;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_safetensors(tensors: Vec<(&str, Dtype, Vec<usize>, Vec<u8>)>) -> NamedTempFile {
        let views: Vec<(&str, TensorView)> = tensors
            .iter()
            .map(|(name, dtype, shape, bytes)| (*name, TensorView::new(*dtype, shape.clone(), bytes).unwrap()))
            .collect();
        let serialized = safetensors::serialize(views, &None).unwrap();

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&serialized).unwrap();
        file
    }

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_load_prefixed_token_embedding() {
        let data: Vec<f32> = (0..12).map(|i| i as f32 * 0.5).collect();
        let file = write_safetensors(vec![
            ("transformer.wte.weight", Dtype::F32, vec![4, 3], f32_bytes(&data)),
            ("transformer.wpe.weight", Dtype::F32, vec![2, 3], f32_bytes(&[0.0; 6])),
        ]);

        let weights = load_token_embedding(file.path()).unwrap();
        assert_eq!(weights.tensor_name, "transformer.wte.weight");
        assert_eq!(weights.vocab_size(), 4);
        assert_eq!(weights.embedding_dim(), 3);
        assert_eq!(weights.token_embedding[[2, 1]], 3.5);
    }

    #[test]
    fn test_load_unprefixed_token_embedding() {
        let file = write_safetensors(vec![("wte.weight", Dtype::F32, vec![2, 2], f32_bytes(&[1.0, 2.0, 3.0, 4.0]))]);
        let weights = load_token_embedding(file.path()).unwrap();
        assert_eq!(weights.tensor_name, "wte.weight");
        assert_eq!(weights.token_embedding.as_slice().unwrap(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_missing_embedding_tensor() {
        let file = write_safetensors(vec![("lm_head.weight", Dtype::F32, vec![1, 1], f32_bytes(&[1.0]))]);
        let result = load_token_embedding(file.path());
        assert!(matches!(result, Err(ModelLoaderError::TensorNotFound(_))));
    }

    #[test]
    fn test_unsupported_dtype() {
        let file = write_safetensors(vec![("wte.weight", Dtype::F16, vec![2, 2], vec![0u8; 8])]);
        let result = load_token_embedding(file.path());
        assert!(matches!(result, Err(ModelLoaderError::UnsupportedDtype(s)) if s.contains("F16")));
    }

    #[test]
    fn test_wrong_rank() {
        let file = write_safetensors(vec![("wte.weight", Dtype::F32, vec![4], f32_bytes(&[0.0; 4]))]);
        let result = load_token_embedding(file.path());
        assert!(matches!(result, Err(ModelLoaderError::InvalidShape(_))));
    }

    #[test]
    fn test_file_not_found() {
        let result = load_token_embedding(Path::new("non_existent_file.safetensors"));
        assert!(matches!(result, Err(ModelLoaderError::IoError(e)) if e.kind() == io::ErrorKind::NotFound));
    }

    #[test]
    fn test_corrupted_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[1, 0, 0, 0, 0, 0, 0]).unwrap();
        let result = load_token_embedding(file.path());
        assert!(matches!(result, Err(ModelLoaderError::SafeTensors(_))));
    }
}
