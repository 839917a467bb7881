//! Converts a pretrained GPT-2 checkpoint into a TensorFlow.js heading-detection
//! model plus its tokenizer vocabulary.

pub mod cli;
pub mod config;
pub mod export;
pub mod model_loader;
pub mod network;
pub mod registry;
pub mod tfjs;
pub mod tokenizer;

pub use config::{HeadingModelSpec, SourceModelConfig};
pub use export::{convert, ExportError, ExportOptions, ExportSummary};
pub use network::{HeadingNetwork, OutputHead};
pub use registry::{HubRegistry, LocalRegistry, ModelRegistry};
