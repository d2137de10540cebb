//! AI layer: text embeddings, the language-service client, and LLM-driven
//! rule extraction.

pub mod embedder;
pub mod extractor;
pub mod llm;
#[cfg(feature = "onnx")]
mod onnx;

pub use embedder::{EmbedError, HashingEmbedder, TextEmbedder};
pub use extractor::{ExtractError, Extractor, parse_candidates};
pub use llm::{LanguageService, LlmError, OllamaClient};
#[cfg(feature = "onnx")]
pub use onnx::OnnxEmbedder;
