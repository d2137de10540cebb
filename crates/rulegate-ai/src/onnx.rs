//! ONNX Runtime sentence embeddings for rule and configuration text.
//!
//! Mean-pooled, L2-normalized embeddings from a sentence-transformers export
//! (all-MiniLM-L6-v2 by default, 384 dimensions). The model directory must
//! contain `model.onnx` and `tokenizer.json`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tracing::info;

use crate::embedder::{EmbedError, TextEmbedder, normalize};

/// Token limit of MiniLM; longer inputs are truncated.
const MAX_TOKENS: usize = 256;

struct Model {
    session: Session,
    tokenizer: Tokenizer,
    dim: usize,
}

/// Session access is serialized; inference runs on the blocking pool.
#[derive(Clone)]
pub struct OnnxEmbedder {
    model: Arc<Mutex<Model>>,
    dim: usize,
}

impl OnnxEmbedder {
    pub fn load(model_dir: &Path) -> anyhow::Result<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        anyhow::ensure!(model_path.exists(), "model.onnx not found in {model_dir:?}");
        anyhow::ensure!(
            tokenizer_path.exists(),
            "tokenizer.json not found in {model_dir:?}"
        );

        let session = Session::builder()?.commit_from_file(&model_path)?;
        let dim = infer_dim(session.outputs()[0].dtype()).unwrap_or(384);

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("set truncation: {e}"))?;

        info!(dim, model = %model_path.display(), "loaded embedding model");
        Ok(Self {
            model: Arc::new(Mutex::new(Model {
                session,
                tokenizer,
                dim,
            })),
            dim,
        })
    }
}

#[async_trait]
impl TextEmbedder for OnnxEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let model = Arc::clone(&self.model);
        let text = text.to_owned();
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| EmbedError::Failed("embedding model lock poisoned".into()))?;
            model
                .embed_one(&text)
                .map_err(|e| EmbedError::Failed(format!("{e:#}")))
        })
        .await
        .map_err(|e| EmbedError::Failed(e.to_string()))?
    }
}

impl Model {
    fn embed_one(&mut self, text: &str) -> anyhow::Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("tokenize: {e}"))?;

        let to_i64 = |xs: &[u32]| xs.iter().map(|&x| i64::from(x)).collect::<Vec<_>>();
        let input_ids = to_i64(encoding.get_ids());
        let attention_mask = to_i64(encoding.get_attention_mask());
        let token_type_ids = to_i64(encoding.get_type_ids());
        let seq_len = input_ids.len();
        let shape = [1i64, seq_len as i64];

        let outputs = self.session.run(ort::inputs![
            "input_ids" => Tensor::from_array((shape, input_ids.into_boxed_slice()))?,
            "attention_mask" => Tensor::from_array((shape, attention_mask.clone().into_boxed_slice()))?,
            "token_type_ids" => Tensor::from_array((shape, token_type_ids.into_boxed_slice()))?,
        ])?;

        // Token embeddings: [1, seq_len, dim].
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: &[i64] = shape;
        anyhow::ensure!(
            dims.len() == 3 && dims[0] == 1 && dims[2] as usize == self.dim,
            "unexpected output shape: {dims:?}, expected [1, {seq_len}, {}]",
            self.dim
        );

        let mut pooled = vec![0.0f32; self.dim];
        let mut tokens = 0.0f32;
        for (j, &mask) in attention_mask.iter().enumerate().take(dims[1] as usize) {
            if mask == 0 {
                continue;
            }
            let row = &data[j * self.dim..(j + 1) * self.dim];
            for (p, x) in pooled.iter_mut().zip(row) {
                *p += x;
            }
            tokens += 1.0;
        }
        if tokens > 0.0 {
            for p in &mut pooled {
                *p /= tokens;
            }
        }
        normalize(&mut pooled);
        Ok(pooled)
    }
}

/// Last dimension of the model output, when static.
fn infer_dim(output_type: &ort::value::ValueType) -> Option<usize> {
    match output_type {
        ort::value::ValueType::Tensor { shape, .. } => shape
            .last()
            .and_then(|&d| if d > 0 { Some(d as usize) } else { None }),
        _ => None,
    }
}
