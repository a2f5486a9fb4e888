//! Text embedding backends implementing `ragq_core::Embedder`.
//!
//! `OnnxEmbedder` (feature `onnx`) runs a real sentence-embedding model;
//! `SimpleEmbedder` is a deterministic hash-based fallback used in tests and
//! wherever no model is configured.

use std::path::Path;

use async_trait::async_trait;
use ragq_core::{Embedder, Result};

#[cfg(feature = "onnx")]
use ndarray::Array2;
#[cfg(feature = "onnx")]
use ort::{session::Session, session::builder::GraphOptimizationLevel, value::Tensor};
#[cfg(feature = "onnx")]
use tokenizers::Tokenizer;

use crate::RetrievalError;

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub max_seq_len: usize,
    pub embedding_dim: usize,
    pub normalize: bool,
    pub batch_size: usize,
    /// ONNX output tensor name; models vary ("last_hidden_state",
    /// "sentence_embedding", ...).
    pub output_name: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            max_seq_len: 512,
            embedding_dim: 384,
            normalize: true,
            batch_size: 32,
            output_name: "last_hidden_state".to_string(),
        }
    }
}

/// ONNX-backed sentence embedder: mean-pools the final hidden state over
/// non-padding tokens, then L2-normalizes.
#[cfg(feature = "onnx")]
pub struct OnnxEmbedder {
    session: Session,
    tokenizer: Tokenizer,
    config: EmbeddingConfig,
}

#[cfg(feature = "onnx")]
impl OnnxEmbedder {
    pub fn new(
        model_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
        config: EmbeddingConfig,
    ) -> std::result::Result<Self, RetrievalError> {
        let session = Session::builder()
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?
            .with_intra_threads(2)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        Ok(Self {
            session,
            tokenizer,
            config,
        })
    }

    fn embed_batch_internal(
        &self,
        texts: &[&str],
    ) -> std::result::Result<Vec<Vec<f32>>, RetrievalError> {
        let batch_size = texts.len();

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let mut input_ids = vec![0i64; batch_size * self.config.max_seq_len];
        let mut attention_mask = vec![0i64; batch_size * self.config.max_seq_len];
        let mut token_type_ids = vec![0i64; batch_size * self.config.max_seq_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let types = encoding.get_type_ids();

            let len = ids.len().min(self.config.max_seq_len);
            let offset = i * self.config.max_seq_len;

            for j in 0..len {
                input_ids[offset + j] = ids[j] as i64;
                attention_mask[offset + j] = mask[j] as i64;
                token_type_ids[offset + j] = types[j] as i64;
            }
        }

        let input_ids = Array2::from_shape_vec((batch_size, self.config.max_seq_len), input_ids)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
        let attention_mask =
            Array2::from_shape_vec((batch_size, self.config.max_seq_len), attention_mask)
                .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
        let token_type_ids =
            Array2::from_shape_vec((batch_size, self.config.max_seq_len), token_type_ids)
                .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let input_ids_tensor =
            Tensor::from_array(input_ids).map_err(|e| RetrievalError::Embedding(e.to_string()))?;
        let attention_mask_tensor = Tensor::from_array(attention_mask)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
        let token_type_ids_tensor = Tensor::from_array(token_type_ids)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_ids_tensor,
            ])
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let (shape, hidden_data) = outputs
            .get(&self.config.output_name)
            .ok_or_else(|| {
                RetrievalError::Embedding(format!(
                    "missing output tensor: {}",
                    self.config.output_name
                ))
            })?
            .try_extract_tensor::<f32>()
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        let (tensor_batch, tensor_seq_len, tensor_hidden_dim) = if dims.len() == 3 {
            (dims[0], dims[1], dims[2])
        } else {
            return Err(RetrievalError::Embedding(format!(
                "unexpected tensor shape: {:?}",
                dims
            )));
        };

        let mut embeddings = Vec::with_capacity(batch_size);

        for i in 0..batch_size.min(tensor_batch) {
            let seq_len = encodings[i]
                .get_ids()
                .len()
                .min(self.config.max_seq_len)
                .min(tensor_seq_len);
            let mut embedding = vec![0.0f32; self.config.embedding_dim];

            for j in 0..seq_len {
                for k in 0..self.config.embedding_dim.min(tensor_hidden_dim) {
                    let idx = i * tensor_seq_len * tensor_hidden_dim + j * tensor_hidden_dim + k;
                    if idx < hidden_data.len() {
                        embedding[k] += hidden_data[idx];
                    }
                }
            }

            for v in &mut embedding {
                *v /= seq_len.max(1) as f32;
            }

            if self.config.normalize {
                l2_normalize(&mut embedding);
            }

            embeddings.push(embedding);
        }

        Ok(embeddings)
    }
}

#[cfg(feature = "onnx")]
#[async_trait]
impl Embedder for OnnxEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut batch = self.embed_batch_internal(&[text])?;
        Ok(batch.pop().unwrap_or_default())
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.batch_size) {
            all.extend(self.embed_batch_internal(chunk)?);
        }
        Ok(all)
    }

    fn dim(&self) -> usize {
        self.config.embedding_dim
    }
}

/// Deterministic, model-free embedder: hashes character positions into a
/// fixed-dimension vector, then L2-normalizes. Used in tests and as the
/// default when no ONNX model is configured.
pub struct SimpleEmbedder {
    config: EmbeddingConfig,
}

impl SimpleEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { config }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.config.embedding_dim];

        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize).wrapping_add(i) % self.config.embedding_dim;
            embedding[idx] += 1.0;
        }

        if self.config.normalize {
            l2_normalize(&mut embedding);
        }

        embedding
    }
}

#[async_trait]
impl Embedder for SimpleEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dim(&self) -> usize {
        self.config.embedding_dim
    }
}

fn l2_normalize(embedding: &mut [f32]) {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in embedding.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simple_embedder_produces_unit_vector() {
        let embedder = SimpleEmbedder::new(EmbeddingConfig::default());
        let embedding = embedder.embed("Hello world").await.unwrap();

        assert_eq!(embedding.len(), 384);
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn simple_embedder_is_deterministic() {
        let embedder = SimpleEmbedder::new(EmbeddingConfig::default());
        let a = embedder.embed("gold loan rate").await.unwrap();
        let b = embedder.embed("gold loan rate").await.unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn config_default_matches_simple_embedder_dim() {
        let config = EmbeddingConfig::default();
        assert_eq!(config.embedding_dim, 384);
        assert!(config.normalize);
    }
}
