//! Embedding collaborator
//!
//! E5-family models expect asymmetric `query:` / `passage:` prefixes; the
//! provider applies them so callers never have to remember which side they
//! are on. Embedding is CPU-bound — callers on the async path wrap these
//! calls in `spawn_blocking`.

use crate::error::{RagbusError, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;

/// Trait for embedding providers
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one free-text query
    fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of passages (document chunks)
    fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Dimensionality of the deployed model
    fn dimension(&self) -> usize;
}

/// FastEmbed provider running the model locally
///
/// The model is downloaded to the huggingface cache on first use
/// (multilingual-e5-small is ~120MB, 384 dimensions).
pub struct FastEmbedProvider {
    model: Arc<TextEmbedding>,
    dimension: usize,
    batch_size: usize,
}

impl FastEmbedProvider {
    pub fn new(model_name: &str, batch_size: usize) -> Result<Self> {
        let (embedding_model, dimension) = match model_name {
            "multilingual-e5-small" | "intfloat/multilingual-e5-small" => {
                (EmbeddingModel::MultilingualE5Small, 384)
            }
            "multilingual-e5-base" | "intfloat/multilingual-e5-base" => {
                (EmbeddingModel::MultilingualE5Base, 768)
            }
            _ => {
                return Err(RagbusError::Embedding(format!(
                    "Unsupported model: {model_name}. Supported: multilingual-e5-small, multilingual-e5-base"
                )));
            }
        };

        tracing::info!(
            "Initializing embedding model {} ({}D, downloaded on first use)",
            model_name,
            dimension
        );

        let model = TextEmbedding::try_new(
            InitOptions::new(embedding_model).with_show_download_progress(true),
        )
        .map_err(|e| RagbusError::Embedding(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            dimension,
            batch_size: batch_size.max(1),
        })
    }

    fn embed_prefixed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let embeddings = self
            .model
            .embed(texts, Some(self.batch_size))
            .map_err(|e| RagbusError::Embedding(e.to_string()))?;

        for embedding in &embeddings {
            if embedding.len() != self.dimension {
                return Err(RagbusError::Embedding(format!(
                    "Dimension mismatch: expected {}, got {}",
                    self.dimension,
                    embedding.len()
                )));
            }
        }
        Ok(embeddings)
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(RagbusError::Embedding("Empty query text".to_string()));
        }
        let mut vectors = self.embed_prefixed(vec![format!("query: {text}")])?;
        vectors
            .pop()
            .ok_or_else(|| RagbusError::Embedding("No embedding generated".to_string()))
    }

    fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let prefixed = texts.iter().map(|t| format!("passage: {t}")).collect();
        self.embed_prefixed(prefixed)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
