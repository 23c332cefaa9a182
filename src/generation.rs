//! Generation collaborator
//!
//! Text generation is delegated to a llama.cpp HTTP server. The model can
//! take minutes to load after deployment; `ready()` probes its health
//! endpoint so request handlers can answer "warming up" instead of blocking
//! on a model that is not there yet.

use crate::error::{RagbusError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Trait for text generators
#[async_trait]
pub trait Generator: Send + Sync {
    /// One blocking completion call, bounded by the configured sampling
    /// parameters
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Whether the underlying model is loaded and able to serve
    async fn ready(&self) -> bool;
}

/// Sampling parameters for the completion endpoint
#[derive(Debug, Clone)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

/// Client for a llama.cpp server (`/health` + `/completion`)
pub struct LlamaServerGenerator {
    client: reqwest::Client,
    base_url: String,
    params: SamplingParams,
    /// Sticky readiness flag; once the server reports healthy we stop
    /// probing
    ready: AtomicBool,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: u32,
    temperature: f32,
    top_p: f32,
    stop: Vec<&'a str>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    content: String,
}

impl LlamaServerGenerator {
    pub fn new(base_url: &str, params: SamplingParams) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            params,
            ready: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Generator for LlamaServerGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = CompletionRequest {
            prompt,
            n_predict: self.params.max_tokens,
            temperature: self.params.temperature,
            top_p: self.params.top_p,
            stop: vec!["</s>"],
        };

        let response = self
            .client
            .post(format!("{}/completion", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| RagbusError::Http {
                source: e,
                context: "Failed to reach generation server".to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RagbusError::Generation(format!(
                "Generation server returned HTTP {status}"
            )));
        }

        let completion: CompletionResponse =
            response.json().await.map_err(|e| RagbusError::Http {
                source: e,
                context: "Failed to decode completion response".to_string(),
            })?;

        Ok(completion.content.trim().to_string())
    }

    async fn ready(&self) -> bool {
        if self.ready.load(Ordering::Relaxed) {
            return true;
        }
        let healthy = match self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        };
        if healthy {
            self.ready.store(true, Ordering::Relaxed);
        }
        healthy
    }
}
