//! RPC handler adapters binding the query service to the broker
//!
//! The adapters own the boundary between wire bytes and typed requests: a
//! body that fails to decode or validate becomes the deterministic
//! "invalid request" response rather than an error propagating into the
//! transport layer.

use crate::error::Result;
use crate::protocol::{QuizRequest, RagResponse, RecommendRequest, SearchRequest};
use crate::rpc::{RequestMeta, RpcHandler};
use crate::service::RagService;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;

fn decode_validated<T, F>(body: &[u8], validate: F) -> Option<T>
where
    T: DeserializeOwned,
    F: FnOnce(&T) -> Result<()>,
{
    match serde_json::from_slice::<T>(body) {
        Ok(req) => match validate(&req) {
            Ok(()) => Some(req),
            Err(e) => {
                tracing::warn!("Request failed validation: {}", e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Request body failed to decode: {}", e);
            None
        }
    }
}

pub struct SearchHandler {
    pub service: Arc<RagService>,
}

#[async_trait]
impl RpcHandler for SearchHandler {
    async fn handle(&self, body: &[u8], meta: &RequestMeta) -> Result<Vec<u8>> {
        let Some(req) = decode_validated::<SearchRequest, _>(body, |r| r.validate()) else {
            return Ok(RagResponse::invalid_request().to_bytes());
        };
        let response = self.service.search(&req, &meta.trace_id).await?;
        Ok(response.to_bytes())
    }
}

pub struct RecommendHandler {
    pub service: Arc<RagService>,
}

#[async_trait]
impl RpcHandler for RecommendHandler {
    async fn handle(&self, body: &[u8], meta: &RequestMeta) -> Result<Vec<u8>> {
        let Some(req) = decode_validated::<RecommendRequest, _>(body, |r| r.validate()) else {
            return Ok(RagResponse::invalid_request().to_bytes());
        };
        let response = self.service.recommend(&req, &meta.trace_id).await?;
        Ok(response.to_bytes())
    }
}

pub struct QuizHandler {
    pub service: Arc<RagService>,
}

#[async_trait]
impl RpcHandler for QuizHandler {
    async fn handle(&self, body: &[u8], meta: &RequestMeta) -> Result<Vec<u8>> {
        let Some(req) = decode_validated::<QuizRequest, _>(body, |r| r.validate()) else {
            return Ok(RagResponse::invalid_request().to_bytes());
        };
        let response = self.service.quiz(&req, &meta.trace_id).await?;
        Ok(response.to_bytes())
    }
}
