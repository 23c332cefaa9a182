//! Qdrant implementation of [`VectorIndex`] over its REST API

use super::{IndexPoint, PassagePayload, ScoredPoint, SearchFilter, StoredPoint, VectorIndex};
use crate::error::{RagbusError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

pub struct QdrantIndex {
    client: reqwest::Client,
    base_url: String,
    collection: String,
}

impl QdrantIndex {
    pub fn new(base_url: &str, collection: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            collection: collection.to_string(),
        }
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, suffix)
    }

    async fn check<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        context: &str,
    ) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RagbusError::Index(format!("{context}: HTTP {status}: {body}")));
        }
        response.json::<T>().await.map_err(|e| RagbusError::Http {
            source: e,
            context: context.to_string(),
        })
    }

    fn filter_to_json(filter: &SearchFilter) -> Value {
        let mut must = Vec::new();
        if let Some(author) = &filter.author_norm {
            must.push(json!({"key": "author_norm", "match": {"value": author}}));
        }
        if let Some(day) = &filter.pub_day {
            must.push(json!({"key": "pub_day", "match": {"value": day}}));
        }
        if let Some(topic) = &filter.topic_norm {
            must.push(json!({"key": "topics_norm", "match": {"any": [topic]}}));
        }
        if let Some(article_id) = &filter.article_id {
            must.push(json!({"key": "article_id", "match": {"value": article_id}}));
        }
        json!({ "must": must })
    }
}

#[derive(Deserialize)]
struct SearchEnvelope {
    #[serde(default)]
    result: Vec<RawScoredPoint>,
}

#[derive(Deserialize)]
struct RawScoredPoint {
    score: f32,
    #[serde(default)]
    payload: Option<PassagePayload>,
}

#[derive(Deserialize)]
struct RetrieveEnvelope {
    #[serde(default)]
    result: Vec<RawRetrievedPoint>,
}

#[derive(Deserialize)]
struct RawRetrievedPoint {
    #[serde(default)]
    vector: Option<Value>,
}

#[derive(Deserialize)]
struct ScrollEnvelope {
    result: ScrollResult,
}

#[derive(Deserialize)]
struct ScrollResult {
    #[serde(default)]
    points: Vec<RawStoredPoint>,
}

#[derive(Deserialize)]
struct RawStoredPoint {
    id: Value,
    #[serde(default)]
    payload: Option<PassagePayload>,
}

/// Qdrant returns either a bare vector or a map of named vectors depending
/// on collection configuration; accept both
fn decode_vector(value: Value) -> Option<Vec<f32>> {
    let array = match value {
        Value::Array(a) => Some(Value::Array(a)),
        Value::Object(map) => map.into_iter().next().map(|(_, v)| v),
        _ => None,
    }?;
    serde_json::from_value(array).ok()
}

fn id_to_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(&self, dimension: usize) -> Result<()> {
        let exists = self
            .client
            .get(self.collection_url(""))
            .send()
            .await
            .map_err(|e| RagbusError::Http {
                source: e,
                context: "Failed to query collection".to_string(),
            })?
            .status()
            .is_success();
        if exists {
            return Ok(());
        }

        tracing::info!(
            "Creating collection '{}' (dim {}, cosine)",
            self.collection,
            dimension
        );
        let body = json!({
            "vectors": { "size": dimension, "distance": "Cosine" }
        });
        let response = self
            .client
            .put(self.collection_url(""))
            .json(&body)
            .send()
            .await
            .map_err(|e| RagbusError::Http {
                source: e,
                context: "Failed to create collection".to_string(),
            })?;
        Self::check::<Value>(response, "create collection").await?;
        Ok(())
    }

    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = json!({ "points": points });
        let response = self
            .client
            .put(self.collection_url("/points?wait=true"))
            .json(&body)
            .send()
            .await
            .map_err(|e| RagbusError::Http {
                source: e,
                context: "Failed to upsert points".to_string(),
            })?;
        Self::check::<Value>(response, "upsert points").await?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: Option<&SearchFilter>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(filter) = filter {
            body["filter"] = Self::filter_to_json(filter);
        }

        let response = self
            .client
            .post(self.collection_url("/points/search"))
            .json(&body)
            .send()
            .await
            .map_err(|e| RagbusError::Http {
                source: e,
                context: "Failed to search points".to_string(),
            })?;
        let envelope: SearchEnvelope = Self::check(response, "search points").await?;

        Ok(envelope
            .result
            .into_iter()
            .map(|p| ScoredPoint {
                score: p.score,
                payload: p.payload.unwrap_or_default(),
            })
            .collect())
    }

    async fn retrieve_vector(&self, point_id: &str) -> Result<Option<Vec<f32>>> {
        let body = json!({
            "ids": [point_id],
            "with_vector": true,
            "with_payload": false,
        });
        let response = self
            .client
            .post(self.collection_url("/points"))
            .json(&body)
            .send()
            .await
            .map_err(|e| RagbusError::Http {
                source: e,
                context: "Failed to retrieve point".to_string(),
            })?;
        let envelope: RetrieveEnvelope = Self::check(response, "retrieve point").await?;

        Ok(envelope
            .result
            .into_iter()
            .next()
            .and_then(|p| p.vector)
            .and_then(decode_vector))
    }

    async fn scroll(&self, filter: &SearchFilter, limit: usize) -> Result<Vec<StoredPoint>> {
        let body = json!({
            "filter": Self::filter_to_json(filter),
            "limit": limit,
            "with_payload": true,
            "with_vector": false,
        });
        let response = self
            .client
            .post(self.collection_url("/points/scroll"))
            .json(&body)
            .send()
            .await
            .map_err(|e| RagbusError::Http {
                source: e,
                context: "Failed to scroll points".to_string(),
            })?;
        let envelope: ScrollEnvelope = Self::check(response, "scroll points").await?;

        Ok(envelope
            .result
            .points
            .into_iter()
            .map(|p| StoredPoint {
                id: id_to_string(&p.id),
                payload: p.payload.unwrap_or_default(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_json_covers_configured_fields() {
        let filter = SearchFilter {
            author_norm: Some("ivan petrov".into()),
            pub_day: Some("2024-03-01".into()),
            topic_norm: Some("ai".into()),
            article_id: None,
        };
        let json = QdrantIndex::filter_to_json(&filter);
        let must = json["must"].as_array().unwrap();
        assert_eq!(must.len(), 3);
        assert_eq!(must[0]["key"], "author_norm");
        assert_eq!(must[2]["match"]["any"][0], "ai");
    }

    #[test]
    fn decode_plain_and_named_vectors() {
        let plain = serde_json::json!([0.5, -1.0]);
        assert_eq!(decode_vector(plain), Some(vec![0.5, -1.0]));

        let named = serde_json::json!({"default": [0.5, 0.25]});
        assert_eq!(decode_vector(named), Some(vec![0.5, 0.25]));

        assert_eq!(decode_vector(serde_json::json!("bogus")), None);
    }

    #[test]
    fn point_ids_stringify() {
        assert_eq!(id_to_string(&serde_json::json!("uuid-ish")), "uuid-ish");
        assert_eq!(id_to_string(&serde_json::json!(42)), "42");
    }
}
