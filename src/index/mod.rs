//! Vector index collaborator
//!
//! The storage/search engine itself is external (Qdrant); this module defines
//! the contract the rest of the crate depends on, the chunk payload schema
//! and the metadata filter model.

mod qdrant;

pub use qdrant::QdrantIndex;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable article identity: UUIDv5 of the article URL.
///
/// Part of the storage contract — recommend's direct first-chunk lookup and
/// the indexer's point-id scheme both derive from it.
pub fn article_id_from_url(url: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes()).to_string()
}

/// Point id for one chunk of an article. Chunk 0 reuses the article id so a
/// seed article's vector can be fetched by identity without a scan.
pub fn chunk_point_id(url: &str, chunk_id: u32) -> String {
    if chunk_id == 0 {
        article_id_from_url(url)
    } else {
        Uuid::new_v5(
            &Uuid::NAMESPACE_URL,
            format!("{url}#chunk-{chunk_id}").as_bytes(),
        )
        .to_string()
    }
}

/// Payload stored with every indexed chunk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PassagePayload {
    #[serde(default)]
    pub article_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub author_norm: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub pub_date: String,
    /// Publication day, YYYY-MM-DD
    #[serde(default)]
    pub pub_day: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub topics_norm: Vec<String>,
    #[serde(default)]
    pub subtopic_raw: String,
    #[serde(default)]
    pub chunk_id: u32,
    #[serde(default)]
    pub text: String,
}

/// One scored hit from a similarity search
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub score: f32,
    pub payload: PassagePayload,
}

/// One stored point returned by a metadata scroll
#[derive(Debug, Clone)]
pub struct StoredPoint {
    pub id: String,
    pub payload: PassagePayload,
}

/// A point to upsert
#[derive(Debug, Clone, Serialize)]
pub struct IndexPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: PassagePayload,
}

/// Equality/membership filter over chunk metadata. An all-`None` filter is
/// never constructed; `build_filter` returns `None` instead, meaning an
/// unfiltered search over the whole corpus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    pub author_norm: Option<String>,
    pub pub_day: Option<String>,
    pub topic_norm: Option<String>,
    pub article_id: Option<String>,
}

impl SearchFilter {
    /// Identity filter for all chunks of one article
    pub fn by_article_id(article_id: &str) -> Self {
        Self {
            article_id: Some(article_id.to_string()),
            ..Default::default()
        }
    }
}

/// Build the metadata filter for a search request; normalizes author and
/// topic the same way the indexer does
pub fn build_filter(
    author: Option<&str>,
    day: Option<&str>,
    topic: Option<&str>,
) -> Option<SearchFilter> {
    let non_blank = |s: Option<&str>| {
        s.map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
    };

    let filter = SearchFilter {
        author_norm: non_blank(author).map(|s| s.to_lowercase()),
        pub_day: non_blank(day),
        topic_norm: non_blank(topic).map(|s| s.to_lowercase()),
        article_id: None,
    };

    if filter == SearchFilter::default() {
        None
    } else {
        Some(filter)
    }
}

/// Contract the retrieval layer and the indexer depend on
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if it does not exist yet
    async fn ensure_collection(&self, dimension: usize) -> Result<()>;

    /// Insert or overwrite points
    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<()>;

    /// Similarity search, hits ordered by descending score
    async fn search(
        &self,
        vector: &[f32],
        filter: Option<&SearchFilter>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>>;

    /// Fetch the stored vector of one point, if present
    async fn retrieve_vector(&self, point_id: &str) -> Result<Option<Vec<f32>>>;

    /// Scan points matching a metadata filter, without vectors
    async fn scroll(&self, filter: &SearchFilter, limit: usize) -> Result<Vec<StoredPoint>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_fields_yield_no_filter() {
        assert_eq!(build_filter(None, None, None), None);
        assert_eq!(build_filter(Some("  "), Some(""), None), None);
    }

    #[test]
    fn filter_normalizes_author_and_topic() {
        let f = build_filter(Some(" Ivan Petrov "), None, Some("AI")).unwrap();
        assert_eq!(f.author_norm.as_deref(), Some("ivan petrov"));
        assert_eq!(f.topic_norm.as_deref(), Some("ai"));
        assert_eq!(f.pub_day, None);
    }

    #[test]
    fn day_is_kept_verbatim() {
        let f = build_filter(None, Some("2024-03-01"), None).unwrap();
        assert_eq!(f.pub_day.as_deref(), Some("2024-03-01"));
    }

    #[test]
    fn article_id_is_deterministic() {
        let a = article_id_from_url("https://example.com/post");
        let b = article_id_from_url("https://example.com/post");
        assert_eq!(a, b);
        assert_ne!(a, article_id_from_url("https://example.com/other"));
    }

    #[test]
    fn first_chunk_shares_the_article_id() {
        let url = "https://example.com/post";
        assert_eq!(chunk_point_id(url, 0), article_id_from_url(url));
        assert_ne!(chunk_point_id(url, 1), chunk_point_id(url, 0));
        assert_ne!(chunk_point_id(url, 1), chunk_point_id(url, 2));
    }
}
