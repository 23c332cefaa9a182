//! Retrieval and per-article aggregation
//!
//! A similarity search returns scored chunks; callers want articles. The
//! fold here groups hits by `article_id`, keeps the best score and a bounded
//! set of excerpt texts per article, and ranks articles by best score.

use crate::error::Result;
use crate::index::{PassagePayload, SearchFilter, VectorIndex};
use std::collections::HashMap;
use std::sync::Arc;

/// One scored chunk returned by a similarity search
#[derive(Debug, Clone)]
pub struct PassageHit {
    pub score: f32,
    pub payload: PassagePayload,
}

/// The fold of all hits sharing one article identity
#[derive(Debug, Clone)]
pub struct AggregatedArticle {
    /// Maximum score over the contributing hits
    pub best_score: f32,
    /// Payload of the first-seen (highest ranked) contributing hit
    pub payload: PassagePayload,
    /// Distinct non-empty excerpts, first-seen order, capped
    pub texts: Vec<String>,
}

/// Fold hits by article id.
///
/// Hits without an `article_id` are malformed records and skipped. The
/// result is sorted by best score descending; the sort is stable, so ties
/// keep first-seen order. Output is truncated to `max_articles`.
pub fn aggregate(
    hits: &[PassageHit],
    max_articles: usize,
    max_texts_per_article: usize,
) -> Vec<AggregatedArticle> {
    let mut by_article: HashMap<&str, usize> = HashMap::new();
    let mut articles: Vec<AggregatedArticle> = Vec::new();

    for hit in hits {
        let article_id = hit.payload.article_id.as_str();
        if article_id.is_empty() {
            continue;
        }
        let text = hit.payload.text.trim();

        match by_article.get(article_id) {
            None => {
                let texts = if text.is_empty() || max_texts_per_article == 0 {
                    Vec::new()
                } else {
                    vec![text.to_string()]
                };
                by_article.insert(article_id, articles.len());
                articles.push(AggregatedArticle {
                    best_score: hit.score,
                    payload: hit.payload.clone(),
                    texts,
                });
            }
            Some(&idx) => {
                let article = &mut articles[idx];
                article.best_score = article.best_score.max(hit.score);
                if !text.is_empty()
                    && article.texts.len() < max_texts_per_article
                    && !article.texts.iter().any(|t| t == text)
                {
                    article.texts.push(text.to_string());
                }
            }
        }
    }

    articles.sort_by(|a, b| {
        b.best_score
            .partial_cmp(&a.best_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    articles.truncate(max_articles);
    articles
}

/// Thin retrieval layer over the vector index
pub struct Retriever {
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    pub fn new(index: Arc<dyn VectorIndex>) -> Self {
        Self { index }
    }

    /// One similarity search; hits arrive pre-ordered by descending score
    pub async fn retrieve(
        &self,
        vector: &[f32],
        filter: Option<&SearchFilter>,
        limit: usize,
    ) -> Result<Vec<PassageHit>> {
        let points = self.index.search(vector, filter, limit).await?;
        Ok(points
            .into_iter()
            .map(|p| PassageHit {
                score: p.score,
                payload: p.payload,
            })
            .collect())
    }
}
