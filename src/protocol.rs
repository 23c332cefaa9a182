//! Wire contracts shared by the RPC servers and every caller
//!
//! Request bodies are validated at the boundary; an invalid shape becomes a
//! structured [`RagbusError::Validation`] mapped to a deterministic response,
//! never a crash deep in the pipeline.

use crate::error::{RagbusError, Result};
use serde::{Deserialize, Serialize};

/// Fixed Russian strings that are part of the wire contract. Callers (the
/// chat front-end) match on some of these, so they must stay byte-identical.
pub mod messages {
    pub const INVALID_REQUEST: &str = "Некорректный запрос.";
    pub const SEARCH_EMPTY: &str = "Ничего не найдено по заданным фильтрам.";
    pub const RECOMMEND_NO_SEED: &str = "Не удалось найти исходную статью для рекомендаций.";
    pub const RECOMMEND_EMPTY: &str = "Похожие публикации не найдены.";
    pub const QUIZ_EMPTY: &str = "Ничего не найдено для генерации теста.";
    pub const QUIZ_FALLBACK: &str = "Тест не удалось сгенерировать на основе найденных материалов.";
    pub const WARMING_UP: &str = "Модель ещё загружается, повторите запрос позже.";
    pub const UNAUTHORIZED: &str = "Unauthorized";
    /// Marker looked for in generated text before appending a source footer
    pub const SOURCES_MARKER: &str = "Источники";
}

/// Optional equality/membership filters for a search request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Publication day, YYYY-MM-DD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

/// Semantic search over the whole corpus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub filters: RagFilters,
}

impl SearchRequest {
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(RagbusError::Validation("query must be non-empty".into()));
        }
        Ok(())
    }
}

fn default_top_k() -> usize {
    5
}

/// Similar-article recommendation seeded by one URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendRequest {
    pub url: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl RecommendRequest {
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(RagbusError::Validation("url must be non-empty".into()));
        }
        if !(1..=20).contains(&self.top_k) {
            return Err(RagbusError::Validation(format!(
                "top_k must be in 1..=20, got {}",
                self.top_k
            )));
        }
        Ok(())
    }
}

fn default_n_questions() -> usize {
    8
}

/// Multiple-choice quiz over an explicit list of article URLs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizRequest {
    pub urls: Vec<String>,
    #[serde(default = "default_n_questions")]
    pub n_questions: usize,
}

impl QuizRequest {
    pub fn validate(&self) -> Result<()> {
        if self.urls.iter().all(|u| u.trim().is_empty()) {
            return Err(RagbusError::Validation(
                "urls must contain at least one non-empty entry".into(),
            ));
        }
        if !(1..=20).contains(&self.n_questions) {
            return Err(RagbusError::Validation(format!(
                "n_questions must be in 1..=20, got {}",
                self.n_questions
            )));
        }
        Ok(())
    }
}

/// Stable, externally visible article shape
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArticleItem {
    pub title: String,
    pub url: String,
    pub author: String,
    /// YYYY-MM-DD
    pub date: String,
    pub topic: String,
}

/// Response shared by all three operations; `summary` holds the quiz text
/// for quiz requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagResponse {
    pub summary: String,
    pub articles: Vec<ArticleItem>,
}

impl RagResponse {
    pub fn new(summary: impl Into<String>, articles: Vec<ArticleItem>) -> Self {
        Self {
            summary: summary.into(),
            articles,
        }
    }

    /// A deterministic response with no articles (errors, empty results,
    /// warming-up and auth rejections all take this shape)
    pub fn empty(summary: impl Into<String>) -> Self {
        Self::new(summary, Vec::new())
    }

    pub fn invalid_request() -> Self {
        Self::empty(messages::INVALID_REQUEST)
    }

    pub fn unauthorized() -> Self {
        Self::empty(messages::UNAUTHORIZED)
    }

    pub fn handler_failure(err: &str) -> Self {
        Self::empty(format!("Ошибка обработки запроса: {err}"))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // The response shape is plain data; serialization cannot fail
        serde_json::to_vec(self).unwrap_or_else(|_| b"{\"summary\":\"\",\"articles\":[]}".to_vec())
    }
}

/// Append a `Источники: [1][2]...[k]` footer when the generated text lacks
/// a source marker
pub fn ensure_source_footer(text: &str, n_sources: usize) -> String {
    if text.contains(messages::SOURCES_MARKER) || n_sources == 0 {
        return text.to_string();
    }
    let refs: String = (1..=n_sources).map(|i| format!("[{i}]")).collect();
    format!("{text}\n{}: {refs}", messages::SOURCES_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_request_rejects_blank_query() {
        let req = SearchRequest {
            query: "   ".to_string(),
            filters: RagFilters::default(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn search_request_defaults_filters() {
        let req: SearchRequest = serde_json::from_str(r#"{"query": "neural networks"}"#).unwrap();
        assert!(req.validate().is_ok());
        assert!(req.filters.author.is_none());
    }

    #[test]
    fn recommend_request_bounds_top_k() {
        let req: RecommendRequest =
            serde_json::from_str(r#"{"url": "https://example.com/a", "top_k": 21}"#).unwrap();
        assert!(req.validate().is_err());

        let req: RecommendRequest =
            serde_json::from_str(r#"{"url": "https://example.com/a"}"#).unwrap();
        assert_eq!(req.top_k, 5);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn quiz_request_requires_urls() {
        let req: QuizRequest = serde_json::from_str(r#"{"urls": ["", "  "]}"#).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn source_footer_appended_once() {
        let with = ensure_source_footer("Кратко о главном.", 3);
        assert!(with.ends_with("Источники: [1][2][3]"));

        let already = "Резюме.\nИсточники: [1]";
        assert_eq!(ensure_source_footer(already, 3), already);
    }

    #[test]
    fn response_roundtrip() {
        let resp = RagResponse::new(
            "ok",
            vec![ArticleItem {
                title: "t".into(),
                url: "u".into(),
                author: "a".into(),
                date: "2024-01-01".into(),
                topic: "ai".into(),
            }],
        );
        let parsed: RagResponse = serde_json::from_slice(&resp.to_bytes()).unwrap();
        assert_eq!(parsed.articles, resp.articles);
    }
}
