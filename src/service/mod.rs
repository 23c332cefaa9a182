//! Query service: orchestration of the three RPC operations
//!
//! Each operation validates its input at the boundary, resolves a query or
//! seed vector, retrieves and aggregates passages, projects the result into
//! the contract shape and (for search/quiz) asks the generator for grounded
//! text. Every failure mode still yields a well-formed response: "nothing
//! found" and "warming up" are deterministic responses, not errors.

mod handlers;
mod prompt;

pub use handlers::{QuizHandler, RecommendHandler, SearchHandler};
pub use prompt::{PromptBuilder, PromptSource};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagbusError, Result};
use crate::generation::Generator;
use crate::index::{article_id_from_url, build_filter, SearchFilter, VectorIndex};
use crate::protocol::{
    ensure_source_footer, messages, ArticleItem, QuizRequest, RagResponse, RecommendRequest,
    SearchRequest,
};
use crate::retrieval::{aggregate, AggregatedArticle, Retriever};
use std::sync::Arc;

/// Chunk hits fetched per search before aggregation
const SEARCH_CHUNK_LIMIT: usize = 50;
/// Articles returned by search
const SEARCH_MAX_ARTICLES: usize = 5;
/// Excerpts kept per article
const MAX_TEXTS_PER_ARTICLE: usize = 3;
/// Chunks scanned per quiz article
const QUIZ_CHUNKS_PER_ARTICLE: usize = 8;
/// Sources handed to the quiz prompt
const QUIZ_MAX_SOURCES: usize = 5;

pub struct RagService {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    retriever: Retriever,
    generator: Arc<dyn Generator>,
    /// One loaded model serves all queues; at most one inference at a time.
    /// This is a deliberate throughput ceiling.
    generation_lock: tokio::sync::Mutex<()>,
}

impl RagService {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            embedder,
            retriever: Retriever::new(Arc::clone(&index)),
            index,
            generator,
            generation_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Semantic search: embed the query, retrieve under the metadata filter,
    /// aggregate and summarize
    pub async fn search(&self, req: &SearchRequest, trace_id: &str) -> Result<RagResponse> {
        let filter = build_filter(
            req.filters.author.as_deref(),
            req.filters.date.as_deref(),
            req.filters.topic.as_deref(),
        );

        let vector = self.embed_query(&req.query).await?;
        let hits = self
            .retriever
            .retrieve(&vector, filter.as_ref(), SEARCH_CHUNK_LIMIT)
            .await?;
        let aggregated = aggregate(&hits, SEARCH_MAX_ARTICLES, MAX_TEXTS_PER_ARTICLE);

        if aggregated.is_empty() {
            return Ok(RagResponse::empty(messages::SEARCH_EMPTY));
        }

        let (articles, sources) = build_sources(&aggregated, SEARCH_MAX_ARTICLES);

        if !self.generator.ready().await {
            tracing::warn!(trace_id = %trace_id, "Generator not ready, returning warming-up response");
            return Ok(RagResponse::empty(messages::WARMING_UP));
        }

        let prompt = PromptBuilder::build_summary(&req.query, &sources);
        let mut summary = self.generate(&prompt).await?;
        if summary.is_empty() {
            summary = format!("Найдено {} статей по запросу «{}».", articles.len(), req.query);
        }
        let summary = ensure_source_footer(&summary, articles.len());

        Ok(RagResponse::new(summary, articles))
    }

    /// Similar-article recommendation for a seed URL. No generation call —
    /// the summary is template-formatted.
    pub async fn recommend(&self, req: &RecommendRequest, trace_id: &str) -> Result<RagResponse> {
        let seed_url = req.url.trim();
        let seed_article_id = article_id_from_url(seed_url);

        let seed_vector = match self.resolve_seed_vector(&seed_article_id).await? {
            Some(v) => v,
            None => {
                tracing::info!(trace_id = %trace_id, "No indexed chunks for seed url");
                return Ok(RagResponse::empty(messages::RECOMMEND_NO_SEED));
            }
        };

        // Over-fetch: many chunks of the seed article itself come back first
        let hits = self
            .retriever
            .retrieve(&seed_vector, None, req.top_k * 20)
            .await?;
        let mut aggregated = aggregate(&hits, req.top_k + 5, MAX_TEXTS_PER_ARTICLE);
        aggregated.retain(|a| a.payload.article_id != seed_article_id);

        if aggregated.is_empty() {
            return Ok(RagResponse::empty(messages::RECOMMEND_EMPTY));
        }

        let (articles, _) = build_sources(&aggregated, req.top_k);
        if articles.is_empty() {
            return Ok(RagResponse::empty(messages::RECOMMEND_EMPTY));
        }

        let refs: String = (1..=articles.len()).map(|i| format!("[{i}]")).collect();
        let summary = format!(
            "Найдено {} похожих публикаций. {}: {refs}",
            articles.len(),
            messages::SOURCES_MARKER
        );
        Ok(RagResponse::new(summary, articles))
    }

    /// Quiz generation over an explicit list of article URLs
    pub async fn quiz(&self, req: &QuizRequest, trace_id: &str) -> Result<RagResponse> {
        let mut aggregated: Vec<AggregatedArticle> = Vec::new();

        for url in &req.urls {
            let url = url.trim();
            if url.is_empty() {
                continue;
            }
            let article_id = article_id_from_url(url);
            let mut points = self
                .index
                .scroll(
                    &SearchFilter::by_article_id(&article_id),
                    QUIZ_CHUNKS_PER_ARTICLE,
                )
                .await?;
            if points.is_empty() {
                tracing::debug!(trace_id = %trace_id, "No indexed chunks for quiz url {url}");
                continue;
            }

            points.sort_by_key(|p| p.payload.chunk_id);
            let texts: Vec<String> = points
                .iter()
                .take(MAX_TEXTS_PER_ARTICLE)
                .map(|p| p.payload.text.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();

            aggregated.push(AggregatedArticle {
                best_score: 1.0,
                payload: points[0].payload.clone(),
                texts,
            });
        }

        if aggregated.is_empty() {
            return Ok(RagResponse::empty(messages::QUIZ_EMPTY));
        }

        let limit = aggregated.len().min(QUIZ_MAX_SOURCES);
        let (articles, sources) = build_sources(&aggregated, limit);

        if !self.generator.ready().await {
            tracing::warn!(trace_id = %trace_id, "Generator not ready, returning warming-up response");
            return Ok(RagResponse::empty(messages::WARMING_UP));
        }

        let prompt =
            PromptBuilder::build_quiz("Тест по выбранным материалам", &sources, req.n_questions);
        let mut quiz_text = self.generate(&prompt).await?;
        if quiz_text.is_empty() {
            quiz_text = messages::QUIZ_FALLBACK.to_string();
        }
        let quiz_text = ensure_source_footer(&quiz_text, articles.len());

        Ok(RagResponse::new(quiz_text, articles))
    }

    /// Embedding is CPU-bound; keep it off the async executor
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let embedder = Arc::clone(&self.embedder);
        let query = query.to_string();
        tokio::task::spawn_blocking(move || embedder.embed_query(&query))
            .await
            .map_err(|e| RagbusError::Embedding(format!("Embedding task panicked: {e}")))?
    }

    /// Direct lookup of the seed's first-chunk vector, falling back to a
    /// metadata scan for collections written under older id schemes
    async fn resolve_seed_vector(&self, seed_article_id: &str) -> Result<Option<Vec<f32>>> {
        if let Some(vector) = self.index.retrieve_vector(seed_article_id).await? {
            return Ok(Some(vector));
        }
        let points = self
            .index
            .scroll(&SearchFilter::by_article_id(seed_article_id), 1)
            .await?;
        match points.first() {
            Some(point) => self.index.retrieve_vector(&point.id).await,
            None => Ok(None),
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let _guard = self.generation_lock.lock().await;
        self.generator.generate(prompt).await
    }
}

/// Project aggregated articles into the two parallel views: compact contract
/// items and richer prompt sources with excerpt material
fn build_sources(
    aggregated: &[AggregatedArticle],
    limit: usize,
) -> (Vec<ArticleItem>, Vec<PromptSource>) {
    let mut articles = Vec::new();
    let mut sources = Vec::new();

    for article in aggregated.iter().take(limit) {
        let p = &article.payload;
        let item = ArticleItem {
            title: p.title.clone(),
            url: p.url.clone(),
            author: p.author.clone(),
            // the contract expects YYYY-MM-DD
            date: p.pub_day.clone(),
            topic: p.subtopic_raw.clone(),
        };

        let excerpt = article
            .texts
            .iter()
            .filter(|t| !t.is_empty())
            .take(MAX_TEXTS_PER_ARTICLE)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n---\n");

        sources.push(PromptSource {
            title: item.title.clone(),
            url: item.url.clone(),
            author: item.author.clone(),
            date: item.date.clone(),
            topic: item.topic.clone(),
            excerpt,
        });
        articles.push(item);
    }

    (articles, sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexPoint, PassagePayload, ScoredPoint, StoredPoint};
    use crate::protocol::RagFilters;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubEmbedder;

    impl EmbeddingProvider for StubEmbedder {
        fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
        fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
        fn dimension(&self) -> usize {
            2
        }
    }

    /// In-memory index: search results are served verbatim, identity lookups
    /// go against the stored points
    #[derive(Default)]
    struct StubIndex {
        search_results: Vec<ScoredPoint>,
        points: Vec<(String, Option<Vec<f32>>, PassagePayload)>,
    }

    #[async_trait]
    impl VectorIndex for StubIndex {
        async fn ensure_collection(&self, _dimension: usize) -> Result<()> {
            Ok(())
        }
        async fn upsert(&self, _points: Vec<IndexPoint>) -> Result<()> {
            Ok(())
        }
        async fn search(
            &self,
            _vector: &[f32],
            _filter: Option<&SearchFilter>,
            limit: usize,
        ) -> Result<Vec<ScoredPoint>> {
            Ok(self.search_results.iter().take(limit).cloned().collect())
        }
        async fn retrieve_vector(&self, point_id: &str) -> Result<Option<Vec<f32>>> {
            Ok(self
                .points
                .iter()
                .find(|(id, _, _)| id == point_id)
                .and_then(|(_, v, _)| v.clone()))
        }
        async fn scroll(&self, filter: &SearchFilter, limit: usize) -> Result<Vec<StoredPoint>> {
            let wanted = filter.article_id.as_deref();
            Ok(self
                .points
                .iter()
                .filter(|(_, _, p)| wanted.is_none() || wanted == Some(p.article_id.as_str()))
                .take(limit)
                .map(|(id, _, p)| StoredPoint {
                    id: id.clone(),
                    payload: p.clone(),
                })
                .collect())
        }
    }

    struct StubGenerator {
        ready: bool,
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl StubGenerator {
        fn new(ready: bool, reply: &str) -> Self {
            Self {
                ready,
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Generator for StubGenerator {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
        async fn ready(&self) -> bool {
            self.ready
        }
    }

    fn payload(article_id: &str, url: &str, chunk_id: u32, text: &str) -> PassagePayload {
        PassagePayload {
            article_id: article_id.to_string(),
            title: format!("Статья {article_id}"),
            author: "Автор".into(),
            url: url.to_string(),
            pub_day: "2024-01-01".into(),
            subtopic_raw: "ИИ".into(),
            chunk_id,
            text: text.to_string(),
            ..Default::default()
        }
    }

    fn service(index: StubIndex, generator: StubGenerator) -> RagService {
        RagService::new(Arc::new(StubEmbedder), Arc::new(index), Arc::new(generator))
    }

    fn search_request(query: &str) -> SearchRequest {
        SearchRequest {
            query: query.to_string(),
            filters: RagFilters::default(),
        }
    }

    #[tokio::test]
    async fn search_with_no_hits_returns_nothing_found() {
        let svc = service(StubIndex::default(), StubGenerator::new(true, "unused"));
        let resp = svc.search(&search_request("graph databases"), "").await.unwrap();
        assert_eq!(resp.summary, messages::SEARCH_EMPTY);
        assert!(resp.articles.is_empty());
    }

    #[tokio::test]
    async fn search_aggregates_and_appends_source_footer() {
        let index = StubIndex {
            search_results: vec![
                ScoredPoint {
                    score: 0.9,
                    payload: payload("x", "https://e.com/x", 0, "x1"),
                },
                ScoredPoint {
                    score: 0.8,
                    payload: payload("x", "https://e.com/x", 1, "x2"),
                },
                ScoredPoint {
                    score: 0.6,
                    payload: payload("y", "https://e.com/y", 0, "y1"),
                },
            ],
            ..Default::default()
        };
        // Generated text lacks the marker, so the footer is appended
        let svc = service(index, StubGenerator::new(true, "Краткое резюме. [1][2]"));
        let resp = svc.search(&search_request("нейронные сети"), "").await.unwrap();

        assert_eq!(resp.articles.len(), 2);
        assert_eq!(resp.articles[0].title, "Статья x");
        assert_eq!(resp.articles[1].title, "Статья y");
        assert!(resp.summary.contains("Источники: [1][2]"));
    }

    #[tokio::test]
    async fn search_while_model_loads_returns_warming_up() {
        let index = StubIndex {
            search_results: vec![ScoredPoint {
                score: 0.9,
                payload: payload("x", "https://e.com/x", 0, "x1"),
            }],
            ..Default::default()
        };
        let svc = service(index, StubGenerator::new(false, "unused"));
        let resp = svc.search(&search_request("q"), "").await.unwrap();
        assert_eq!(resp.summary, messages::WARMING_UP);
        assert!(resp.articles.is_empty());
    }

    #[tokio::test]
    async fn recommend_without_seed_article_reports_it() {
        let svc = service(StubIndex::default(), StubGenerator::new(true, "unused"));
        let req = RecommendRequest {
            url: "https://e.com/missing".into(),
            top_k: 5,
        };
        let resp = svc.recommend(&req, "").await.unwrap();
        assert_eq!(resp.summary, messages::RECOMMEND_NO_SEED);
        assert!(resp.articles.is_empty());
    }

    #[tokio::test]
    async fn recommend_excludes_the_seed_article() {
        let seed_url = "https://e.com/seed";
        let seed_id = article_id_from_url(seed_url);
        let index = StubIndex {
            points: vec![(
                seed_id.clone(),
                Some(vec![1.0, 0.0]),
                payload(&seed_id, seed_url, 0, "seed text"),
            )],
            search_results: vec![
                ScoredPoint {
                    score: 0.99,
                    payload: payload(&seed_id, seed_url, 0, "seed text"),
                },
                ScoredPoint {
                    score: 0.7,
                    payload: payload("other", "https://e.com/other", 0, "other text"),
                },
            ],
        };
        let svc = service(index, StubGenerator::new(true, "unused"));
        let req = RecommendRequest {
            url: seed_url.into(),
            top_k: 5,
        };
        let resp = svc.recommend(&req, "").await.unwrap();

        assert_eq!(resp.articles.len(), 1);
        assert_eq!(resp.articles[0].url, "https://e.com/other");
        assert!(resp.summary.starts_with("Найдено 1 похожих публикаций."));
    }

    #[tokio::test]
    async fn recommend_falls_back_to_metadata_scan_for_seed_vector() {
        let seed_url = "https://e.com/legacy";
        let seed_id = article_id_from_url(seed_url);
        // Legacy scheme: the first chunk's point id is not the article id
        let index = StubIndex {
            points: vec![(
                "legacy-point-id".to_string(),
                Some(vec![1.0, 0.0]),
                payload(&seed_id, seed_url, 0, "seed"),
            )],
            search_results: vec![ScoredPoint {
                score: 0.7,
                payload: payload("other", "https://e.com/other", 0, "text"),
            }],
        };
        let svc = service(index, StubGenerator::new(true, "unused"));
        let req = RecommendRequest {
            url: seed_url.into(),
            top_k: 3,
        };
        let resp = svc.recommend(&req, "").await.unwrap();
        assert_eq!(resp.articles.len(), 1);
    }

    #[tokio::test]
    async fn quiz_uses_only_urls_with_indexed_chunks() {
        let found_url = "https://e.com/found";
        let found_id = article_id_from_url(found_url);
        let index = StubIndex {
            points: vec![
                (
                    format!("{found_id}-1"),
                    None,
                    payload(&found_id, found_url, 1, "chunk two"),
                ),
                (
                    found_id.clone(),
                    None,
                    payload(&found_id, found_url, 0, "chunk one"),
                ),
            ],
            ..Default::default()
        };
        let svc = service(index, StubGenerator::new(true, "Вопрос 1. [1]"));
        let req = QuizRequest {
            urls: vec![found_url.into(), "https://e.com/absent".into()],
            n_questions: 4,
        };
        let resp = svc.quiz(&req, "").await.unwrap();

        // Only the found article contributes, and the footer is appended
        assert_eq!(resp.articles.len(), 1);
        assert_eq!(resp.articles[0].url, found_url);
        assert!(resp.summary.contains("Источники: [1]"));
    }

    #[tokio::test]
    async fn quiz_with_no_indexed_urls_reports_it() {
        let svc = service(StubIndex::default(), StubGenerator::new(true, "unused"));
        let req = QuizRequest {
            urls: vec!["https://e.com/a".into()],
            n_questions: 4,
        };
        let resp = svc.quiz(&req, "").await.unwrap();
        assert_eq!(resp.summary, messages::QUIZ_EMPTY);
    }

    #[test]
    fn build_sources_joins_excerpts() {
        let aggregated = vec![AggregatedArticle {
            best_score: 0.9,
            payload: payload("x", "https://e.com/x", 0, "head"),
            texts: vec!["one".into(), "two".into()],
        }];
        let (articles, sources) = build_sources(&aggregated, 5);
        assert_eq!(articles[0].date, "2024-01-01");
        assert_eq!(articles[0].topic, "ИИ");
        assert_eq!(sources[0].excerpt, "one\n---\ntwo");
    }
}
