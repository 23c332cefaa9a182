//! Offline indexer: CSV articles -> normalized chunk points in the vector
//! index
//!
//! Reads article dumps from a CSV file or directory, normalizes metadata,
//! splits content into overlapping chunks, embeds them in batches and
//! upserts the points. Runs as its own `ragbus index` process, independent
//! of the serving path.

mod chunker;
mod normalize;

pub use chunker::SimpleChunker;
pub use normalize::{norm_key, norm_text, parse_topics, to_pub_day};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagbusError, Result};
use crate::index::{article_id_from_url, chunk_point_id, IndexPoint, PassagePayload, VectorIndex};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One row of the input CSV
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CsvArticle {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub pub_date: String,
    #[serde(default)]
    pub subtopic: String,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IndexStats {
    pub articles: usize,
    pub chunks: usize,
    pub skipped: usize,
}

pub struct Indexer {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    chunker: SimpleChunker,
    upsert_batch_size: usize,
}

impl Indexer {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        chunk_size: usize,
        chunk_overlap: usize,
        upsert_batch_size: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            chunker: SimpleChunker::new(chunk_size, chunk_overlap),
            upsert_batch_size: upsert_batch_size.max(1),
        }
    }

    /// Index every CSV file at `input` (a file or a directory)
    pub async fn run(&self, input: &Path) -> Result<IndexStats> {
        self.index
            .ensure_collection(self.embedder.dimension())
            .await?;

        let mut stats = IndexStats::default();
        let mut batch: Vec<(String, PassagePayload)> = Vec::new();

        for csv_path in list_csv_files(input)? {
            tracing::info!("Indexing {}", csv_path.display());
            let mut reader = csv::Reader::from_path(&csv_path)?;
            for record in reader.deserialize::<CsvArticle>() {
                let article = record?;
                let points = build_points(&article, &self.chunker);
                if points.is_empty() {
                    stats.skipped += 1;
                    continue;
                }

                stats.articles += 1;
                stats.chunks += points.len();
                batch.extend(points);

                if batch.len() >= self.upsert_batch_size {
                    self.flush(std::mem::take(&mut batch)).await?;
                }

                if stats.articles % 200 == 0 {
                    tracing::info!(
                        "Progress: {} articles, {} chunks",
                        stats.articles,
                        stats.chunks
                    );
                }
            }
        }

        self.flush(batch).await?;
        tracing::info!(
            "Indexing completed: {} articles, {} chunks, {} skipped",
            stats.articles,
            stats.chunks,
            stats.skipped
        );
        Ok(stats)
    }

    /// Embed one batch of chunk texts off the async executor and upsert
    async fn flush(&self, batch: Vec<(String, PassagePayload)>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = batch.iter().map(|(_, p)| p.text.clone()).collect();
        let embedder = Arc::clone(&self.embedder);
        let vectors = tokio::task::spawn_blocking(move || embedder.embed_passages(&texts))
            .await
            .map_err(|e| RagbusError::Embedding(format!("Embedding task panicked: {e}")))??;

        let points: Vec<IndexPoint> = batch
            .into_iter()
            .zip(vectors)
            .map(|((id, payload), vector)| IndexPoint {
                id,
                vector,
                payload,
            })
            .collect();

        let count = points.len();
        self.index.upsert(points).await?;
        tracing::info!("Upserted batch of {} points", count);
        Ok(())
    }
}

/// Normalize one article and split it into chunk points. Articles without a
/// URL or content are degenerate rows and yield nothing.
pub fn build_points(article: &CsvArticle, chunker: &SimpleChunker) -> Vec<(String, PassagePayload)> {
    let url = norm_text(&article.url);
    let content = norm_text(&article.content);
    if url.is_empty() || content.is_empty() {
        return Vec::new();
    }

    let title = norm_text(&article.title);
    let author = norm_text(&article.author);
    let platform = norm_text(&article.platform);
    let pub_date = norm_text(&article.pub_date);
    let pub_day = to_pub_day(&pub_date);
    let article_id = article_id_from_url(&url);
    let (topics, topics_norm, subtopic_raw) = parse_topics(&article.subtopic);

    chunker
        .split(&content)
        .into_iter()
        .enumerate()
        .map(|(chunk_id, text)| {
            let chunk_id = chunk_id as u32;
            let payload = PassagePayload {
                article_id: article_id.clone(),
                title: title.clone(),
                author: author.clone(),
                author_norm: norm_key(&author),
                platform: platform.clone(),
                url: url.clone(),
                pub_date: pub_date.clone(),
                pub_day: pub_day.clone(),
                topics: topics.clone(),
                topics_norm: topics_norm.clone(),
                subtopic_raw: subtopic_raw.clone(),
                chunk_id,
                text,
            };
            (chunk_point_id(&url, chunk_id), payload)
        })
        .collect()
}

/// A single `.csv` file, or every `.csv` directly inside a directory
fn list_csv_files(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    let entries = std::fs::read_dir(input).map_err(|e| RagbusError::Io {
        source: e,
        context: format!("Failed to read input directory: {}", input.display()),
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .map(|ext| ext.eq_ignore_ascii_case("csv"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn article(url: &str, content: &str) -> CsvArticle {
        CsvArticle {
            title: " Заголовок  статьи ".into(),
            author: " Ivan  Petrov ".into(),
            platform: "habr".into(),
            url: url.into(),
            content: content.into(),
            pub_date: "2024-03-05T12:30:00Z".into(),
            subtopic: "AI, ML".into(),
        }
    }

    #[test]
    fn rows_without_url_or_content_are_skipped() {
        let chunker = SimpleChunker::new(100, 10);
        assert!(build_points(&article("", "text"), &chunker).is_empty());
        assert!(build_points(&article("https://e.com/a", "  "), &chunker).is_empty());
    }

    #[test]
    fn points_carry_normalized_payload() {
        let chunker = SimpleChunker::new(100, 10);
        let points = build_points(&article("https://e.com/a", "короткий текст"), &chunker);
        assert_eq!(points.len(), 1);

        let (id, payload) = &points[0];
        assert_eq!(*id, article_id_from_url("https://e.com/a"));
        assert_eq!(payload.title, "Заголовок статьи");
        assert_eq!(payload.author_norm, "ivan petrov");
        assert_eq!(payload.pub_day, "2024-03-05");
        assert_eq!(payload.topics_norm, vec!["ai", "ml"]);
        assert_eq!(payload.chunk_id, 0);
    }

    #[test]
    fn chunk_ids_and_point_ids_are_distinct_per_chunk() {
        let chunker = SimpleChunker::new(10, 2);
        let points = build_points(
            &article("https://e.com/a", "a".repeat(25).as_str()),
            &chunker,
        );
        assert!(points.len() > 1);

        let ids: std::collections::HashSet<_> = points.iter().map(|(id, _)| id).collect();
        assert_eq!(ids.len(), points.len());
        for (i, (_, payload)) in points.iter().enumerate() {
            assert_eq!(payload.chunk_id, i as u32);
        }
    }

    #[test]
    fn csv_rows_deserialize_with_extra_columns() {
        let data = "id,title,author,platform,url,content,pub_date,subtopic\n\
                    1,T,A,habr,https://e.com/a,Content here,2024-01-01T00:00:00Z,AI\n";
        let mut reader = csv::Reader::from_reader(data.as_bytes());
        let rows: Vec<CsvArticle> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].url, "https://e.com/a");
        assert_eq!(rows[0].subtopic, "AI");
    }

    #[test]
    fn list_csv_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.csv", "a.CSV", "notes.txt"] {
            let mut f = std::fs::File::create(dir.path().join(name)).unwrap();
            writeln!(f, "x").unwrap();
        }

        let files = list_csv_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.CSV", "b.csv"]);
    }
}
