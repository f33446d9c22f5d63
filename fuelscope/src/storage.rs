use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// One embedded window of an article body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// `link#index`; identity of the window inside its collection
    pub id: String,
    pub link: String,
    pub title: String,
    pub publish: String,
    pub publish_ts: i64,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Persistent, keyed set of chunks and their embeddings.
#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert chunks with their embeddings; ids already present are left untouched.
    /// Returns the number of rows actually written.
    async fn insert(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<usize>;

    /// Delete every chunk with `publish_ts < cutoff_ts`; returns how many went.
    async fn delete_older_than(&self, cutoff_ts: i64) -> Result<usize>;

    /// All chunks, or only those published strictly before `published_before`.
    async fn get(&self, published_before: Option<i64>) -> Result<Vec<Chunk>>;

    /// The `k` chunks closest to `embedding` by cosine similarity, best first.
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;

    async fn count(&self) -> Result<usize>;

    /// Distinct source links present in the collection.
    async fn links(&self) -> Result<HashSet<String>> {
        Ok(self.get(None).await?.into_iter().map(|c| c.link).collect())
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

fn top_k<I>(query: &[f32], rows: I, k: usize) -> Vec<ScoredChunk>
where
    I: IntoIterator<Item = (Chunk, Vec<f32>)>,
{
    let mut scored: Vec<ScoredChunk> = rows
        .into_iter()
        .map(|(chunk, embedding)| ScoredChunk {
            score: cosine_similarity(query, &embedding),
            chunk,
        })
        .collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored.truncate(k);
    scored
}

/// Convert Vec<f32> to Vec<u8> (Little Endian bytes) for BLOB storage
fn f32_vec_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_f32_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Chunks stored in an SQLite file, namespaced by collection name.
/// Similarity search is a full scan of the collection.
pub struct SqliteVectorStore {
    pool: SqlitePool,
    collection: String,
}

impl SqliteVectorStore {
    pub const DB_FILE: &'static str = "chunks.sqlite3";

    /// Open (creating if needed) the collection stored under `persist_dir`.
    pub async fn open(persist_dir: &Path, collection: &str) -> Result<Self> {
        let db_path = persist_dir.join(Self::DB_FILE);
        let pool = common::init_db_pool(&db_path.to_string_lossy()).await?;
        let store = Self {
            pool,
            collection: collection.to_string(),
        };
        store.ensure_schema().await?;
        info!(path = %db_path.display(), collection, "vector store opened");
        Ok(store)
    }

    /// Whether a persisted collection already exists under `persist_dir`.
    pub fn exists(persist_dir: &Path) -> bool {
        persist_dir.join(Self::DB_FILE).exists()
    }

    async fn ensure_schema(&self) -> Result<()> {
        let stmts = [
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                link TEXT NOT NULL,
                title TEXT NOT NULL,
                publish TEXT NOT NULL,
                publish_ts INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                PRIMARY KEY (collection, id)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_chunks_publish_ts ON chunks (collection, publish_ts)",
            "CREATE INDEX IF NOT EXISTS idx_chunks_link ON chunks (collection, link)",
        ];
        for stmt in stmts {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .context("failed to create vector store schema")?;
        }
        Ok(())
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Chunk {
        Chunk {
            id: row.get("id"),
            link: row.get("link"),
            title: row.get("title"),
            publish: row.get("publish"),
            publish_ts: row.get("publish_ts"),
            text: row.get("content"),
        }
    }
}

#[async_trait::async_trait]
impl VectorStore for SqliteVectorStore {
    async fn insert(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<usize> {
        anyhow::ensure!(
            chunks.len() == embeddings.len(),
            "{} chunks but {} embeddings",
            chunks.len(),
            embeddings.len()
        );

        let mut tx = self.pool.begin().await.context("failed to begin insert")?;
        let mut written = 0;
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO chunks
                (collection, id, link, title, publish, publish_ts, content, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&self.collection)
            .bind(&chunk.id)
            .bind(&chunk.link)
            .bind(&chunk.title)
            .bind(&chunk.publish)
            .bind(chunk.publish_ts)
            .bind(&chunk.text)
            .bind(f32_vec_to_bytes(embedding))
            .execute(&mut tx)
            .await
            .with_context(|| format!("failed to insert chunk {}", chunk.id))?;
            written += result.rows_affected() as usize;
        }
        tx.commit().await.context("failed to commit insert")?;

        debug!("inserted {}/{} chunks into {}", written, chunks.len(), self.collection);
        Ok(written)
    }

    async fn delete_older_than(&self, cutoff_ts: i64) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunks WHERE collection = ? AND publish_ts < ?")
            .bind(&self.collection)
            .bind(cutoff_ts)
            .execute(&self.pool)
            .await
            .context("failed to delete expired chunks")?;
        Ok(result.rows_affected() as usize)
    }

    async fn get(&self, published_before: Option<i64>) -> Result<Vec<Chunk>> {
        let rows = match published_before {
            Some(cutoff) => {
                sqlx::query(
                    "SELECT id, link, title, publish, publish_ts, content FROM chunks \
                     WHERE collection = ? AND publish_ts < ? ORDER BY id",
                )
                .bind(&self.collection)
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT id, link, title, publish, publish_ts, content FROM chunks \
                     WHERE collection = ? ORDER BY id",
                )
                .bind(&self.collection)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("failed to read chunks")?;

        Ok(rows.iter().map(Self::row_to_chunk).collect())
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            "SELECT id, link, title, publish, publish_ts, content, embedding FROM chunks WHERE collection = ?",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await
        .context("failed to scan chunks")?;

        let candidates = rows.iter().map(|row| {
            let bytes: Vec<u8> = row.get("embedding");
            (Self::row_to_chunk(row), bytes_to_f32_vec(&bytes))
        });
        Ok(top_k(embedding, candidates, k))
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await
            .context("failed to count chunks")?;
        Ok(n as usize)
    }

    async fn links(&self) -> Result<HashSet<String>> {
        let links: Vec<String> = sqlx::query_scalar("SELECT DISTINCT link FROM chunks WHERE collection = ?")
            .bind(&self.collection)
            .fetch_all(&self.pool)
            .await
            .context("failed to read links")?;
        Ok(links.into_iter().collect())
    }
}

/// In-process store, used by tests and dry runs.
#[derive(Default)]
pub struct MemoryVectorStore {
    rows: RwLock<Vec<(Chunk, Vec<f32>)>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl VectorStore for MemoryVectorStore {
    async fn insert(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<usize> {
        anyhow::ensure!(
            chunks.len() == embeddings.len(),
            "{} chunks but {} embeddings",
            chunks.len(),
            embeddings.len()
        );
        let mut rows = self.rows.write().await;
        let mut written = 0;
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            if rows.iter().any(|(c, _)| c.id == chunk.id) {
                continue;
            }
            rows.push((chunk.clone(), embedding.clone()));
            written += 1;
        }
        Ok(written)
    }

    async fn delete_older_than(&self, cutoff_ts: i64) -> Result<usize> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|(c, _)| c.publish_ts >= cutoff_ts);
        Ok(before - rows.len())
    }

    async fn get(&self, published_before: Option<i64>) -> Result<Vec<Chunk>> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|(c, _)| published_before.map_or(true, |cutoff| c.publish_ts < cutoff))
            .map(|(c, _)| c.clone())
            .collect())
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let rows = self.rows.read().await;
        Ok(top_k(embedding, rows.iter().cloned(), k))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.rows.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(link: &str, idx: usize, ts: i64, text: &str) -> Chunk {
        Chunk {
            id: format!("{}#{}", link, idx),
            link: link.to_string(),
            title: "국제유가 상승".to_string(),
            publish: "2026-10-16T09:00:00+09:00".to_string(),
            publish_ts: ts,
            text: text.to_string(),
        }
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn embedding_bytes_round_trip() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(bytes_to_f32_vec(&f32_vec_to_bytes(&v)), v);
    }

    async fn exercise_store(store: &dyn VectorStore) {
        let chunks = vec![
            chunk("https://a.example/1", 0, 100, "브렌트유 배럴당 90달러"),
            chunk("https://a.example/1", 1, 100, "WTI 상승"),
            chunk("https://b.example/2", 0, 200, "휘발유 가격 하락"),
        ];
        let embeddings = vec![vec![1.0, 0.0], vec![0.7, 0.7], vec![0.0, 1.0]];

        assert_eq!(store.insert(&chunks, &embeddings).await.unwrap(), 3);
        // Same ids again: nothing new.
        assert_eq!(store.insert(&chunks, &embeddings).await.unwrap(), 0);
        assert_eq!(store.count().await.unwrap(), 3);

        let hits = store.query(&[0.0, 1.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.link, "https://b.example/2");
        assert_eq!(hits[1].chunk.id, "https://a.example/1#1");

        let old = store.get(Some(150)).await.unwrap();
        assert_eq!(old.len(), 2);
        assert!(old.iter().all(|c| c.publish_ts < 150));

        let links = store.links().await.unwrap();
        assert_eq!(links.len(), 2);

        assert_eq!(store.delete_older_than(200).await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get(None).await.unwrap()[0].link, "https://b.example/2");
        assert_eq!(store.delete_older_than(200).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn memory_store_contract() {
        exercise_store(&MemoryVectorStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_store_contract() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(!SqliteVectorStore::exists(dir.path()));
        let store = SqliteVectorStore::open(dir.path(), "oil_news").await.expect("open");
        assert!(SqliteVectorStore::exists(dir.path()));
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn sqlite_collections_are_namespaced_and_persist() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = SqliteVectorStore::open(dir.path(), "oil_news").await.unwrap();
            store
                .insert(&[chunk("https://a.example/1", 0, 1, "x")], &[vec![1.0]])
                .await
                .unwrap();
        }

        let reopened = SqliteVectorStore::open(dir.path(), "oil_news").await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);

        let other = SqliteVectorStore::open(dir.path(), "other").await.unwrap();
        assert_eq!(other.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mismatched_lengths_are_rejected() {
        let store = MemoryVectorStore::new();
        let err = store
            .insert(&[chunk("https://a.example/1", 0, 1, "x")], &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1 chunks but 0 embeddings"));
    }
}
