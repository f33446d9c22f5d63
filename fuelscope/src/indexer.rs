use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::chunking::TextSplitter;
use crate::ingestion::Article;
use crate::llm::LlmProvider;
use crate::storage::{Chunk, VectorStore};

const EMBED_BATCH: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexOutcome {
    pub new_chunks: usize,
    pub deleted: usize,
    /// The collection was empty before this run, so no retention pass was needed.
    pub initial_build: bool,
}

/// Keeps a vector collection in step with freshly fetched articles.
pub struct Indexer<'a> {
    store: &'a dyn VectorStore,
    provider: &'a dyn LlmProvider,
    splitter: TextSplitter,
    retention_days: i64,
}

impl<'a> Indexer<'a> {
    pub fn new(
        store: &'a dyn VectorStore,
        provider: &'a dyn LlmProvider,
        splitter: TextSplitter,
        retention_days: i64,
    ) -> Self {
        Self {
            store,
            provider,
            splitter,
            retention_days,
        }
    }

    pub async fn sync(&self, articles: &[Article]) -> Result<IndexOutcome> {
        self.sync_at(articles, Utc::now()).await
    }

    /// Build the collection from scratch when it is empty; otherwise purge entries
    /// published before `now - retention_days` and add only articles whose link is
    /// not stored yet. Articles already past the cutoff are never inserted.
    pub async fn sync_at(&self, articles: &[Article], now: DateTime<Utc>) -> Result<IndexOutcome> {
        let initial_build = self.store.count().await? == 0;
        let cutoff = (now - Duration::days(self.retention_days)).timestamp();

        let (deleted, mut known) = if initial_build {
            (0, HashSet::new())
        } else {
            let deleted = self
                .store
                .delete_older_than(cutoff)
                .await
                .context("failed to purge expired chunks")?;
            (deleted, self.store.links().await?)
        };

        let fresh: Vec<Article> = articles
            .iter()
            .filter(|a| a.publish_ts >= cutoff)
            .filter(|a| known.insert(a.link.clone()))
            .cloned()
            .collect();
        debug!(
            "indexer: {} of {} articles are new",
            fresh.len(),
            articles.len()
        );

        let chunks = self.splitter.split_articles(&fresh);
        let new_chunks = self.embed_and_insert(&chunks).await?;

        info!(
            initial_build,
            new_chunks, deleted, "indexer: collection synced"
        );
        Ok(IndexOutcome {
            new_chunks,
            deleted,
            initial_build,
        })
    }

    async fn embed_and_insert(&self, chunks: &[Chunk]) -> Result<usize> {
        let mut written = 0;
        for batch in chunks.chunks(EMBED_BATCH) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = self
                .provider
                .embed(&texts)
                .await
                .context("failed to embed chunks")?;
            written += self.store.insert(batch, &embeddings).await?;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryVectorStore;
    use crate::test_utils::StubProvider;

    fn article(link: &str, publish_ts: i64, content: &str) -> Article {
        Article {
            link: link.to_string(),
            title: "국제유가 상승".to_string(),
            content: content.to_string(),
            publish: "2026-10-16T09:00:00+09:00".to_string(),
            publish_ts,
        }
    }

    #[tokio::test]
    async fn resubmitting_the_same_article_adds_nothing() {
        let store = MemoryVectorStore::new();
        let provider = StubProvider::new("unused");
        let indexer = Indexer::new(&store, &provider, TextSplitter::new(1000, 150), 3650);
        let now = Utc::now();
        let batch = vec![article("https://news.example/1", now.timestamp(), "브렌트유가 올랐다")];

        let first = indexer.sync_at(&batch, now).await.unwrap();
        assert!(first.initial_build);
        assert_eq!(first.new_chunks, 1);

        let second = indexer.sync_at(&batch, now).await.unwrap();
        assert_eq!(
            second,
            IndexOutcome {
                new_chunks: 0,
                deleted: 0,
                initial_build: false
            }
        );
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn refresh_purges_expired_entries_before_adding() {
        let store = MemoryVectorStore::new();
        let provider = StubProvider::new("unused");
        let indexer = Indexer::new(&store, &provider, TextSplitter::new(1000, 150), 7);
        let now = Utc::now();
        let old_ts = (now - Duration::days(10)).timestamp();

        indexer
            .sync_at(&[article("https://news.example/old", old_ts, "오래된 기사")], now)
            .await
            .unwrap();

        let outcome = indexer
            .sync_at(
                &[
                    article("https://news.example/new", now.timestamp(), "새 기사"),
                    article("https://news.example/new", now.timestamp(), "새 기사"),
                ],
                now,
            )
            .await
            .unwrap();

        assert_eq!(outcome.deleted, 1);
        assert_eq!(outcome.new_chunks, 1);
        let cutoff = (now - Duration::days(7)).timestamp();
        let remaining = store.get(None).await.unwrap();
        assert!(remaining.iter().all(|c| c.publish_ts >= cutoff));
        assert_eq!(remaining[0].link, "https://news.example/new");
    }

    #[tokio::test]
    async fn articles_older_than_retention_are_not_inserted() {
        let store = MemoryVectorStore::new();
        let provider = StubProvider::new("unused");
        let indexer = Indexer::new(&store, &provider, TextSplitter::new(1000, 150), 3);
        let now = Utc::now();
        let five_days_ago = (now - Duration::days(5)).timestamp();

        let first = indexer
            .sync_at(
                &[
                    article("https://news.example/a", now.timestamp(), "오늘 기사"),
                    article("https://news.example/b", five_days_ago, "닷새 전 기사"),
                ],
                now,
            )
            .await
            .unwrap();
        assert!(first.initial_build);
        assert_eq!(first.new_chunks, 1);

        let refresh = indexer
            .sync_at(&[article("https://news.example/c", five_days_ago, "닷새 전 기사")], now)
            .await
            .unwrap();
        assert_eq!(refresh.new_chunks, 0);

        let cutoff = (now - Duration::days(3)).timestamp();
        let stored = store.get(None).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored.iter().all(|c| c.publish_ts >= cutoff));
    }

    #[tokio::test]
    async fn long_articles_are_embedded_in_batches() {
        let store = MemoryVectorStore::new();
        let provider = StubProvider::new("unused");
        let indexer = Indexer::new(&store, &provider, TextSplitter::new(10, 0), 7);
        let body = "가".repeat(10 * (EMBED_BATCH + 6));

        let outcome = indexer
            .sync(&[article("https://news.example/long", Utc::now().timestamp(), &body)])
            .await
            .unwrap();

        assert_eq!(outcome.new_chunks, EMBED_BATCH + 6);
        assert_eq!(provider.embed_calls(), 2);
    }
}
