use anyhow::{Context, Result};
use tracing::info;

use crate::chunking::TextSplitter;
use crate::gnews::LinkResolver;
use crate::indexer::Indexer;
use crate::ingestion::{self, FetchOptions};
use crate::llm::summarizer::{default_question, summarize_news};
use crate::llm::LlmProvider;
use crate::scraping::ContentExtractor;
use crate::storage::VectorStore;

#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub feed_url: String,
    pub fetched: usize,
    pub new_chunks: usize,
    pub deleted: usize,
    pub initial_build: bool,
    pub count_before: usize,
    pub count_after: usize,
    pub answer: String,
}

/// Collaborators for one pipeline run.
pub struct PipelineDeps<'a> {
    pub provider: &'a dyn LlmProvider,
    pub store: &'a dyn VectorStore,
    pub resolver: &'a dyn LinkResolver,
    pub extractor: &'a dyn ContentExtractor,
}

/// Fetch one feed, bring the collection up to date and summarise it.
pub async fn run_news_pipeline(
    config: &common::Config,
    feed_url: &str,
    deps: PipelineDeps<'_>,
) -> Result<PipelineReport> {
    let opts = FetchOptions::from_config(&config.news);

    info!("pipeline: 1) fetching articles from {}", feed_url);
    let articles = ingestion::fetch_articles(feed_url, &opts, deps.resolver, deps.extractor)
        .await
        .with_context(|| format!("failed to fetch feed {}", feed_url))?;
    info!("pipeline:  - fetched {} articles", articles.len());

    let count_before = deps.store.count().await?;
    let splitter = TextSplitter::new(
        config.vector_store.chunk_size(),
        config.vector_store.chunk_overlap(),
    );
    let indexer = Indexer::new(deps.store, deps.provider, splitter, config.retention_days());

    info!("pipeline: 2) updating vector collection");
    let outcome = indexer.sync(&articles).await?;
    let count_after = deps.store.count().await?;
    info!(
        "pipeline:  - new chunks {}, deleted {}, collection {} -> {}",
        outcome.new_chunks, outcome.deleted, count_before, count_after
    );

    info!("pipeline: 3) summarising");
    let answer = summarize_news(
        Some(deps.store),
        deps.provider,
        &default_question(opts.lookback_days),
        config.news.top_k(),
    )
    .await?;

    Ok(PipelineReport {
        feed_url: feed_url.to_string(),
        fetched: articles.len(),
        new_chunks: outcome.new_chunks,
        deleted: outcome.deleted,
        initial_build: outcome.initial_build,
        count_before,
        count_after,
        answer,
    })
}
