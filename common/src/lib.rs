/*!
common/src/lib.rs

Shared configuration types and DB helper functions for Fuelscope.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader for a TOML config file, with default/override merging
- A helper to open the SQLite database backing the vector collection
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Named RSS source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
}

/// News collection section (`[news]`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewsConfig {
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
    /// Feed used when none is named on the command line
    pub default_feed: Option<String>,
    /// Title keywords; an article is kept only if its title contains one of them
    pub keywords: Option<Vec<String>>,
    pub max_items_per_feed: Option<usize>,
    pub lookback_days: Option<i64>,
    pub min_chars: Option<usize>,
    pub fetch_timeout_seconds: Option<u64>,
    /// Number of chunks handed to the summarizer
    pub top_k: Option<usize>,
}

impl NewsConfig {
    pub fn max_items_per_feed(&self) -> usize {
        self.max_items_per_feed.unwrap_or(20)
    }

    pub fn lookback_days(&self) -> i64 {
        self.lookback_days.unwrap_or(7)
    }

    pub fn min_chars(&self) -> usize {
        self.min_chars.unwrap_or(0)
    }

    pub fn fetch_timeout_seconds(&self) -> u64 {
        self.fetch_timeout_seconds.unwrap_or(10)
    }

    pub fn top_k(&self) -> usize {
        self.top_k.unwrap_or(8)
    }

    /// Look up a feed by name, falling back to `default_feed` and then to the first entry.
    pub fn feed(&self, name: Option<&str>) -> Option<&FeedConfig> {
        match name.or(self.default_feed.as_deref()) {
            Some(wanted) => self.feeds.iter().find(|f| f.name == wanted),
            None => self.feeds.first(),
        }
    }
}

/// Vector collection section (`[vector_store]`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    /// Directory holding the SQLite file (e.g. "./vector_db")
    pub persist_dir: Option<String>,
    pub collection: Option<String>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    /// Falls back to `news.lookback_days` when unset
    pub retention_days: Option<i64>,
}

impl VectorStoreConfig {
    pub fn persist_dir(&self) -> PathBuf {
        PathBuf::from(self.persist_dir.as_deref().unwrap_or("./vector_db"))
    }

    pub fn collection(&self) -> &str {
        self.collection.as_deref().unwrap_or("oil_news")
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.unwrap_or(1000)
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap.unwrap_or(150)
    }
}

/// OpenAI-compatible model endpoint (`[llm]`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Chat completions URL
    pub api_url: Option<String>,
    /// Embeddings URL; inferred from `api_url` when unset
    pub embedding_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub embedding_model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

impl LlmConfig {
    pub fn api_url(&self) -> &str {
        self.api_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1/chat/completions")
    }

    pub fn api_key_env(&self) -> &str {
        self.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY")
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or("gpt-4o-mini")
    }

    pub fn embedding_model(&self) -> &str {
        self.embedding_model
            .as_deref()
            .unwrap_or("text-embedding-ada-002")
    }
}

/// Opinet pricing API (`[opinet]`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpinetConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub timeout_seconds: Option<u64>,
}

impl OpinetConfig {
    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or("http://www.opinet.co.kr/api")
    }

    pub fn api_key_env(&self) -> &str {
        self.api_key_env.as_deref().unwrap_or("OPINET_API_KEY")
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds.unwrap_or(10)
    }
}

/// Kakao local API (`[kakao]`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KakaoConfig {
    pub api_url: Option<String>,
    pub rest_key_env: Option<String>,
    pub timeout_seconds: Option<u64>,
}

impl KakaoConfig {
    pub fn api_url(&self) -> &str {
        self.api_url
            .as_deref()
            .unwrap_or("https://dapi.kakao.com/v2/local")
    }

    pub fn rest_key_env(&self) -> &str {
        self.rest_key_env.as_deref().unwrap_or("KAKAO_REST_KEY")
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds.unwrap_or(10)
    }
}

/// Response cache (`[cache]`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_seconds: Option<u64>,
}

impl CacheConfig {
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds.unwrap_or(600)
    }
}

/// Station recommendation defaults (`[recommend]`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendConfig {
    pub weight_price: Option<f64>,
    pub weight_distance: Option<f64>,
    pub top_k: Option<usize>,
    pub radius_m: Option<u32>,
    /// Upper bound on model turns in the tool-calling loop
    pub max_steps: Option<usize>,
}

impl RecommendConfig {
    pub fn weight_price(&self) -> f64 {
        self.weight_price.unwrap_or(0.5)
    }

    pub fn weight_distance(&self) -> f64 {
        self.weight_distance.unwrap_or(0.5)
    }

    pub fn top_k(&self) -> usize {
        self.top_k.unwrap_or(10)
    }

    pub fn radius_m(&self) -> u32 {
        self.radius_m.unwrap_or(3000)
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps.unwrap_or(5)
    }
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub news: NewsConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub opinet: OpinetConfig,
    #[serde(default)]
    pub kakao: KakaoConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub recommend: RecommendConfig,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    /// Retention window for the vector collection, in days.
    pub fn retention_days(&self) -> i64 {
        self.vector_store
            .retention_days
            .unwrap_or_else(|| self.news.lookback_days())
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Initialize an SQLite connection pool.
///
/// Creates the parent directory if necessary and makes sure the DB file exists before
/// connecting, so that filesystem problems surface with a clear message. The pool is
/// small: the vector collection has a single writer.
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create DB parent directory: {}", parent.display())
        })?;
    }

    tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to create or open DB file: {}", path))?;

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn config_from_string_and_db_pool() {
        let toml = r#"
            [news]
            default_feed = "hankyung"
            lookback_days = 5

            [[news.feeds]]
            name = "hankyung"
            url = "https://www.hankyung.com/feed/economy"

            [vector_store]
            persist_dir = "data/vs"
        "#;

        let cfg: Config = toml::from_str(toml).expect("parse config");
        assert_eq!(cfg.news.lookback_days(), 5);
        assert_eq!(cfg.retention_days(), 5);
        assert_eq!(cfg.news.feed(None).map(|f| f.name.as_str()), Some("hankyung"));
        assert_eq!(cfg.vector_store.chunk_size(), 1000);
        assert_eq!(cfg.vector_store.chunk_overlap(), 150);
        assert_eq!(cfg.llm.api_key_env(), "OPENAI_API_KEY");

        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("nested").join("fuel.db");
        let pool = init_db_pool(&db_path.to_string_lossy()).await.expect("init pool");
        let conn = pool.acquire().await.expect("acquire conn");
        drop(conn);
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn override_file_wins_over_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let default_path = dir.path().join("config.default.toml");
        let override_path = dir.path().join("config.toml");

        std::fs::write(
            &default_path,
            "[news]\nlookback_days = 7\nmax_items_per_feed = 20\n\n[llm]\nmodel = \"gpt-4o-mini\"\n",
        )
        .expect("write default");
        std::fs::write(&override_path, "[news]\nlookback_days = 3\n").expect("write override");

        let cfg = Config::load_with_defaults(Some(&default_path), Some(&override_path))
            .await
            .expect("load");

        assert_eq!(cfg.news.lookback_days(), 3);
        assert_eq!(cfg.news.max_items_per_feed(), 20);
        assert_eq!(cfg.llm.model(), "gpt-4o-mini");
    }

    #[tokio::test]
    async fn missing_files_yield_defaults() {
        let cfg = Config::load_with_defaults(Some(Path::new("/nonexistent/a.toml")), None)
            .await
            .expect("load");
        assert_eq!(cfg.retention_days(), 7);
        assert_eq!(cfg.recommend.top_k(), 10);
        assert!(cfg.news.feed(Some("anything")).is_none());
    }

    #[test]
    fn retention_overrides_lookback() {
        let cfg: Config = toml::from_str("[news]\nlookback_days = 5\n[vector_store]\nretention_days = 30\n")
            .expect("parse");
        assert_eq!(cfg.retention_days(), 30);
    }
}
