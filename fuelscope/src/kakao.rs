use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::TtlCache;
use crate::error::{require_env, Error};
use crate::schema::{self, number};

/// Coordinate systems understood by `transcoord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordSystem {
    Wgs84,
    /// KATEC, the TM projection Opinet uses
    Ktm,
}

impl CoordSystem {
    pub fn as_str(self) -> &'static str {
        match self {
            CoordSystem::Wgs84 => "WGS84",
            CoordSystem::Ktm => "KTM",
        }
    }
}

#[derive(Debug, Deserialize)]
struct Document {
    #[serde(deserialize_with = "number")]
    x: f64,
    #[serde(deserialize_with = "number")]
    y: f64,
}

#[derive(Debug, Deserialize)]
struct Documents {
    documents: Vec<Document>,
}

/// Kakao Local API client (`https://dapi.kakao.com/v2/local`).
pub struct KakaoClient {
    base_url: String,
    rest_key: String,
    client: Client,
    cache: Option<Arc<TtlCache>>,
}

impl KakaoClient {
    pub fn new(base_url: impl Into<String>, rest_key: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rest_key: rest_key.into(),
            client,
            cache: None,
        })
    }

    pub fn from_config(config: &common::KakaoConfig) -> Result<Self> {
        let rest_key = require_env(config.rest_key_env())?;
        Self::new(config.api_url(), rest_key, config.timeout_seconds())
    }

    pub fn with_cache(mut self, cache: Arc<TtlCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// First matching document as `(x, y)`, or `None` when nothing matched.
    async fn first_document(&self, path: &'static str, params: &[(&str, String)]) -> Result<Option<(f64, f64)>> {
        let key = TtlCache::key(
            path,
            &params.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>(),
        );
        let value = match self.cache.as_ref().and_then(|c| c.get(&key)) {
            Some(hit) => hit,
            None => {
                let value = self.get(path, params).await?;
                if let Some(cache) = &self.cache {
                    cache.insert(key, value.clone());
                }
                value
            }
        };

        let parsed: Documents = schema::decode("kakao", value)?;
        Ok(parsed.documents.first().map(|d| (d.x, d.y)))
    }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        debug!("kakao: GET {}", path);
        let response = self
            .client
            .get(format!("{}/{}", self.base_url, path))
            .header("Authorization", format!("KakaoAK {}", self.rest_key))
            .query(params)
            .send()
            .await
            .with_context(|| format!("kakao request to {} failed", path))?;

        let status = response.status();
        let body = response.text().await.context("failed to read kakao response")?;
        if !status.is_success() {
            return Err(Error::Api {
                api: "kakao",
                status: status.as_u16(),
                body,
            }
            .into());
        }
        serde_json::from_str(&body).map_err(|e| {
            Error::UnexpectedSchema {
                api: "kakao",
                detail: format!("{} returned non-JSON body: {}", path, e),
            }
            .into()
        })
    }

    /// WGS84 `(lon, lat)` of a street address, `None` for an unknown address.
    pub async fn address_to_coords(&self, address: &str) -> Result<Option<(f64, f64)>> {
        self.first_document("search/address.json", &[("query", address.to_string())])
            .await
    }

    /// Convert a point between coordinate systems.
    pub async fn transcoord(
        &self,
        x: f64,
        y: f64,
        from: CoordSystem,
        to: CoordSystem,
    ) -> Result<Option<(f64, f64)>> {
        if from == to {
            return Ok(Some((x, y)));
        }
        self.first_document(
            "geo/transcoord.json",
            &[
                ("x", x.to_string()),
                ("y", y.to_string()),
                ("input_coord", from.as_str().to_string()),
                ("output_coord", to.as_str().to_string()),
            ],
        )
        .await
    }
}
