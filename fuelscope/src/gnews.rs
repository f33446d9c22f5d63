//! Google News wraps every RSS link in `news.google.com/rss/articles/<id>`.
//! The id is a base64 protobuf blob: older ids embed the target URL directly,
//! newer ones (prefixed `AU_yqL`) must be exchanged through the `batchexecute`
//! endpoint using a signature and timestamp scraped from the article page.

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::Client;
use scraper::{Html, Selector};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Maps a wrapped/redirecting link to the canonical article URL.
#[async_trait::async_trait]
pub trait LinkResolver: Send + Sync {
    async fn resolve(&self, link: &str) -> Result<String>;
}

/// Resolver for feeds whose links are already canonical.
pub struct PassthroughResolver;

#[async_trait::async_trait]
impl LinkResolver for PassthroughResolver {
    async fn resolve(&self, link: &str) -> Result<String> {
        Ok(link.to_string())
    }
}

pub struct GoogleNewsDecoder {
    base_url: String,
    client: Client,
}

impl GoogleNewsDecoder {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        Self::with_base_url("https://news.google.com", timeout_secs)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("Mozilla/5.0 (compatible; Fuelscope/0.1.0)")
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn decoding_params(&self, article_id: &str) -> Result<(String, String)> {
        let url = format!("{}/rss/articles/{}", self.base_url, article_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("failed to fetch Google News article page")?;
        if !response.status().is_success() {
            anyhow::bail!("Google News article page returned {}", response.status());
        }
        let html = response.text().await.context("failed to read Google News article page")?;
        parse_decoding_params(&html)
    }

    async fn decode_online(&self, article_id: &str) -> Result<String> {
        let (signature, timestamp) = self.decoding_params(article_id).await?;
        let payload = batchexecute_payload(article_id, &timestamp, &signature);

        let response = self
            .client
            .post(format!("{}/_/DotsSplashUi/data/batchexecute", self.base_url))
            .header("Content-Type", "application/x-www-form-urlencoded;charset=UTF-8")
            .form(&[("f.req", payload)])
            .send()
            .await
            .context("batchexecute request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("batchexecute returned {}", response.status());
        }
        let body = response.text().await.context("failed to read batchexecute response")?;
        parse_batchexecute_response(&body)
    }
}

#[async_trait::async_trait]
impl LinkResolver for GoogleNewsDecoder {
    async fn resolve(&self, link: &str) -> Result<String> {
        let id = article_id(link).with_context(|| format!("not a Google News article link: {}", link))?;
        if let Some(url) = decode_offline(&id) {
            debug!("gnews: decoded {} offline", id);
            return Ok(url);
        }
        self.decode_online(&id).await
    }
}

/// The base64 id following `/articles/` or `/read/` in a Google News URL.
pub fn article_id(link: &str) -> Option<String> {
    let url = url::Url::parse(link).ok()?;
    if url.host_str()? != "news.google.com" {
        return None;
    }
    let segments: Vec<&str> = url.path_segments()?.collect();
    segments
        .windows(2)
        .find(|w| w[0] == "articles" || w[0] == "read")
        .map(|w| w[1].to_string())
        .filter(|id| !id.is_empty())
}

/// Decode ids that carry the URL inline. Returns `None` for the newer format.
pub fn decode_offline(article_id: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(article_id.trim_end_matches('=')).ok()?;
    let mut body: &[u8] = &bytes;
    if let Some(rest) = body.strip_prefix(&[0x08, 0x13, 0x22]) {
        body = rest;
    }
    if let Some(rest) = body.strip_suffix(&[0xd2, 0x01, 0x00]) {
        body = rest;
    }

    let (&first, rest) = body.split_first()?;
    let (len, rest) = if first >= 0x80 {
        let (&second, rest) = rest.split_first()?;
        (((first & 0x7f) as usize) | ((second as usize) << 7), rest)
    } else {
        (first as usize, rest)
    };
    let url_bytes = rest.get(..len.min(rest.len()))?;
    let url = std::str::from_utf8(url_bytes).ok()?;

    if url.starts_with("AU_yqL") || !url.starts_with("http") {
        return None;
    }
    Some(url.to_string())
}

fn parse_decoding_params(html: &str) -> Result<(String, String)> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("c-wiz > div[jscontroller]")
        .map_err(|e| anyhow::anyhow!("invalid selector: {:?}", e))?;
    let div = document
        .select(&selector)
        .next()
        .context("decoding parameters not found on article page")?;
    let signature = div
        .value()
        .attr("data-n-a-sg")
        .context("missing data-n-a-sg")?;
    let timestamp = div
        .value()
        .attr("data-n-a-ts")
        .context("missing data-n-a-ts")?;
    Ok((signature.to_string(), timestamp.to_string()))
}

fn batchexecute_payload(article_id: &str, timestamp: &str, signature: &str) -> String {
    let inner = format!(
        r#"["garturlreq",[["X","X",["X","X"],null,null,1,1,"US:en",null,1,null,null,null,null,null,0,1],"X","X",1,[1,1,1],1,1,null,0,0,null,0],"{}",{},"{}"]"#,
        article_id, timestamp, signature
    );
    serde_json::json!([[["Fbv4je", inner, null, "generic"]]]).to_string()
}

/// Pull the decoded URL out of the `)]}'`-prefixed batchexecute envelope.
fn parse_batchexecute_response(body: &str) -> Result<String> {
    let block = body
        .split("\n\n")
        .nth(1)
        .context("batchexecute response has no payload block")?;
    let outer: Value = serde_json::from_str(block).context("batchexecute payload is not JSON")?;
    let inner = outer
        .get(0)
        .and_then(|row| row.get(2))
        .and_then(Value::as_str)
        .context("batchexecute payload missing result string")?;
    let decoded: Value = serde_json::from_str(inner).context("batchexecute result is not JSON")?;
    decoded
        .get(1)
        .and_then(Value::as_str)
        .map(str::to_string)
        .context("batchexecute result missing decoded URL")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_id(url: &str) -> String {
        let mut bytes = vec![0x08, 0x13, 0x22, url.len() as u8];
        bytes.extend_from_slice(url.as_bytes());
        bytes.extend_from_slice(&[0xd2, 0x01, 0x00]);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    #[test]
    fn article_id_is_taken_from_rss_and_read_paths() {
        assert_eq!(
            article_id("https://news.google.com/rss/articles/CBMiabc?oc=5").as_deref(),
            Some("CBMiabc")
        );
        assert_eq!(article_id("https://news.google.com/read/CBMixyz").as_deref(), Some("CBMixyz"));
        assert!(article_id("https://www.hankyung.com/article/1").is_none());
        assert!(article_id("https://news.google.com/topics/abc").is_none());
    }

    #[test]
    fn legacy_ids_decode_offline() {
        let id = legacy_id("https://www.mk.co.kr/news/economy/11111");
        assert_eq!(decode_offline(&id).as_deref(), Some("https://www.mk.co.kr/news/economy/11111"));
    }

    #[test]
    fn long_urls_use_two_byte_lengths() {
        let url = format!("https://www.example.com/{}", "a".repeat(200));
        let mut bytes = vec![0x08, 0x13, 0x22, ((url.len() & 0x7f) as u8) | 0x80, (url.len() >> 7) as u8];
        bytes.extend_from_slice(url.as_bytes());
        assert_eq!(decode_offline(&URL_SAFE_NO_PAD.encode(bytes)), Some(url));
    }

    #[test]
    fn new_format_ids_need_online_decoding() {
        let id = legacy_id("AU_yqLPp5example");
        assert!(decode_offline(&id).is_none());
        assert!(decode_offline("!!!not-base64!!!").is_none());
    }

    #[test]
    fn decoding_params_are_read_from_cwiz() {
        let html = r#"<html><body><c-wiz><div jscontroller="x" data-n-a-sg="SIG" data-n-a-ts="1700000000"></div></c-wiz></body></html>"#;
        let (sig, ts) = parse_decoding_params(html).unwrap();
        assert_eq!(sig, "SIG");
        assert_eq!(ts, "1700000000");
        assert!(parse_decoding_params("<html></html>").is_err());
    }

    #[test]
    fn batchexecute_payload_embeds_id_and_signature() {
        let payload = batchexecute_payload("CBMi", "17", "SIG");
        let parsed: Value = serde_json::from_str(&payload).unwrap();
        let inner = parsed[0][0][1].as_str().unwrap();
        assert!(inner.ends_with(r#""CBMi",17,"SIG"]"#));
        assert_eq!(parsed[0][0][0], "Fbv4je");
    }

    #[test]
    fn batchexecute_response_yields_url() {
        let inner = serde_json::json!(["garturlres", "https://www.hankyung.com/article/2026101612345", 1]).to_string();
        let outer = serde_json::json!([["wrb.fr", "Fbv4je", inner, null, null, null, "generic"], ["di", 42]]);
        let body = format!(")]}}'\n\n{}\n\n25\n[[\"e\",4]]", outer);
        assert_eq!(
            parse_batchexecute_response(&body).unwrap(),
            "https://www.hankyung.com/article/2026101612345"
        );
        assert!(parse_batchexecute_response(")]}'").is_err());
    }

    #[tokio::test]
    async fn resolver_decodes_legacy_links_without_network() {
        let decoder = GoogleNewsDecoder::with_base_url("http://127.0.0.1:9", 1).unwrap();
        let link = format!("https://news.google.com/rss/articles/{}?oc=5", legacy_id("https://www.chosun.com/economy/1"));
        assert_eq!(decoder.resolve(&link).await.unwrap(), "https://www.chosun.com/economy/1");
        assert!(decoder.resolve("https://example.com/x").await.is_err());
    }
}
