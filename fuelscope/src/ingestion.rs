use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Offset, Utc};
use feed_rs::model::{Entry, Feed};
use feed_rs::parser;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::gnews::{GoogleNewsDecoder, LinkResolver, PassthroughResolver};
use crate::scraping::ContentExtractor;

/// Title keywords for fuel-price news.
pub const DEFAULT_KEYWORDS: [&str; 24] = [
    "유가", "국제유가", "국제 유가", "원유", "원유 가격",
    "브렌트", "브렌트유", "WTI", "두바이유", "휘발유",
    "경유", "LPG", "정제마진", "유류세", "OPEC",
    "OPEC+", "감산", "증산", "배럴당", "석유",
    "원유 선물", "산유국", "석유수출국", "기름",
];

/// A news article whose body has been extracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub link: String,
    pub title: String,
    pub content: String,
    /// RFC 3339 in Korea Standard Time
    pub publish: String,
    pub publish_ts: i64,
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub max_items: usize,
    pub lookback_days: i64,
    pub min_chars: usize,
    pub keywords: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_items: 20,
            lookback_days: 7,
            min_chars: 0,
            keywords: DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            timeout_secs: 10,
        }
    }
}

impl FetchOptions {
    pub fn from_config(config: &common::NewsConfig) -> Self {
        let defaults = Self::default();
        Self {
            max_items: config.max_items_per_feed(),
            lookback_days: config.lookback_days(),
            min_chars: config.min_chars(),
            keywords: config.keywords.clone().unwrap_or(defaults.keywords),
            timeout_secs: config.fetch_timeout_seconds(),
        }
    }
}

pub fn kst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap_or_else(|| Utc.fix())
}

/// Case-insensitive substring match against any keyword.
pub fn keyword_hit(text: &str, keywords: &[String]) -> bool {
    let haystack = text.to_lowercase();
    keywords
        .iter()
        .any(|k| !k.is_empty() && haystack.contains(&k.to_lowercase()))
}

/// Google News RSS search over the keywords joined with `OR`.
pub fn google_news_search_url(keywords: &[String]) -> String {
    let query = keywords
        .iter()
        .map(|k| k.replace(' ', "%20"))
        .collect::<Vec<_>>()
        .join("+OR+");
    format!("https://news.google.com/rss/search?q={}&hl=ko&gl=KR&ceid=KR:ko", query)
}

/// Built-in feed table as `(name, url)`.
pub fn default_feeds(keywords: &[String]) -> Vec<(String, String)> {
    let mut feeds = vec![("구글뉴스".to_string(), google_news_search_url(keywords))];
    feeds.extend(
        [
            ("한국경제_경제", "https://www.hankyung.com/feed/economy"),
            ("매일경제_경제", "https://www.mk.co.kr/rss/30100041/"),
            ("아시아경제_경제", "https://www.asiae.co.kr/rss/economy.htm"),
            ("이투데이_글로벌경제", "https://rss.etoday.co.kr/eto/global_news.xml"),
            ("이투데이_정치경제", "https://rss.etoday.co.kr/eto/political_economic_news.xml"),
            (
                "조선닷컴_경제",
                "https://www.chosun.com/arc/outboundfeeds/rss/category/economy/?outputType=xml",
            ),
            ("동아일보_경제", "http://rss.donga.com/economy.xml"),
            ("경향신문_경제", "http://www.khan.co.kr/rss/rssdata/economy.xml"),
            ("조선비즈_정책금융", "http://biz.chosun.com/site/data/rss/policybank.xml"),
        ]
        .iter()
        .map(|(name, url)| (name.to_string(), url.to_string())),
    );
    feeds
}

pub fn is_google_news(feed_url: &str) -> bool {
    url::Url::parse(feed_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.contains("news.google.com")))
        .unwrap_or(false)
}

/// Link resolver appropriate for a feed: Google News links are unwrapped, others kept.
pub fn resolver_for(feed_url: &str, timeout_secs: u64) -> Result<Box<dyn LinkResolver>> {
    if is_google_news(feed_url) {
        Ok(Box::new(GoogleNewsDecoder::new(timeout_secs)?))
    } else {
        Ok(Box::new(PassthroughResolver))
    }
}

/// Fetches a feed from the given URL and parses it. A failure is final for this feed.
pub async fn fetch_and_parse_feed(url: &str, timeout_secs: u64) -> Result<Feed> {
    let client = Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent("Fuelscope/0.1.0")
        .build()
        .context("failed to build reqwest client")?;

    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("network error fetching feed {}", url))?;

    let status = response.status();
    if !status.is_success() {
        return Err(anyhow::anyhow!("feed fetch failed with status: {}", status));
    }

    let bytes = response.bytes().await.context("failed to read response body")?;
    parser::parse(bytes.as_ref()).context("failed to parse feed")
}

/// Fetch one feed and return the articles that pass every filter.
pub async fn fetch_articles(
    feed_url: &str,
    opts: &FetchOptions,
    resolver: &dyn LinkResolver,
    extractor: &dyn ContentExtractor,
) -> Result<Vec<Article>> {
    let feed = fetch_and_parse_feed(feed_url, opts.timeout_secs).await?;
    let articles = collect_articles(&feed, Utc::now(), opts, resolver, extractor).await;
    info!(
        "ingestion: {} of {} entries kept from {}",
        articles.len(),
        feed.entries.len().min(opts.max_items),
        feed_url
    );
    Ok(articles)
}

/// Walk the first `max_items` entries of a parsed feed.
///
/// Entries are dropped when their (resolved) link was already emitted, when they are
/// older than `now - lookback_days`, when the title matches no keyword, or when the
/// extracted body is empty or shorter than `min_chars`. Recency and keyword checks run
/// before any network work; resolve and extraction failures skip the entry.
pub async fn collect_articles(
    feed: &Feed,
    now: DateTime<Utc>,
    opts: &FetchOptions,
    resolver: &dyn LinkResolver,
    extractor: &dyn ContentExtractor,
) -> Vec<Article> {
    let cutoff = now - ChronoDuration::days(opts.lookback_days);
    let mut seen: HashSet<String> = HashSet::new();
    let mut articles = Vec::new();

    for entry in feed.entries.iter().take(opts.max_items) {
        let Some(published) = entry.published.or(entry.updated) else {
            debug!("ingestion: skipping entry {} without a date", entry.id);
            continue;
        };
        let title = entry_title(entry);

        if published < cutoff {
            debug!("ingestion: too old ({}): {}", published, title);
            continue;
        }
        if !keyword_hit(&title, &opts.keywords) {
            debug!("ingestion: no keyword in title: {}", title);
            continue;
        }

        let Some(raw_link) = entry.links.first().map(|l| l.href.clone()) else {
            debug!("ingestion: entry without link: {}", title);
            continue;
        };
        let link = match resolver.resolve(&raw_link).await {
            Ok(link) => link,
            Err(e) => {
                warn!("ingestion: failed to resolve {}: {:#}", raw_link, e);
                continue;
            }
        };
        if seen.contains(&link) {
            debug!("ingestion: duplicate link {}", link);
            continue;
        }

        let content = match extractor.extract(&link).await {
            Ok(content) => content,
            Err(e) => {
                warn!("ingestion: failed to extract {}: {:#}", link, e);
                continue;
            }
        };
        let content = content.trim();
        if content.is_empty() || content.chars().count() < opts.min_chars {
            debug!("ingestion: content too short for {}", link);
            continue;
        }

        let publish = published.with_timezone(&kst());
        seen.insert(link.clone());
        articles.push(Article {
            link,
            title,
            content: content.to_string(),
            publish: publish.to_rfc3339(),
            publish_ts: published.timestamp(),
        });
    }

    articles
}

fn entry_title(entry: &Entry) -> String {
    entry
        .title
        .as_ref()
        .map(|t| t.content.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticExtractor {
        bodies: HashMap<String, String>,
        calls: AtomicUsize,
    }

    impl StaticExtractor {
        fn new(bodies: &[(&str, &str)]) -> Self {
            Self {
                bodies: bodies.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl ContentExtractor for StaticExtractor {
        async fn extract(&self, url: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bodies
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unreachable: {}", url))
        }
    }

    /// Maps every link onto the same canonical URL, as a redirect wrapper might.
    struct CollapsingResolver;

    #[async_trait::async_trait]
    impl LinkResolver for CollapsingResolver {
        async fn resolve(&self, _link: &str) -> Result<String> {
            Ok("https://news.example/same".to_string())
        }
    }

    fn rss(items: &[(&str, &str, DateTime<Utc>)]) -> Feed {
        let body: String = items
            .iter()
            .map(|(title, link, date)| {
                format!(
                    "<item><title>{}</title><link>{}</link><pubDate>{}</pubDate></item>",
                    title,
                    link,
                    date.to_rfc2822()
                )
            })
            .collect();
        let xml = format!(
            "<?xml version=\"1.0\"?><rss version=\"2.0\"><channel><title>t</title>{}</channel></rss>",
            body
        );
        parser::parse(xml.as_bytes()).expect("valid rss")
    }

    fn opts(lookback_days: i64) -> FetchOptions {
        FetchOptions {
            lookback_days,
            ..FetchOptions::default()
        }
    }

    #[test]
    fn keyword_match_ignores_case() {
        let keywords: Vec<String> = DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect();
        assert!(keyword_hit("국제유가 급등", &keywords));
        assert!(keyword_hit("wti futures climb", &keywords));
        assert!(keyword_hit("Opec+ meeting", &keywords));
        assert!(!keyword_hit("코스피 마감", &keywords));
        assert!(!keyword_hit("anything", &[String::new()]));
    }

    #[test]
    fn google_news_url_joins_keywords() {
        let url = google_news_search_url(&["유가".to_string(), "국제 유가".to_string()]);
        assert_eq!(
            url,
            "https://news.google.com/rss/search?q=유가+OR+국제%20유가&hl=ko&gl=KR&ceid=KR:ko"
        );
        assert!(is_google_news(&url));
        assert!(!is_google_news("https://www.hankyung.com/feed/economy"));
        assert_eq!(default_feeds(&[]).len(), 10);
    }

    #[tokio::test]
    async fn three_fresh_matching_entries_are_all_returned() {
        let now = Utc::now();
        let feed = rss(&[
            ("유가 상승 1", "https://news.example/1", now),
            ("유가 상승 2", "https://news.example/2", now),
            ("유가 상승 3", "https://news.example/3", now),
        ]);
        let extractor = StaticExtractor::new(&[
            ("https://news.example/1", "본문 1"),
            ("https://news.example/2", "본문 2"),
            ("https://news.example/3", "본문 3"),
        ]);

        let articles = collect_articles(&feed, now, &opts(5), &PassthroughResolver, &extractor).await;

        assert_eq!(articles.len(), 3);
        let links: HashSet<_> = articles.iter().map(|a| a.link.as_str()).collect();
        assert_eq!(links.len(), 3);
        assert!(articles[0].publish.ends_with("+09:00"));
        assert_eq!(articles[0].publish_ts, now.timestamp());
    }

    #[tokio::test]
    async fn stale_entries_are_dropped_without_extraction() {
        let now = Utc::now();
        let feed = rss(&[("유가 하락", "https://news.example/old", now - ChronoDuration::days(10))]);
        let extractor = StaticExtractor::new(&[("https://news.example/old", "본문")]);

        let articles = collect_articles(&feed, now, &opts(5), &PassthroughResolver, &extractor).await;

        assert!(articles.is_empty());
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn filters_drop_off_topic_short_and_failed_entries() {
        let now = Utc::now();
        let feed = rss(&[
            ("반도체 수출", "https://news.example/chip", now),
            ("휘발유 가격", "https://news.example/short", now),
            ("경유 가격", "https://news.example/missing", now),
            ("LPG 가격", "https://news.example/ok", now),
        ]);
        let extractor = StaticExtractor::new(&[
            ("https://news.example/chip", "긴 본문입니다"),
            ("https://news.example/short", "  짧음  "),
            ("https://news.example/ok", "충분히 긴 기사 본문"),
        ]);
        let options = FetchOptions {
            min_chars: 5,
            ..opts(5)
        };

        let articles = collect_articles(&feed, now, &options, &PassthroughResolver, &extractor).await;

        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "LPG 가격");
        assert_eq!(articles[0].content, "충분히 긴 기사 본문");
    }

    #[tokio::test]
    async fn resolved_duplicates_are_emitted_once() {
        let now = Utc::now();
        let feed = rss(&[
            ("유가 1", "https://news.google.com/rss/articles/a", now),
            ("유가 2", "https://news.google.com/rss/articles/b", now),
        ]);
        let extractor = StaticExtractor::new(&[("https://news.example/same", "본문")]);

        let articles = collect_articles(&feed, now, &opts(7), &CollapsingResolver, &extractor).await;

        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].link, "https://news.example/same");
    }

    #[tokio::test]
    async fn max_items_caps_entries_in_feed_order() {
        let now = Utc::now();
        let feed = rss(&[
            ("유가 1", "https://news.example/1", now),
            ("유가 2", "https://news.example/2", now),
        ]);
        let extractor = StaticExtractor::new(&[
            ("https://news.example/1", "본문"),
            ("https://news.example/2", "본문"),
        ]);
        let options = FetchOptions {
            max_items: 1,
            ..opts(7)
        };

        let articles = collect_articles(&feed, now, &options, &PassthroughResolver, &extractor).await;

        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].link, "https://news.example/1");
    }
}
