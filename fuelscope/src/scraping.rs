use anyhow::{Context, Result};
use reqwest::Client;
use scraper::{ElementRef, Html};
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, warn};

/// Turns an article URL into its main body text.
#[async_trait::async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Extracted plain text; an empty string when nothing usable was found.
    async fn extract(&self, url: &str) -> Result<String>;
}

/// Readability-based extractor: downloads the page, keeps the main content block,
/// drops tables and reader comments and renders what is left as plain text.
pub struct ReadabilityExtractor {
    client: Client,
}

impl ReadabilityExtractor {
    pub fn new() -> Result<Self> {
        Self::build(None)
    }

    pub fn with_timeout(timeout_secs: u64) -> Result<Self> {
        Self::build(Some(Duration::from_secs(timeout_secs)))
    }

    fn build(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder().user_agent("Mozilla/5.0 (compatible; Fuelscope/0.1.0)");
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build().context("failed to build reqwest client")?,
        })
    }
}

#[async_trait::async_trait]
impl ContentExtractor for ReadabilityExtractor {
    async fn extract(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("failed to fetch article page")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("article fetch failed with status: {}", status));
        }

        let bytes = response.bytes().await.context("failed to read response body")?;
        let url_obj = url::Url::parse(url).context("failed to parse article URL")?;
        let text = extract_main_text(&bytes, &url_obj);
        debug!("scraping: extracted {} chars from {}", text.chars().count(), url);
        Ok(text)
    }
}

/// Run readability over a downloaded page and return plain text.
pub fn extract_main_text(html: &[u8], url: &url::Url) -> String {
    let mut reader = Cursor::new(html);
    match readability::extractor::extract(&mut reader, url) {
        Ok(product) => {
            let cleaned = clean_html(&product.content);
            match html2text::from_read(cleaned.as_bytes(), 10_000) {
                Ok(text) => normalize_whitespace(&text),
                Err(e) => {
                    warn!("scraping: failed to convert extracted HTML to text: {}", e);
                    normalize_whitespace(&product.text)
                }
            }
        }
        Err(e) => {
            warn!("scraping: readability failed for {}: {}", url, e);
            String::new()
        }
    }
}

/// Class or id fragments marking reader-comment sections.
const COMMENT_MARKERS: [&str; 3] = ["comment", "reply", "댓글"];

const VOID_ELEMENTS: [&str; 8] = ["br", "hr", "img", "input", "meta", "link", "source", "wbr"];

fn is_comment_section(el: &ElementRef) -> bool {
    let value = el.value();
    value.id().into_iter().chain(value.classes()).any(|name| {
        let name = name.to_lowercase();
        COMMENT_MARKERS.iter().any(|m| name.contains(m))
    })
}

fn is_excluded(el: &ElementRef) -> bool {
    el.value().name().eq_ignore_ascii_case("table") || is_comment_section(el)
}

/// Re-serialise an HTML fragment without tables, reader-comment sections and
/// `<!-- -->` nodes.
pub fn clean_html(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::with_capacity(html.len());
    write_children(fragment.root_element(), &mut out);
    out
}

fn write_children(el: ElementRef, out: &mut String) {
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            write_element(child_el, out);
        } else if let Some(text) = child.value().as_text() {
            out.push_str(&escape(text, false));
        }
    }
}

fn write_element(el: ElementRef, out: &mut String) {
    if is_excluded(&el) {
        return;
    }
    let name = el.value().name();
    out.push('<');
    out.push_str(name);
    for (key, value) in el.value().attrs() {
        out.push_str(&format!(" {}=\"{}\"", key, escape(value, true)));
    }
    out.push('>');
    if VOID_ELEMENTS.contains(&name) {
        return;
    }
    write_children(el, out);
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn escape(text: &str, attribute: bool) -> String {
    let escaped = text
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    if attribute {
        escaped.replace('"', "&quot;")
    } else {
        escaped
    }
}

/// Collapse runs of blank lines and trim every line.
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines().map(str::trim_end) {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run == 1 && !out.is_empty() {
                out.push('\n');
            }
            continue;
        }
        blank_run = 0;
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(line.trim_start());
        out.push('\n');
    }
    out.trim().to_string()
}
