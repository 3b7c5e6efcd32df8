//! Renders a JavaScript-heavy page in a pooled headless browser and extracts
//! its readable content.

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use url::Url;

use super::params::{optional_string, required_string};
use crate::kernel::browser_pool::BrowserPool;
use crate::kernel::tasks::{CrawlerDescriptor, CrawlerError, CrawlerStrategy, ProgressEmitter};

pub const CRAWLER_TYPE: &str = "rendered_page";
const TEXT_CHARS: usize = 2000;
const MAX_MATCHES: usize = 100;

pub fn descriptor() -> CrawlerDescriptor {
    CrawlerDescriptor::new(CRAWLER_TYPE, "Rendered Page")
        .description("Loads a page in a headless browser; optional CSS selector picks elements")
        .requires(&["url"])
        .accepts(&["selector"])
}

pub struct RenderedPageCrawler {
    browsers: BrowserPool,
    url: Url,
    selector: Option<String>,
}

impl RenderedPageCrawler {
    pub fn from_params(browsers: &BrowserPool, params: &Map<String, Value>) -> Result<Self, CrawlerError> {
        let raw = required_string(params, "url")?;
        let url = Url::parse(&raw).map_err(|e| CrawlerError::invalid_param("url", e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CrawlerError::invalid_param("url", "must be an http(s) URL"));
        }

        let selector = optional_string(params, "selector")?;
        if let Some(css) = &selector {
            Selector::parse(css)
                .map_err(|e| CrawlerError::invalid_param("selector", e.to_string()))?;
        }

        Ok(Self {
            browsers: browsers.clone(),
            url,
            selector,
        })
    }
}

fn collapse_whitespace<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts.flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

/// Title, headings, visible text and optional selector matches of a DOM.
pub fn extract(html: &str, selector: Option<&str>) -> Value {
    let document = Html::parse_document(html);
    let texts = |css: &str| -> Vec<String> {
        Selector::parse(css)
            .map(|s| {
                document
                    .select(&s)
                    .map(|el| collapse_whitespace(el.text()))
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    };

    let title = texts("title").into_iter().next();
    let headings = texts("h1, h2, h3");
    let text: String = texts("body")
        .into_iter()
        .next()
        .unwrap_or_default()
        .chars()
        .take(TEXT_CHARS)
        .collect();

    let mut result = json!({
        "title": title,
        "headings": headings,
        "text": text,
    });
    if let Some(css) = selector {
        let matches: Vec<String> = texts(css).into_iter().take(MAX_MATCHES).collect();
        result["selector"] = json!(css);
        result["match_count"] = json!(matches.len());
        result["matches"] = json!(matches);
    }
    result
}

#[async_trait]
impl CrawlerStrategy for RenderedPageCrawler {
    async fn run(&mut self, progress: ProgressEmitter) -> Result<Value, CrawlerError> {
        progress.emit(10, "Waiting for a browser").await?;
        let lease = tokio::select! {
            lease = self.browsers.acquire() => lease?,
            _ = progress.cancelled() => return Err(CrawlerError::Cancelled),
        };

        progress.emit(30, format!("Rendering {}", self.url)).await?;
        // Dropping the render future kills the browser process.
        let html = tokio::select! {
            html = lease.dump_dom(self.url.as_str()) => html?,
            _ = progress.cancelled() => {
                debug!(url = %self.url, "render abandoned on cancellation");
                return Err(CrawlerError::Cancelled);
            }
        };
        drop(lease);

        progress.emit(80, "Extracting content").await?;
        let mut result = extract(&html, self.selector.as_deref());
        if result["text"].as_str().map_or(true, str::is_empty) && result["title"].is_null() {
            return Err(CrawlerError::NoData(format!("{} rendered no content", self.url)));
        }
        result["url"] = json!(self.url.as_str());

        info!(url = %self.url, bytes = html.len(), "page rendered");
        Ok(result)
    }
}
