//! Douban Top 250 movie chart crawler.
//!
//! Walks the paginated chart (25 entries per page) and scrapes each
//! `div.item` block. A failure on the first page fails the task; a failure on
//! a later page stops the walk and keeps what was collected so far.

use std::time::Duration;

use async_trait::async_trait;
use fetch_client::{FetchClient, FetchRequest};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::params::optional_u32;
use crate::kernel::tasks::{CrawlerDescriptor, CrawlerError, CrawlerStrategy, ProgressEmitter};

pub const CRAWLER_TYPE: &str = "movies";
pub const CHART_URL: &str = "https://movie.douban.com/top250";
const REFERER: &str = "https://movie.douban.com/";
const PAGE_SIZE: u32 = 25;
const MAX_PAGES: u32 = 10;
const BASE_DELAY: Duration = Duration::from_secs(2);

pub fn descriptor() -> CrawlerDescriptor {
    CrawlerDescriptor::new(CRAWLER_TYPE, "Top Movies")
        .description("Douban Top 250 chart: title, rating, votes, year and director")
        .accepts(&["max_pages"])
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Movie {
    pub rank: Option<u32>,
    pub title: String,
    pub rating: Option<f64>,
    pub people_count: Option<u64>,
    pub year: Option<String>,
    pub director: String,
    pub url: Option<String>,
}

pub fn page_url(page: u32) -> String {
    format!("{CHART_URL}?start={}", page * PAGE_SIZE)
}

/// Progress reported before fetching `page` of `max_pages`, spanning 10..90.
pub fn page_progress(page: u32, max_pages: u32) -> i32 {
    (page * 80 / max_pages.max(1)) as i32 + 10
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Every movie on one chart page. Entries without a title are skipped.
pub fn parse_page(html: &str) -> Vec<Movie> {
    let document = Html::parse_document(html);
    let Some(item_selector) = selector("div.item") else {
        return Vec::new();
    };

    document
        .select(&item_selector)
        .filter_map(parse_item)
        .collect()
}

fn parse_item(item: ElementRef<'_>) -> Option<Movie> {
    let first = |css: &str| selector(css).and_then(|s| item.select(&s).next());

    let title = first("span.title").map(text_of).filter(|t| !t.is_empty())?;
    let rank = first("em").and_then(|em| text_of(em).parse().ok());
    let rating = first("span.rating_num").and_then(|r| text_of(r).parse().ok());
    let url = first("a[href]").and_then(|a| a.value().attr("href").map(str::to_string));

    let people_count = selector("div.star span").and_then(|s| {
        item.select(&s)
            .map(text_of)
            .find(|t| t.contains("人评价"))
            .and_then(|t| t.chars().filter(char::is_ascii_digit).collect::<String>().parse().ok())
    });

    let info = first("div.bd p").map(|p| p.text().collect::<String>()).unwrap_or_default();

    Some(Movie {
        rank,
        title,
        rating,
        people_count,
        year: first_year(&info),
        director: director(&info),
        url,
    })
}

/// First run of exactly four ASCII digits.
fn first_year(text: &str) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.windows(4).enumerate().find_map(|(i, window)| {
        let bounded_left = i == 0 || !chars[i - 1].is_ascii_digit();
        let bounded_right = chars.get(i + 4).map_or(true, |c| !c.is_ascii_digit());
        (window.iter().all(char::is_ascii_digit) && bounded_left && bounded_right)
            .then(|| window.iter().collect())
    })
}

fn director(info: &str) -> String {
    info.split_once("导演:")
        .map(|(_, rest)| {
            let end = [rest.find('\u{a0}'), rest.find("主演"), rest.find('\n')]
                .into_iter()
                .flatten()
                .min()
                .unwrap_or(rest.len());
            rest[..end].trim().to_string()
        })
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| "Unknown".to_string())
}

pub struct TopMoviesCrawler {
    fetch: FetchClient,
    max_pages: u32,
}

impl TopMoviesCrawler {
    pub fn from_params(fetch: &FetchClient, params: &Map<String, Value>) -> Result<Self, CrawlerError> {
        let max_pages = optional_u32(params, "max_pages")?
            .unwrap_or(MAX_PAGES)
            .clamp(1, MAX_PAGES);
        Ok(Self {
            fetch: fetch.with_base_delay(BASE_DELAY),
            max_pages,
        })
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<Movie>, CrawlerError> {
        let request = FetchRequest::get(page_url(page)).header("Referer", REFERER);
        let response = self.fetch.fetch(request).await?.error_for_status()?;
        Ok(parse_page(&response.text()))
    }
}

#[async_trait]
impl CrawlerStrategy for TopMoviesCrawler {
    async fn run(&mut self, progress: ProgressEmitter) -> Result<Value, CrawlerError> {
        let mut movies = Vec::new();
        let mut pages_crawled = 0;

        for page in 0..self.max_pages {
            progress
                .emit(
                    page_progress(page, self.max_pages),
                    format!("Crawling page {} of {}", page + 1, self.max_pages),
                )
                .await?;

            match self.fetch_page(page).await {
                Ok(found) if found.is_empty() => {
                    warn!(page, "chart page had no entries, stopping");
                    break;
                }
                Ok(found) => {
                    movies.extend(found);
                    pages_crawled += 1;
                }
                Err(e) if page == 0 => return Err(e),
                Err(e) => {
                    warn!(page, error = %e, "chart page failed, keeping partial results");
                    break;
                }
            }
        }

        if movies.is_empty() {
            return Err(CrawlerError::NoData("the chart had no movies".to_string()));
        }

        progress.emit(90, "Organizing results").await?;
        info!(count = movies.len(), pages_crawled, "movies crawled");

        Ok(json!({
            "movies": movies,
            "total": movies.len(),
            "pages_crawled": pages_crawled,
        }))
    }
}
