//! Remote job board crawler (Remotive public API).

use std::time::Duration;

use async_trait::async_trait;
use fetch_client::{FetchClient, FetchRequest};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use super::params::optional_string;
use crate::kernel::tasks::{CrawlerDescriptor, CrawlerError, CrawlerStrategy, ProgressEmitter};

pub const CRAWLER_TYPE: &str = "jobs";
pub const API_URL: &str = "https://remotive.com/api/remote-jobs";
const BASE_DELAY: Duration = Duration::from_secs(1);
const DESCRIPTION_CHARS: usize = 200;

pub fn descriptor() -> CrawlerDescriptor {
    CrawlerDescriptor::new(CRAWLER_TYPE, "Remote Jobs")
        .description("Remote job postings from the Remotive API, optionally filtered")
        .accepts(&["category", "search"])
}

#[derive(Debug, Deserialize)]
struct RemotiveResponse {
    #[serde(default)]
    jobs: Vec<RemotiveJob>,
}

#[derive(Debug, Deserialize)]
struct RemotiveJob {
    id: Option<i64>,
    title: Option<String>,
    company_name: Option<String>,
    candidate_required_location: Option<String>,
    salary: Option<String>,
    publication_date: Option<String>,
    #[serde(default)]
    tags: Vec<Value>,
    category: Option<String>,
    job_type: Option<String>,
    url: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobPosting {
    pub id: Option<i64>,
    pub title: Option<String>,
    pub company: Option<String>,
    pub city: String,
    pub location_raw: Option<String>,
    pub salary: Option<String>,
    pub publication_date: Option<String>,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub job_type: Option<String>,
    pub url: Option<String>,
    pub description: String,
}

impl From<RemotiveJob> for JobPosting {
    fn from(job: RemotiveJob) -> Self {
        let tags = job
            .tags
            .iter()
            .map(|tag| match tag {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .filter(|tag| !tag.is_empty())
            .collect();

        Self {
            id: job.id,
            title: job.title,
            company: job.company_name,
            city: normalize_city(job.candidate_required_location.as_deref()),
            location_raw: job.candidate_required_location,
            salary: job.salary.filter(|s| !s.trim().is_empty()),
            publication_date: job.publication_date,
            tags,
            category: job.category,
            job_type: job.job_type,
            url: job.url,
            description: job
                .description
                .unwrap_or_default()
                .chars()
                .take(DESCRIPTION_CHARS)
                .collect(),
        }
    }
}

/// "City, Country" → "City"; blank → "Unknown"; anything else as given.
pub fn normalize_city(location: Option<&str>) -> String {
    let location = location.unwrap_or_default().trim();
    if location.is_empty() {
        return "Unknown".to_string();
    }
    match location.split_once(',') {
        Some((city, _)) if !city.trim().is_empty() => city.trim().to_string(),
        _ => location.to_string(),
    }
}

pub struct RemoteJobsCrawler {
    fetch: FetchClient,
    category: Option<String>,
    search: Option<String>,
}

impl RemoteJobsCrawler {
    pub fn from_params(fetch: &FetchClient, params: &Map<String, Value>) -> Result<Self, CrawlerError> {
        Ok(Self {
            fetch: fetch.with_base_delay(BASE_DELAY),
            category: optional_string(params, "category")?,
            search: optional_string(params, "search")?,
        })
    }
}

#[async_trait]
impl CrawlerStrategy for RemoteJobsCrawler {
    async fn run(&mut self, progress: ProgressEmitter) -> Result<Value, CrawlerError> {
        progress.emit(10, "Requesting job listings").await?;

        let mut request = FetchRequest::get(API_URL).timeout(Duration::from_secs(30));
        if let Some(category) = &self.category {
            request = request.query("category", category);
        }
        if let Some(search) = &self.search {
            request = request.query("search", search);
        }

        let response = self.fetch.fetch(request).await?.error_for_status()?;
        let payload: RemotiveResponse = response.json()?;
        progress
            .emit(60, format!("Processing {} postings", payload.jobs.len()))
            .await?;

        let jobs: Vec<JobPosting> = payload.jobs.into_iter().map(JobPosting::from).collect();
        if jobs.is_empty() {
            return Err(CrawlerError::NoData("the job board returned no postings".to_string()));
        }

        info!(count = jobs.len(), category = ?self.category, search = ?self.search, "jobs crawled");
        progress.emit(90, "Organizing results").await?;

        Ok(json!({
            "jobs": jobs,
            "total": jobs.len(),
            "category": self.category,
            "search": self.search,
        }))
    }
}
