//! Domain models: posts, list parameters, aggregation reports, job status.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Canonical article record as stored in `posts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub url: String,
    pub source: String,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a post.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreatePost {
    pub title: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub url: String,
    pub source: String,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Parameters for updating a post. `url`, `source`, and `published_at` are
/// immutable and intentionally absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdatePost {
    pub title: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
    pub image_url: Option<String>,
}

impl CreatePost {
    pub fn validate(&self) -> Result<()> {
        check_len("title", &self.title, 1, 500)?;
        check_len("url", &self.url, 10, 500)?;
        check_len("source", &self.source, 1, 100)?;
        if let Some(category) = &self.category {
            check_len("category", category, 0, 50)?;
        }
        if let Some(image_url) = &self.image_url {
            check_len("image_url", image_url, 0, 1000)?;
            check_http_url("image_url", image_url)?;
        }
        Ok(())
    }
}

impl UpdatePost {
    pub fn validate(&self) -> Result<()> {
        check_len("title", &self.title, 1, 500)?;
        if let Some(category) = &self.category {
            check_len("category", category, 0, 50)?;
        }
        if let Some(image_url) = &self.image_url {
            check_len("image_url", image_url, 0, 1000)?;
            check_http_url("image_url", image_url)?;
        }
        Ok(())
    }
}

fn check_len(field: &str, value: &str, min: usize, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len < min {
        return Err(Error::validation(format!(
            "{field} must be at least {min} characters long"
        )));
    }
    if len > max {
        return Err(Error::validation(format!(
            "{field} must not exceed {max} characters"
        )));
    }
    Ok(())
}

fn check_http_url(field: &str, value: &str) -> Result<()> {
    let value = value.trim();
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(Error::validation(format!("{field} must be a valid URL")))
    }
}

/// Filtering and pagination parameters for listing posts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostListParams {
    pub page: i64,
    pub limit: i64,
    pub category: Option<String>,
    pub source: Option<String>,
    pub search: Option<String>,
}

impl PostListParams {
    /// Defaults: page 1, limit 20, no filters.
    pub fn new() -> Self {
        Self {
            page: 1,
            limit: 20,
            ..Default::default()
        }
    }

    /// Normalized copy: page >= 1, limit clamped to [1, 100].
    pub fn clamped(&self) -> Self {
        let mut out = self.clone();
        if out.page < 1 {
            out.page = 1;
        }
        if out.limit < 1 {
            out.limit = 20;
        }
        if out.limit > 100 {
            out.limit = 100;
        }
        out
    }

    /// True when no filter applies; only this shape is list-cached.
    pub fn is_unfiltered(&self) -> bool {
        self.search.is_none() && self.category.is_none() && self.source.is_none()
    }
}

/// Pagination metadata attached to list responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMeta {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PageMeta {
    pub fn calculate(page: i64, limit: i64, total: i64) -> Self {
        let mut total_pages = (total + limit - 1) / limit;
        if total_pages == 0 {
            total_pages = 1;
        }
        Self {
            page,
            limit,
            total,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }
}

/// A page of posts with its pagination metadata.
#[derive(Debug, Clone, Serialize)]
pub struct PostPage {
    pub posts: Vec<Post>,
    pub pagination: PageMeta,
}

/// Per-unit counters: one category, or one batch of sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnitStats {
    pub fetched: u64,
    pub created: u64,
    pub duplicates: u64,
    pub errors: u64,
}

impl UnitStats {
    pub fn add(&mut self, other: &UnitStats) {
        self.fetched += other.fetched;
        self.created += other.created;
        self.duplicates += other.duplicates;
        self.errors += other.errors;
    }
}

/// Cap on the report's error message list.
pub const MAX_REPORT_ERRORS: usize = 100;

/// Immutable result of one aggregation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregationReport {
    pub total_fetched: u64,
    pub total_created: u64,
    pub total_duplicates: u64,
    pub total_errors: u64,
    pub duration: Duration,
    pub categories: HashMap<String, UnitStats>,
    pub sources: HashMap<String, UnitStats>,
    pub errors: Vec<String>,
}

impl AggregationReport {
    /// Fold one unit's totals into the run totals.
    pub fn add_totals(&mut self, stats: &UnitStats) {
        self.total_fetched += stats.fetched;
        self.total_created += stats.created;
        self.total_duplicates += stats.duplicates;
        self.total_errors += stats.errors;
    }

    /// Append an error message unless the cap is reached.
    pub fn push_error(&mut self, message: String) {
        if self.errors.len() < MAX_REPORT_ERRORS {
            self.errors.push(message);
        }
    }

    pub fn category_entry(&mut self, name: &str) -> &mut UnitStats {
        self.categories.entry(name.to_string()).or_default()
    }

    pub fn source_entry(&mut self, name: &str) -> &mut UnitStats {
        self.sources.entry(name.to_string()).or_default()
    }

    /// Absorb another report (used when composing runs). The duration is
    /// left to the caller, which owns the overall wall clock.
    pub fn merge(&mut self, other: AggregationReport) {
        self.total_fetched += other.total_fetched;
        self.total_created += other.total_created;
        self.total_duplicates += other.total_duplicates;
        self.total_errors += other.total_errors;
        for (name, stats) in other.categories {
            self.categories.entry(name).or_default().add(&stats);
        }
        for (name, stats) in other.sources {
            self.sources.entry(name).or_default().add(&stats);
        }
        for message in other.errors {
            self.push_error(message);
        }
    }
}

/// Point-in-time snapshot of one scheduled job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub interval: Duration,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: i64,
    pub error_count: i64,
    pub last_error: Option<String>,
    pub is_running: bool,
    pub average_run_time: Duration,
}

impl JobStatus {
    pub fn new(name: &str, interval: Duration) -> Self {
        Self {
            name: name.to_string(),
            interval,
            last_run: None,
            next_run: None,
            run_count: 0,
            error_count: 0,
            last_error: None,
            is_running: false,
            average_run_time: Duration::ZERO,
        }
    }
}
