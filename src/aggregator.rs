//! Concurrent aggregation pipeline: fans out per-category and
//! per-source-batch units under a fixed worker ceiling, classifies every
//! article outcome, and folds the results into a single report.
//!
//! Aggregation operations never fail; per-unit failures are captured in the
//! report instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Error;
use crate::model::{AggregationReport, UnitStats};
use crate::news::NewsApi;
use crate::store::PostStore;

/// Maximum units in flight per aggregation run.
const MAX_WORKERS: usize = 5;

/// Sources grouped per upstream call.
const SOURCE_BATCH_SIZE: usize = 3;

/// Articles requested per upstream call.
const FETCH_PAGE_SIZE: u32 = 50;

pub fn default_categories() -> Vec<String> {
    [
        "general",
        "business",
        "entertainment",
        "health",
        "science",
        "sports",
        "technology",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn default_sources() -> Vec<String> {
    [
        "bbc-news",
        "cnn",
        "reuters",
        "associated-press",
        "the-verge",
        "techcrunch",
        "ars-technica",
        "hacker-news",
        "the-wall-street-journal",
        "bloomberg",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub struct Aggregator {
    news: Arc<dyn NewsApi>,
    store: Arc<dyn PostStore>,
    max_workers: usize,
}

/// Outcome of one fan-out unit before it is folded into the shared report.
#[derive(Default)]
struct UnitOutcome {
    stats: UnitStats,
    per_source: HashMap<String, UnitStats>,
    messages: Vec<String>,
}

impl Aggregator {
    pub fn new(news: Arc<dyn NewsApi>, store: Arc<dyn PostStore>) -> Self {
        Self {
            news,
            store,
            max_workers: MAX_WORKERS,
        }
    }

    /// Top-headlines run over the default category set.
    pub async fn aggregate_top_headlines(&self, ctx: &CancellationToken) -> AggregationReport {
        self.aggregate_by_categories(ctx, &default_categories())
            .await
    }

    /// Fan out one unit per category.
    pub async fn aggregate_by_categories(
        &self,
        ctx: &CancellationToken,
        categories: &[String],
    ) -> AggregationReport {
        let started = Instant::now();
        info!(categories = categories.len(), "starting category aggregation");

        let report = Arc::new(Mutex::new(AggregationReport::default()));
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut workers = JoinSet::new();

        for category in categories {
            let category = category.clone();
            let news = Arc::clone(&self.news);
            let store = Arc::clone(&self.store);
            let ctx = ctx.clone();
            let semaphore = Arc::clone(&semaphore);
            let report = Arc::clone(&report);
            workers.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("aggregation semaphore closed");
                let outcome = category_unit(news.as_ref(), store.as_ref(), &ctx, &category).await;

                let mut report = report.lock().await;
                report.add_totals(&outcome.stats);
                report.category_entry(&category).add(&outcome.stats);
                for message in outcome.messages {
                    report.push_error(message);
                }
            });
        }
        while workers.join_next().await.is_some() {}

        let mut report = take_report(report).await;
        report.duration = started.elapsed();
        info!(
            fetched = report.total_fetched,
            created = report.total_created,
            duplicates = report.total_duplicates,
            errors = report.total_errors,
            "category aggregation finished"
        );
        report
    }

    /// Fan out one unit per batch of up to three sources.
    pub async fn aggregate_by_sources(
        &self,
        ctx: &CancellationToken,
        sources: &[String],
    ) -> AggregationReport {
        let started = Instant::now();
        info!(sources = sources.len(), "starting source aggregation");

        let report = Arc::new(Mutex::new(AggregationReport::default()));
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut workers = JoinSet::new();

        for batch in sources.chunks(SOURCE_BATCH_SIZE) {
            let batch: Vec<String> = batch.to_vec();
            let news = Arc::clone(&self.news);
            let store = Arc::clone(&self.store);
            let ctx = ctx.clone();
            let semaphore = Arc::clone(&semaphore);
            let report = Arc::clone(&report);
            workers.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("aggregation semaphore closed");
                let outcome = source_batch_unit(news.as_ref(), store.as_ref(), &ctx, &batch).await;

                let mut report = report.lock().await;
                report.add_totals(&outcome.stats);
                for (source, stats) in &outcome.per_source {
                    report.source_entry(source).add(stats);
                }
                for message in outcome.messages {
                    report.push_error(message);
                }
            });
        }
        while workers.join_next().await.is_some() {}

        let mut report = take_report(report).await;
        report.duration = started.elapsed();
        info!(
            fetched = report.total_fetched,
            created = report.total_created,
            duplicates = report.total_duplicates,
            errors = report.total_errors,
            "source aggregation finished"
        );
        report
    }

    /// Compose the category and source runs over the default sets.
    pub async fn aggregate_all(&self, ctx: &CancellationToken) -> AggregationReport {
        let started = Instant::now();
        let mut report = self
            .aggregate_by_categories(ctx, &default_categories())
            .await;
        let sources = self.aggregate_by_sources(ctx, &default_sources()).await;
        report.merge(sources);
        report.duration = started.elapsed();
        report
    }
}

async fn take_report(report: Arc<Mutex<AggregationReport>>) -> AggregationReport {
    match Arc::try_unwrap(report) {
        Ok(inner) => inner.into_inner(),
        // Unreachable after drain, but cloning is a safe fallback.
        Err(shared) => shared.lock().await.clone(),
    }
}

async fn category_unit(
    news: &dyn NewsApi,
    store: &dyn PostStore,
    ctx: &CancellationToken,
    category: &str,
) -> UnitOutcome {
    let mut outcome = UnitOutcome::default();

    let envelope = match news.by_category(ctx, category, FETCH_PAGE_SIZE).await {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(category, error = %err, "category fetch failed");
            outcome.stats.errors += 1;
            outcome.messages.push(format!("category {category}: {err}"));
            return outcome;
        }
    };

    outcome.stats.fetched = envelope.articles.len() as u64;
    for article in &envelope.articles {
        if ctx.is_cancelled() {
            break;
        }
        // Articles without a source name are silently skipped.
        let Some(params) = article.to_create_post() else {
            continue;
        };
        match store.create(ctx, &params).await {
            Ok(_) => outcome.stats.created += 1,
            Err(Error::Duplicate) => outcome.stats.duplicates += 1,
            Err(err) => {
                outcome.stats.errors += 1;
                outcome
                    .messages
                    .push(format!("article {}: {err}", article.url));
            }
        }
    }
    outcome
}

async fn source_batch_unit(
    news: &dyn NewsApi,
    store: &dyn PostStore,
    ctx: &CancellationToken,
    batch: &[String],
) -> UnitOutcome {
    let mut outcome = UnitOutcome::default();

    let envelope = match news.by_sources(ctx, batch, FETCH_PAGE_SIZE).await {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(batch = batch.join(","), error = %err, "source batch fetch failed");
            outcome.stats.errors += 1;
            for source in batch {
                outcome.per_source.entry(source.clone()).or_default().errors += 1;
            }
            outcome
                .messages
                .push(format!("sources {}: {err}", batch.join(",")));
            return outcome;
        }
    };

    outcome.stats.fetched = envelope.articles.len() as u64;
    for article in &envelope.articles {
        if ctx.is_cancelled() {
            break;
        }
        let Some(params) = article.to_create_post() else {
            continue;
        };
        let per_source = outcome
            .per_source
            .entry(params.source.clone())
            .or_default();
        per_source.fetched += 1;
        match store.create(ctx, &params).await {
            Ok(_) => {
                outcome.stats.created += 1;
                outcome
                    .per_source
                    .entry(params.source.clone())
                    .or_default()
                    .created += 1;
            }
            Err(Error::Duplicate) => {
                outcome.stats.duplicates += 1;
                outcome
                    .per_source
                    .entry(params.source.clone())
                    .or_default()
                    .duplicates += 1;
            }
            Err(err) => {
                outcome.stats.errors += 1;
                outcome
                    .per_source
                    .entry(params.source.clone())
                    .or_default()
                    .errors += 1;
                outcome
                    .messages
                    .push(format!("article {}: {err}", article.url));
            }
        }
    }
    outcome
}
