//! Registers the three aggregation jobs on the scheduler.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::aggregator::{default_categories, default_sources, Aggregator};
use crate::scheduler::Scheduler;

const TOP_HEADLINES_INTERVAL: Duration = Duration::from_secs(30 * 60);
const CATEGORY_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);
const SOURCE_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);

pub async fn register_aggregation_jobs(scheduler: &Scheduler, aggregator: Arc<Aggregator>) {
    let agg = Arc::clone(&aggregator);
    scheduler
        .add_job("top-headlines", TOP_HEADLINES_INTERVAL, move |ctx| {
            let agg = Arc::clone(&agg);
            async move {
                info!("running scheduled top headlines aggregation");
                let report = agg.aggregate_top_headlines(&ctx).await;
                info!(
                    fetched = report.total_fetched,
                    created = report.total_created,
                    duplicates = report.total_duplicates,
                    errors = report.total_errors,
                    "top headlines aggregation completed"
                );
                Ok(())
            }
        })
        .await;

    let agg = Arc::clone(&aggregator);
    scheduler
        .add_job("category-aggregation", CATEGORY_INTERVAL, move |ctx| {
            let agg = Arc::clone(&agg);
            async move {
                info!("running scheduled category aggregation");
                let report = agg
                    .aggregate_by_categories(&ctx, &default_categories())
                    .await;
                info!(
                    fetched = report.total_fetched,
                    created = report.total_created,
                    duplicates = report.total_duplicates,
                    errors = report.total_errors,
                    "category aggregation completed"
                );
                Ok(())
            }
        })
        .await;

    let agg = Arc::clone(&aggregator);
    scheduler
        .add_job("source-aggregation", SOURCE_INTERVAL, move |ctx| {
            let agg = Arc::clone(&agg);
            async move {
                info!("running scheduled source aggregation");
                let report = agg.aggregate_by_sources(&ctx, &default_sources()).await;
                info!(
                    fetched = report.total_fetched,
                    created = report.total_created,
                    duplicates = report.total_duplicates,
                    errors = report.total_errors,
                    "source aggregation completed"
                );
                Ok(())
            }
        })
        .await;

    info!("aggregation jobs configured");
}
