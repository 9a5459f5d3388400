use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use newsfeed::aggregator::Aggregator;
use newsfeed::cache::RedisCache;
use newsfeed::news::NewsApiClient;
use newsfeed::scheduler::Scheduler;
use newsfeed::store::PgPostStore;
use newsfeed::{config, db, jobs};

fn init_tracing(cfg: &config::Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.app.log_level));
    if cfg.is_development() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = config::load()?;
    init_tracing(&cfg);
    info!(environment = %cfg.app.environment, "starting newsfeed");

    let pool = db::init_pool(&cfg).await?;
    db::health(&pool).await?;
    db::run_migrations(&pool).await?;
    let redis = db::connect_redis(&cfg).await?;
    info!("database connections established");

    let cache = Arc::new(RedisCache::new(redis));
    let store = Arc::new(PgPostStore::new(pool.clone(), cache, cfg.cache.ttl));
    let news = Arc::new(NewsApiClient::new(&cfg.news_api)?);
    let aggregator = Arc::new(Aggregator::new(news, store));

    let scheduler = Scheduler::new();
    jobs::register_aggregation_jobs(&scheduler, aggregator).await;

    let shutdown = CancellationToken::new();
    scheduler.start(&shutdown).await;
    info!("scheduler running; Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    shutdown.cancel();
    scheduler.stop().await;
    pool.close().await;
    info!("shutdown complete");
    Ok(())
}
