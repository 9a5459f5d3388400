//! Post store tests against a real PostgreSQL instance.
//!
//! Run with `TEST_DATABASE_URL` pointing at a scratch database:
//! `TEST_DATABASE_URL=postgres://... cargo test -- --ignored`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::PgPool;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use newsfeed::cache::Cache;
use newsfeed::error::{Error, Result};
use newsfeed::model::{CreatePost, PostListParams, UpdatePost};
use newsfeed::store::{PgPostStore, PostStore};

// The tests share one database; run them one at a time.
static DB_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// In-memory stand-in for Redis honoring TTLs and trailing-star patterns.
#[derive(Default)]
struct MemoryCache {
    entries: AsyncMutex<HashMap<String, (String, Instant)>>,
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, _ctx: &CancellationToken, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        _ctx: &CancellationToken,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, _ctx: &CancellationToken, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn delete_pattern(&self, _ctx: &CancellationToken, pattern: &str) -> Result<()> {
        let prefix = pattern.trim_end_matches('*');
        self.entries
            .lock()
            .await
            .retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}

async fn setup() -> (PgPool, Arc<MemoryCache>, PgPostStore) {
    let url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must point at a scratch PostgreSQL database");
    let pool = PgPool::connect(&url).await.expect("connect to PostgreSQL");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    sqlx::query("TRUNCATE posts RESTART IDENTITY")
        .execute(&pool)
        .await
        .expect("truncate posts");

    let cache = Arc::new(MemoryCache::default());
    let store = PgPostStore::new(
        pool.clone(),
        Arc::clone(&cache) as Arc<dyn Cache>,
        Duration::from_secs(300),
    );
    (pool, cache, store)
}

fn params(url: &str, title: &str) -> CreatePost {
    CreatePost {
        title: title.into(),
        url: url.into(),
        source: "TestWire".into(),
        published_at: Some(Utc.with_ymd_and_hms(2024, 1, 20, 10, 0, 0).unwrap()),
        ..Default::default()
    }
}

#[tokio::test]
#[ignore = "requires PostgreSQL (TEST_DATABASE_URL)"]
async fn create_then_duplicate() {
    let _guard = DB_LOCK.lock().await;
    let (_pool, _cache, store) = setup().await;
    let ctx = CancellationToken::new();

    let first = store
        .create(&ctx, &params("https://ex.com/a", "A"))
        .await
        .unwrap();
    assert!(first.id > 0);
    assert_eq!(first.url, "https://ex.com/a");
    assert!(first.updated_at >= first.created_at);

    let fetched = store.get_by_id(&ctx, first.id).await.unwrap();
    assert_eq!(fetched, first);

    let err = store
        .create(&ctx, &params("https://ex.com/a", "A again"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Duplicate));
}

#[tokio::test]
#[ignore = "requires PostgreSQL (TEST_DATABASE_URL)"]
async fn update_preserves_immutable_columns() {
    let _guard = DB_LOCK.lock().await;
    let (_pool, _cache, store) = setup().await;
    let ctx = CancellationToken::new();

    let created = store
        .create(&ctx, &params("https://ex.com/upd", "Before"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let updated = store
        .update(
            &ctx,
            created.id,
            &UpdatePost {
                title: "After".into(),
                description: Some("new description".into()),
                category: Some("technology".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.title, "After");
    assert_eq!(updated.url, created.url);
    assert_eq!(updated.source, created.source);
    assert_eq!(updated.published_at, created.published_at);
    assert_eq!(updated.created_at, created.created_at);
    assert!(updated.updated_at > created.updated_at);

    let missing = store
        .update(
            &ctx,
            9_999_999,
            &UpdatePost {
                title: "nobody".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(missing, Error::NotFound));
}

#[tokio::test]
#[ignore = "requires PostgreSQL (TEST_DATABASE_URL)"]
async fn delete_then_not_found() {
    let _guard = DB_LOCK.lock().await;
    let (_pool, _cache, store) = setup().await;
    let ctx = CancellationToken::new();

    let created = store
        .create(&ctx, &params("https://ex.com/del", "Doomed"))
        .await
        .unwrap();
    store.delete(&ctx, created.id).await.unwrap();

    let err = store.get_by_id(&ctx, created.id).await.unwrap_err();
    assert!(matches!(err, Error::NotFound));

    let err = store.delete(&ctx, created.id).await.unwrap_err();
    assert!(matches!(err, Error::NotFound));
}

#[tokio::test]
#[ignore = "requires PostgreSQL (TEST_DATABASE_URL)"]
async fn id_lookup_is_read_through_cached() {
    let _guard = DB_LOCK.lock().await;
    let (pool, _cache, store) = setup().await;
    let ctx = CancellationToken::new();

    let created = store
        .create(&ctx, &params("https://ex.com/cached", "Cached"))
        .await
        .unwrap();

    // Prime the cache, then change the row behind the store's back.
    store.get_by_id(&ctx, created.id).await.unwrap();
    sqlx::query("UPDATE posts SET title = 'sneaky' WHERE id = $1")
        .bind(created.id)
        .execute(&pool)
        .await
        .unwrap();

    let stale = store.get_by_id(&ctx, created.id).await.unwrap();
    assert_eq!(stale.title, "Cached");

    // A store mutation invalidates the id cache.
    store
        .update(
            &ctx,
            created.id,
            &UpdatePost {
                title: "Fresh".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let fresh = store.get_by_id(&ctx, created.id).await.unwrap();
    assert_eq!(fresh.title, "Fresh");
}

#[tokio::test]
#[ignore = "requires PostgreSQL (TEST_DATABASE_URL)"]
async fn unfiltered_list_is_cached_until_mutation() {
    let _guard = DB_LOCK.lock().await;
    let (pool, _cache, store) = setup().await;
    let ctx = CancellationToken::new();

    let _p1 = store
        .create(&ctx, &params("https://ex.com/l1", "One"))
        .await
        .unwrap();
    let p2 = store
        .create(&ctx, &params("https://ex.com/l2", "Two"))
        .await
        .unwrap();

    let list_params = PostListParams::new();
    let first = store.list(&ctx, &list_params).await.unwrap();
    assert_eq!(first.len(), 2);

    // Delete a row directly in the store; the cached page must not notice.
    sqlx::query("DELETE FROM posts WHERE id = $1")
        .bind(p2.id)
        .execute(&pool)
        .await
        .unwrap();
    let stale = store.list(&ctx, &list_params).await.unwrap();
    assert_eq!(stale, first);

    // Any mutation through the store invalidates the page.
    let p3 = store
        .create(&ctx, &params("https://ex.com/l3", "Three"))
        .await
        .unwrap();
    let refreshed = store.list(&ctx, &list_params).await.unwrap();
    let urls: Vec<&str> = refreshed.iter().map(|p| p.url.as_str()).collect();
    assert!(urls.contains(&"https://ex.com/l1"));
    assert!(urls.contains(&p3.url.as_str()));
    assert!(!urls.contains(&"https://ex.com/l2"));
}

#[tokio::test]
#[ignore = "requires PostgreSQL (TEST_DATABASE_URL)"]
async fn list_routing_and_ordering() {
    let _guard = DB_LOCK.lock().await;
    let (_pool, _cache, store) = setup().await;
    let ctx = CancellationToken::new();

    let mut old = params("https://ex.com/r-old", "Old Rust news");
    old.category = Some("technology".into());
    old.published_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    store.create(&ctx, &old).await.unwrap();

    let mut fresh = params("https://ex.com/r-new", "Fresh takes");
    fresh.category = Some("technology".into());
    fresh.description = Some("all about OpenAI again".into());
    fresh.published_at = Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
    store.create(&ctx, &fresh).await.unwrap();

    let mut undated = params("https://ex.com/r-undated", "Undated piece");
    undated.source = "OtherWire".into();
    undated.published_at = None;
    store.create(&ctx, &undated).await.unwrap();

    // Newest first, null publish dates last.
    let all = store.list(&ctx, &PostListParams::new()).await.unwrap();
    let urls: Vec<&str> = all.iter().map(|p| p.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://ex.com/r-new",
            "https://ex.com/r-old",
            "https://ex.com/r-undated"
        ]
    );

    // Case-insensitive substring search over title and description.
    let by_title = store
        .list(
            &ctx,
            &PostListParams {
                search: Some("rust".into()),
                ..PostListParams::new()
            },
        )
        .await
        .unwrap();
    assert_eq!(by_title.len(), 1);
    assert_eq!(by_title[0].url, "https://ex.com/r-old");

    let by_description = store
        .list(
            &ctx,
            &PostListParams {
                search: Some("OPENAI".into()),
                ..PostListParams::new()
            },
        )
        .await
        .unwrap();
    assert_eq!(by_description.len(), 1);

    let by_category = store
        .list(
            &ctx,
            &PostListParams {
                category: Some("technology".into()),
                ..PostListParams::new()
            },
        )
        .await
        .unwrap();
    assert_eq!(by_category.len(), 2);

    let by_source = store
        .list(
            &ctx,
            &PostListParams {
                source: Some("OtherWire".into()),
                ..PostListParams::new()
            },
        )
        .await
        .unwrap();
    assert_eq!(by_source.len(), 1);
    assert_eq!(by_source[0].url, "https://ex.com/r-undated");
}

#[tokio::test]
#[ignore = "requires PostgreSQL (TEST_DATABASE_URL)"]
async fn search_wildcards_match_literally() {
    let _guard = DB_LOCK.lock().await;
    let (_pool, _cache, store) = setup().await;
    let ctx = CancellationToken::new();

    store
        .create(&ctx, &params("https://ex.com/w1", "50% off sale"))
        .await
        .unwrap();
    store
        .create(&ctx, &params("https://ex.com/w2", "50x off sale"))
        .await
        .unwrap();

    let hits = store
        .list(
            &ctx,
            &PostListParams {
                search: Some("50%".into()),
                ..PostListParams::new()
            },
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].url, "https://ex.com/w1");
}

#[tokio::test]
#[ignore = "requires PostgreSQL (TEST_DATABASE_URL)"]
async fn counts_and_pagination_metadata() {
    let _guard = DB_LOCK.lock().await;
    let (_pool, _cache, store) = setup().await;
    let ctx = CancellationToken::new();

    for i in 0..3 {
        let mut p = params(&format!("https://ex.com/c{i}"), &format!("Count {i}"));
        if i < 2 {
            p.category = Some("science".into());
        }
        store.create(&ctx, &p).await.unwrap();
    }

    assert_eq!(store.count(&ctx).await.unwrap(), 3);
    // Cached count is reused, then invalidated by the next create.
    assert_eq!(store.count(&ctx).await.unwrap(), 3);
    assert_eq!(store.count_by_category(&ctx, "science").await.unwrap(), 2);

    store
        .create(&ctx, &params("https://ex.com/c-extra", "Extra"))
        .await
        .unwrap();
    assert_eq!(store.count(&ctx).await.unwrap(), 4);

    let page = store
        .list_page(
            &ctx,
            &PostListParams {
                page: 1,
                limit: 3,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.posts.len(), 3);
    assert_eq!(page.pagination.total, 4);
    assert_eq!(page.pagination.total_pages, 2);
    assert!(page.pagination.has_next);
    assert!(!page.pagination.has_prev);

    let filtered = store
        .list_page(
            &ctx,
            &PostListParams {
                category: Some("science".into()),
                ..PostListParams::new()
            },
        )
        .await
        .unwrap();
    assert_eq!(filtered.pagination.total, 2);
}

#[tokio::test]
#[ignore = "requires PostgreSQL (TEST_DATABASE_URL)"]
async fn validation_rejects_bad_input() {
    let _guard = DB_LOCK.lock().await;
    let (_pool, _cache, store) = setup().await;
    let ctx = CancellationToken::new();

    let mut no_title = params("https://ex.com/v1", "ok");
    no_title.title = String::new();
    assert!(matches!(
        store.create(&ctx, &no_title).await.unwrap_err(),
        Error::Validation(_)
    ));

    let mut bad_image = params("https://ex.com/v2", "ok");
    bad_image.image_url = Some("not a url".into());
    assert!(matches!(
        store.create(&ctx, &bad_image).await.unwrap_err(),
        Error::Validation(_)
    ));
}

#[tokio::test]
#[ignore = "requires PostgreSQL (TEST_DATABASE_URL)"]
async fn cancelled_token_short_circuits() {
    let _guard = DB_LOCK.lock().await;
    let (_pool, _cache, store) = setup().await;

    let ctx = CancellationToken::new();
    ctx.cancel();
    let err = store
        .create(&ctx, &params("https://ex.com/x", "never"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}
