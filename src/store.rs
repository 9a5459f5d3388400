//! Post persistence: PostgreSQL CRUD guarded by the URL uniqueness
//! invariant, with a read-through cache on point lookups and coarse list
//! cache invalidation on every mutation.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::cache::Cache;
use crate::error::{ensure_live, Error, Result};
use crate::model::{CreatePost, PageMeta, Post, PostListParams, PostPage, UpdatePost};

pub const LIST_CACHE_PATTERN: &str = "posts:list:*";
pub const COUNT_CACHE_KEY: &str = "posts:count";

pub fn post_id_key(id: i64) -> String {
    format!("post:id:{id}")
}

pub fn list_key(page: i64, limit: i64) -> String {
    format!("posts:list:{page}:{limit}")
}

#[async_trait]
pub trait PostStore: Send + Sync {
    /// Insert a new post. `Error::Duplicate` when the URL is already taken.
    async fn create(&self, ctx: &CancellationToken, params: &CreatePost) -> Result<Post>;

    /// Direct store read by URL; no cache in front.
    async fn get_by_url(&self, ctx: &CancellationToken, url: &str) -> Result<Post>;

    /// Read-through cached lookup by id.
    async fn get_by_id(&self, ctx: &CancellationToken, id: i64) -> Result<Post>;

    /// Overwrite the mutable columns; `url`, `source`, `published_at`, and
    /// `created_at` never change.
    async fn update(&self, ctx: &CancellationToken, id: i64, params: &UpdatePost) -> Result<Post>;

    async fn delete(&self, ctx: &CancellationToken, id: i64) -> Result<()>;

    /// List posts ordered by publish time descending. Only the unfiltered
    /// shape is cached.
    async fn list(&self, ctx: &CancellationToken, params: &PostListParams) -> Result<Vec<Post>>;

    async fn count(&self, ctx: &CancellationToken) -> Result<i64>;

    async fn count_by_category(&self, ctx: &CancellationToken, category: &str) -> Result<i64>;

    /// List plus pagination metadata; total honors a category filter.
    async fn list_page(
        &self,
        ctx: &CancellationToken,
        params: &PostListParams,
    ) -> Result<PostPage> {
        let params = params.clamped();
        let posts = self.list(ctx, &params).await?;
        let total = match &params.category {
            Some(category) if !category.is_empty() => {
                self.count_by_category(ctx, category).await?
            }
            _ => self.count(ctx).await?,
        };
        Ok(PostPage {
            posts,
            pagination: PageMeta::calculate(params.page, params.limit, total),
        })
    }
}

const SELECT_COLUMNS: &str = "id, title, description, content, url, source, category, image_url, \
                              published_at, created_at, updated_at";

pub struct PgPostStore {
    db: PgPool,
    cache: Arc<dyn Cache>,
    cache_ttl: Duration,
}

impl PgPostStore {
    pub fn new(db: PgPool, cache: Arc<dyn Cache>, cache_ttl: Duration) -> Self {
        Self {
            db,
            cache,
            cache_ttl,
        }
    }

    /// Read a cached value, treating cache failures and corrupt payloads as
    /// misses. Cancellation still propagates.
    async fn cache_read<T: serde::de::DeserializeOwned>(
        &self,
        ctx: &CancellationToken,
        key: &str,
    ) -> Result<Option<T>> {
        match self.cache.get(ctx, key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    debug!(key, "cache hit");
                    Ok(Some(value))
                }
                Err(err) => {
                    warn!(key, error = %err, "corrupt cache entry; treating as miss");
                    Ok(None)
                }
            },
            Ok(None) => Ok(None),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(err) => {
                warn!(key, error = %err, "cache read failed");
                Ok(None)
            }
        }
    }

    /// Populate a cache entry; failures are logged, never surfaced.
    async fn cache_write<T: serde::Serialize>(&self, ctx: &CancellationToken, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => {
                if let Err(err) = self.cache.set(ctx, key, &raw, self.cache_ttl).await {
                    warn!(key, error = %err, "cache write failed");
                }
            }
            Err(err) => warn!(key, error = %err, "cache serialization failed"),
        }
    }

    async fn invalidate_post_cache(&self, ctx: &CancellationToken, id: i64) {
        let key = post_id_key(id);
        if let Err(err) = self.cache.delete(ctx, &key).await {
            warn!(key, error = %err, "cache invalidation failed");
        }
    }

    async fn invalidate_list_caches(&self, ctx: &CancellationToken) {
        if let Err(err) = self.cache.delete_pattern(ctx, LIST_CACHE_PATTERN).await {
            warn!(pattern = LIST_CACHE_PATTERN, error = %err, "cache invalidation failed");
        }
        if let Err(err) = self.cache.delete(ctx, COUNT_CACHE_KEY).await {
            warn!(key = COUNT_CACHE_KEY, error = %err, "cache invalidation failed");
        }
    }
}

fn map_insert_error(err: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return Error::Duplicate;
        }
    }
    Error::Database(err)
}

/// Escape LIKE wildcards so search terms match literally.
fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[async_trait]
impl PostStore for PgPostStore {
    #[instrument(skip_all)]
    async fn create(&self, ctx: &CancellationToken, params: &CreatePost) -> Result<Post> {
        ensure_live(ctx)?;
        params.validate()?;

        let query = format!(
            "INSERT INTO posts (title, description, content, url, source, category, image_url, published_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {SELECT_COLUMNS}"
        );
        let post = sqlx::query_as::<_, Post>(&query)
            .bind(&params.title)
            .bind(&params.description)
            .bind(&params.content)
            .bind(&params.url)
            .bind(&params.source)
            .bind(&params.category)
            .bind(&params.image_url)
            .bind(params.published_at)
            .fetch_one(&self.db)
            .await
            .map_err(map_insert_error)?;

        self.invalidate_list_caches(ctx).await;
        debug!(id = post.id, url = %post.url, "post created");
        Ok(post)
    }

    #[instrument(skip_all)]
    async fn get_by_url(&self, ctx: &CancellationToken, url: &str) -> Result<Post> {
        ensure_live(ctx)?;
        let query = format!("SELECT {SELECT_COLUMNS} FROM posts WHERE url = $1 LIMIT 1");
        sqlx::query_as::<_, Post>(&query)
            .bind(url)
            .fetch_optional(&self.db)
            .await?
            .ok_or(Error::NotFound)
    }

    #[instrument(skip_all)]
    async fn get_by_id(&self, ctx: &CancellationToken, id: i64) -> Result<Post> {
        ensure_live(ctx)?;
        let key = post_id_key(id);
        if let Some(post) = self.cache_read::<Post>(ctx, &key).await? {
            return Ok(post);
        }

        let query = format!("SELECT {SELECT_COLUMNS} FROM posts WHERE id = $1 LIMIT 1");
        let post = sqlx::query_as::<_, Post>(&query)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(Error::NotFound)?;

        self.cache_write(ctx, &key, &post).await;
        Ok(post)
    }

    #[instrument(skip_all)]
    async fn update(&self, ctx: &CancellationToken, id: i64, params: &UpdatePost) -> Result<Post> {
        ensure_live(ctx)?;
        params.validate()?;

        let query = format!(
            "UPDATE posts \
             SET title = $2, description = $3, content = $4, category = $5, image_url = $6, \
                 updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {SELECT_COLUMNS}"
        );
        let post = sqlx::query_as::<_, Post>(&query)
            .bind(id)
            .bind(&params.title)
            .bind(&params.description)
            .bind(&params.content)
            .bind(&params.category)
            .bind(&params.image_url)
            .fetch_optional(&self.db)
            .await?
            .ok_or(Error::NotFound)?;

        self.invalidate_post_cache(ctx, id).await;
        self.invalidate_list_caches(ctx).await;
        debug!(id, "post updated");
        Ok(post)
    }

    #[instrument(skip_all)]
    async fn delete(&self, ctx: &CancellationToken, id: i64) -> Result<()> {
        ensure_live(ctx)?;
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }

        self.invalidate_post_cache(ctx, id).await;
        self.invalidate_list_caches(ctx).await;
        debug!(id, "post deleted");
        Ok(())
    }

    #[instrument(skip_all)]
    async fn list(&self, ctx: &CancellationToken, params: &PostListParams) -> Result<Vec<Post>> {
        ensure_live(ctx)?;
        let params = params.clamped();
        let offset = (params.page - 1) * params.limit;

        if let Some(search) = params.search.as_deref().filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", escape_like(search));
            let query = format!(
                "SELECT {SELECT_COLUMNS} FROM posts \
                 WHERE title ILIKE $1 OR description ILIKE $1 \
                 ORDER BY published_at DESC NULLS LAST, id DESC \
                 LIMIT $2 OFFSET $3"
            );
            let posts = sqlx::query_as::<_, Post>(&query)
                .bind(&pattern)
                .bind(params.limit)
                .bind(offset)
                .fetch_all(&self.db)
                .await?;
            return Ok(posts);
        }

        if let Some(category) = params.category.as_deref().filter(|c| !c.is_empty()) {
            let query = format!(
                "SELECT {SELECT_COLUMNS} FROM posts WHERE category = $1 \
                 ORDER BY published_at DESC NULLS LAST, id DESC \
                 LIMIT $2 OFFSET $3"
            );
            let posts = sqlx::query_as::<_, Post>(&query)
                .bind(category)
                .bind(params.limit)
                .bind(offset)
                .fetch_all(&self.db)
                .await?;
            return Ok(posts);
        }

        if let Some(source) = params.source.as_deref().filter(|s| !s.is_empty()) {
            let query = format!(
                "SELECT {SELECT_COLUMNS} FROM posts WHERE source = $1 \
                 ORDER BY published_at DESC NULLS LAST, id DESC \
                 LIMIT $2 OFFSET $3"
            );
            let posts = sqlx::query_as::<_, Post>(&query)
                .bind(source)
                .bind(params.limit)
                .bind(offset)
                .fetch_all(&self.db)
                .await?;
            return Ok(posts);
        }

        // Unfiltered: the only list shape that is cached.
        let key = list_key(params.page, params.limit);
        if let Some(posts) = self.cache_read::<Vec<Post>>(ctx, &key).await? {
            return Ok(posts);
        }

        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM posts \
             ORDER BY published_at DESC NULLS LAST, id DESC \
             LIMIT $1 OFFSET $2"
        );
        let posts = sqlx::query_as::<_, Post>(&query)
            .bind(params.limit)
            .bind(offset)
            .fetch_all(&self.db)
            .await?;

        self.cache_write(ctx, &key, &posts).await;
        Ok(posts)
    }

    #[instrument(skip_all)]
    async fn count(&self, ctx: &CancellationToken) -> Result<i64> {
        ensure_live(ctx)?;
        if let Some(total) = self.cache_read::<i64>(ctx, COUNT_CACHE_KEY).await? {
            return Ok(total);
        }

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts")
            .fetch_one(&self.db)
            .await?;
        self.cache_write(ctx, COUNT_CACHE_KEY, &total).await;
        Ok(total)
    }

    #[instrument(skip_all)]
    async fn count_by_category(&self, ctx: &CancellationToken, category: &str) -> Result<i64> {
        ensure_live(ctx)?;
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts WHERE category = $1")
            .bind(category)
            .fetch_one(&self.db)
            .await?;
        Ok(total)
    }
}
