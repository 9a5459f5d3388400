//! Typed client for the external news provider.
//!
//! No retries and no circuit breaker here: callers decide how to react to
//! the classified errors.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::NewsApiConfig;
use crate::error::{ensure_live, Error, Result};

pub mod model;

pub use model::{ArticleSource, NewsArticle, NewsEnvelope};

use model::ProviderErrorBody;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "newsfeed/0.1";

/// Optional request parameters shared by both provider endpoints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewsQuery {
    pub query: Option<String>,
    pub category: Option<String>,
    pub country: Option<String>,
    pub language: Option<String>,
    pub page_size: Option<u32>,
    pub page: Option<u32>,
    pub sources: Vec<String>,
}

#[async_trait]
pub trait NewsApi: Send + Sync {
    /// Query the provider's top-headlines endpoint.
    async fn top_headlines(
        &self,
        ctx: &CancellationToken,
        params: &NewsQuery,
    ) -> Result<NewsEnvelope>;

    /// Query the provider's everything endpoint. Sorted by publish time,
    /// bounded to the last seven days.
    async fn everything(&self, ctx: &CancellationToken, params: &NewsQuery)
        -> Result<NewsEnvelope>;

    /// Top headlines for one category (US, English).
    async fn by_category(
        &self,
        ctx: &CancellationToken,
        category: &str,
        page_size: u32,
    ) -> Result<NewsEnvelope>;

    /// Everything from a batch of sources (English).
    async fn by_sources(
        &self,
        ctx: &CancellationToken,
        sources: &[String],
        page_size: u32,
    ) -> Result<NewsEnvelope>;
}

pub struct NewsApiClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl NewsApiClient {
    pub fn new(cfg: &NewsApiConfig) -> Result<Self> {
        // Url::join treats the last path segment as a file unless the base
        // ends with a slash.
        let mut base = cfg.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| Error::validation(format!("news API base URL: {e}")))?;
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            base_url,
            api_key: cfg.api_key.clone(),
        })
    }

    fn top_headlines_url(&self, params: &NewsQuery) -> Result<Url> {
        let mut url = self
            .base_url
            .join("top-headlines")
            .map_err(|e| Error::validation(format!("news API base URL: {e}")))?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("apiKey", &self.api_key);
            if let Some(query) = &params.query {
                q.append_pair("q", query);
            }
            if let Some(category) = &params.category {
                q.append_pair("category", category);
            }
            if let Some(country) = &params.country {
                q.append_pair("country", country);
            }
            if let Some(language) = &params.language {
                q.append_pair("language", language);
            }
            if let Some(page_size) = params.page_size {
                q.append_pair("pageSize", &page_size.to_string());
            }
            if let Some(page) = params.page {
                q.append_pair("page", &page.to_string());
            }
        }
        Ok(url)
    }

    fn everything_url(&self, params: &NewsQuery) -> Result<Url> {
        let mut url = self
            .base_url
            .join("everything")
            .map_err(|e| Error::validation(format!("news API base URL: {e}")))?;
        let from = (Utc::now() - ChronoDuration::days(7)).date_naive();
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("apiKey", &self.api_key);
            if let Some(page_size) = params.page_size {
                q.append_pair("pageSize", &page_size.to_string());
            }
            if !params.sources.is_empty() {
                q.append_pair("sources", &params.sources.join(","));
            }
            if let Some(language) = &params.language {
                q.append_pair("language", language);
            }
            if let Some(page) = params.page {
                q.append_pair("page", &page.to_string());
            }
            q.append_pair("sortBy", "publishedAt");
            q.append_pair("from", &from.format("%Y-%m-%d").to_string());
        }
        Ok(url)
    }

    async fn fetch(&self, ctx: &CancellationToken, url: Url) -> Result<NewsEnvelope> {
        ensure_live(ctx)?;
        let request = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send();
        let response = tokio::select! {
            _ = ctx.cancelled() => return Err(Error::Cancelled),
            res = request => res?,
        };
        let status = response.status();
        let body = tokio::select! {
            _ = ctx.cancelled() => return Err(Error::Cancelled),
            body = response.bytes() => body?,
        };
        decode_envelope(status, &body)
    }
}

/// Map a provider response to the decoded envelope or a classified error.
fn decode_envelope(status: StatusCode, body: &[u8]) -> Result<NewsEnvelope> {
    if status != StatusCode::OK {
        return Err(classify_error(status, body));
    }
    let envelope: NewsEnvelope = serde_json::from_slice(body)
        .map_err(|e| Error::MalformedResponse(e.to_string()))?;
    if envelope.status != "ok" {
        return Err(Error::ProviderStatus(envelope.status));
    }
    Ok(envelope)
}

fn classify_error(status: StatusCode, body: &[u8]) -> Error {
    match status {
        StatusCode::UNAUTHORIZED => Error::Auth,
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited,
        StatusCode::BAD_REQUEST => match serde_json::from_slice::<ProviderErrorBody>(body) {
            Ok(err) => Error::BadRequest {
                code: err.code,
                message: err.message,
            },
            Err(_) => Error::BadRequest {
                code: "badRequest".into(),
                message: "bad request".into(),
            },
        },
        StatusCode::INTERNAL_SERVER_ERROR => Error::ProviderUnavailable,
        other => Error::UnexpectedStatus(other.as_u16()),
    }
}

#[async_trait]
impl NewsApi for NewsApiClient {
    async fn top_headlines(
        &self,
        ctx: &CancellationToken,
        params: &NewsQuery,
    ) -> Result<NewsEnvelope> {
        let url = self.top_headlines_url(params)?;
        let envelope = self.fetch(ctx, url).await?;
        debug!(
            articles = envelope.articles.len(),
            total_results = envelope.total_results,
            "fetched top headlines"
        );
        Ok(envelope)
    }

    async fn everything(
        &self,
        ctx: &CancellationToken,
        params: &NewsQuery,
    ) -> Result<NewsEnvelope> {
        let url = self.everything_url(params)?;
        let envelope = self.fetch(ctx, url).await?;
        debug!(
            articles = envelope.articles.len(),
            total_results = envelope.total_results,
            "fetched everything"
        );
        Ok(envelope)
    }

    async fn by_category(
        &self,
        ctx: &CancellationToken,
        category: &str,
        page_size: u32,
    ) -> Result<NewsEnvelope> {
        let params = NewsQuery {
            category: Some(category.to_string()),
            country: Some("us".into()),
            language: Some("en".into()),
            page_size: Some(page_size),
            ..Default::default()
        };
        self.top_headlines(ctx, &params).await
    }

    async fn by_sources(
        &self,
        ctx: &CancellationToken,
        sources: &[String],
        page_size: u32,
    ) -> Result<NewsEnvelope> {
        let params = NewsQuery {
            sources: sources.to_vec(),
            language: Some("en".into()),
            page_size: Some(page_size),
            ..Default::default()
        };
        self.everything(ctx, &params).await
    }
}
