//! Wire types for the news provider's JSON envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::CreatePost;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArticleSource {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub source: ArticleSource,
    #[serde(default)]
    pub author: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub url: String,
    #[serde(rename = "urlToImage", default)]
    pub url_to_image: Option<String>,
    #[serde(rename = "publishedAt", default)]
    pub published_at: String,
    #[serde(default)]
    pub content: Option<String>,
}

/// Success envelope returned by both provider endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewsEnvelope {
    pub status: String,
    #[serde(rename = "totalResults", default)]
    pub total_results: i64,
    #[serde(default)]
    pub articles: Vec<NewsArticle>,
}

/// Error body the provider attaches to 4xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderErrorBody {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl NewsArticle {
    /// Project the article into create parameters.
    ///
    /// Returns `None` when `source.name` is empty; such articles are skipped
    /// by the aggregator. An unparseable `publishedAt` drops the timestamp
    /// rather than rejecting the article.
    pub fn to_create_post(&self) -> Option<CreatePost> {
        let source = self.source.name.trim();
        if source.is_empty() {
            return None;
        }
        let published_at = DateTime::parse_from_rfc3339(&self.published_at)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
        Some(CreatePost {
            title: self.title.clone(),
            description: self.description.clone(),
            content: self.content.clone(),
            url: self.url.clone(),
            source: source.to_string(),
            category: None,
            image_url: self.url_to_image.clone(),
            published_at,
        })
    }
}
