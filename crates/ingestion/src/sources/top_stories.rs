//! Top-stories API adapter (publisher A)
//!
//! Single-credential, request-count quota. The raw story shape maps
//! onto the canonical article as:
//! uri -> id, title -> title, abstract -> abstract, url -> url,
//! published_date -> published_date, byline -> byline,
//! multimedia[0].url -> image_url, des_facet -> keywords.

use crate::sources::PublisherSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use newsforge_common::balancer::{Dispatched, KeyPool};
use newsforge_common::errors::{AppError, Result};
use newsforge_common::models::{Article, Section};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

pub const SOURCE_NAME: &str = "top-stories";

#[derive(Debug, Deserialize)]
struct TopStoriesResponse {
    #[serde(default)]
    results: Vec<RawStory>,
}

#[derive(Debug, Deserialize)]
struct RawStory {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(rename = "abstract", default)]
    abstract_text: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    published_date: Option<String>,
    #[serde(default)]
    byline: Option<String>,
    #[serde(default)]
    des_facet: Vec<String>,
    #[serde(default)]
    multimedia: Vec<RawMultimedia>,
}

#[derive(Debug, Deserialize)]
struct RawMultimedia {
    #[serde(default)]
    url: String,
}

pub struct TopStoriesSource {
    client: reqwest::Client,
    base_url: String,
    pool: Arc<KeyPool>,
}

impl TopStoriesSource {
    pub fn new(base_url: String, pool: Arc<KeyPool>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to create HTTP client");
        Self {
            client,
            base_url,
            pool,
        }
    }

    /// The upstream's path slug for a section
    fn api_slug(section: Section) -> &'static str {
        match section {
            Section::Entertainment => "arts",
            other => other.as_str(),
        }
    }

    fn normalize(raw: RawStory, section: Section) -> Option<Article> {
        if raw.url.trim().is_empty() || raw.title.trim().is_empty() {
            return None;
        }

        let id = raw
            .uri
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| raw.url.clone());

        let published_date = raw
            .published_date
            .as_deref()
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.with_timezone(&Utc));

        let image_url = raw
            .multimedia
            .first()
            .map(|m| m.url.clone())
            .filter(|u| !u.is_empty());

        Some(Article {
            id,
            title: raw.title,
            abstract_text: raw.abstract_text,
            url: raw.url,
            published_date,
            byline: raw.byline.filter(|b| !b.is_empty()),
            image_url,
            source: SOURCE_NAME.to_string(),
            section,
            keywords: raw.des_facet.into_iter().collect::<BTreeSet<String>>(),
            ai_commentary: None,
            commentary_generated_at: None,
            commentary_source: None,
        })
    }
}

#[async_trait]
impl PublisherSource for TopStoriesSource {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    #[instrument(skip(self), fields(section = %section))]
    async fn fetch_section(&self, section: Section) -> Result<Vec<Article>> {
        let url = format!("{}/{}.json", self.base_url, Self::api_slug(section));
        let client = self.client.clone();

        let raw: Vec<RawStory> = self
            .pool
            .dispatch(|cred| {
                let client = client.clone();
                let url = url.clone();
                async move {
                    let response = client
                        .get(&url)
                        .query(&[("api-key", cred.secret.as_str())])
                        .send()
                        .await?;

                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(classify_publisher_failure(cred.id, status, &body));
                    }

                    let parsed: TopStoriesResponse =
                        response.json().await.map_err(|e| AppError::Upstream {
                            message: format!("failed to parse top-stories response: {}", e),
                        })?;

                    Ok(Dispatched {
                        value: parsed.results,
                        units: 1,
                    })
                }
            })
            .await?;

        let articles: Vec<Article> = raw
            .into_iter()
            .filter_map(|story| Self::normalize(story, section))
            .collect();

        debug!(count = articles.len(), "top-stories batch normalized");
        Ok(articles)
    }
}

/// Shared status classification for publisher upstreams
pub(crate) fn classify_publisher_failure(
    credential: usize,
    status: reqwest::StatusCode,
    body: &str,
) -> AppError {
    let lowered = body.to_ascii_lowercase();
    if status.as_u16() == 429 || lowered.contains("rate limit") || lowered.contains("limit exceeded")
    {
        AppError::RateLimited {
            credential,
            message: status.to_string(),
        }
    } else if status.as_u16() == 401 || status.as_u16() == 403 {
        AppError::AuthRejected {
            credential,
            message: status.to_string(),
        }
    } else if status.is_server_error() {
        AppError::UpstreamTransient {
            message: status.to_string(),
        }
    } else {
        AppError::Upstream {
            message: status.to_string(),
        }
    }
}
