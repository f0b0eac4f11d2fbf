//! Headline-feed API adapter (publisher B)
//!
//! Multi-credential, request-count quota per key. Field map:
//! article_id -> id, title -> title, description -> abstract,
//! link -> url, pubDate -> published_date, creator -> byline,
//! image_url -> image_url, keywords -> keywords.

use crate::sources::top_stories::classify_publisher_failure;
use crate::sources::PublisherSource;
use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone, Utc};
use newsforge_common::balancer::{Dispatched, KeyPool};
use newsforge_common::errors::{AppError, Result};
use newsforge_common::models::{Article, Section};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

pub const SOURCE_NAME: &str = "headline-feed";

#[derive(Debug, Deserialize)]
struct HeadlineFeedResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    results: Vec<RawHeadline>,
}

#[derive(Debug, Deserialize)]
struct RawHeadline {
    #[serde(default)]
    article_id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    link: String,
    #[serde(rename = "pubDate", default)]
    pub_date: Option<String>,
    #[serde(default)]
    creator: Option<Vec<String>>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    keywords: Option<Vec<String>>,
}

pub struct HeadlineFeedSource {
    client: reqwest::Client,
    base_url: String,
    pool: Arc<KeyPool>,
}

impl HeadlineFeedSource {
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

    /// The upstream's category for a section
    fn api_category(section: Section) -> &'static str {
        match section {
            Section::Finance => "business",
            Section::Us | Section::World => "world",
            other => other.as_str(),
        }
    }

    fn normalize(raw: RawHeadline, section: Section) -> Option<Article> {
        if raw.link.trim().is_empty() || raw.title.trim().is_empty() {
            return None;
        }

        let id = raw
            .article_id
            .filter(|i| !i.trim().is_empty())
            .unwrap_or_else(|| raw.link.clone());

        // The feed reports naive UTC timestamps ("2025-06-01 09:30:00")
        let published_date = raw
            .pub_date
            .as_deref()
            .and_then(|d| NaiveDateTime::parse_from_str(d, "%Y-%m-%d %H:%M:%S").ok())
            .map(|d| Utc.from_utc_datetime(&d));

        let byline = raw
            .creator
            .and_then(|names| {
                let joined = names.join(", ");
                (!joined.is_empty()).then_some(joined)
            });

        Some(Article {
            id,
            title: raw.title,
            abstract_text: raw.description.unwrap_or_default(),
            url: raw.link,
            published_date,
            byline,
            image_url: raw.image_url.filter(|u| !u.is_empty()),
            source: SOURCE_NAME.to_string(),
            section,
            keywords: raw
                .keywords
                .unwrap_or_default()
                .into_iter()
                .collect::<BTreeSet<String>>(),
            ai_commentary: None,
            commentary_generated_at: None,
            commentary_source: None,
        })
    }
}

#[async_trait]
impl PublisherSource for HeadlineFeedSource {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    #[instrument(skip(self), fields(section = %section))]
    async fn fetch_section(&self, section: Section) -> Result<Vec<Article>> {
        let url = format!("{}/latest", self.base_url);
        let category = Self::api_category(section);
        let client = self.client.clone();

        let raw: Vec<RawHeadline> = self
            .pool
            .dispatch(|cred| {
                let client = client.clone();
                let url = url.clone();
                async move {
                    let response = client
                        .get(&url)
                        .query(&[
                            ("apikey", cred.secret.as_str()),
                            ("category", category),
                            ("language", "en"),
                        ])
                        .send()
                        .await?;

                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(classify_publisher_failure(cred.id, status, &body));
                    }

                    let parsed: HeadlineFeedResponse =
                        response.json().await.map_err(|e| AppError::Upstream {
                            message: format!("failed to parse headline-feed response: {}", e),
                        })?;

                    if parsed.status != "success" {
                        return Err(AppError::Upstream {
                            message: format!("headline feed reported status '{}'", parsed.status),
                        });
                    }

                    Ok(Dispatched {
                        value: parsed.results,
                        units: 1,
                    })
                }
            })
            .await?;

        let articles: Vec<Article> = raw
            .into_iter()
            .filter_map(|item| Self::normalize(item, section))
            .collect();

        debug!(count = articles.len(), "headline-feed batch normalized");
        Ok(articles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "status": "success",
        "totalResults": 2,
        "results": [
            {
                "article_id": "hf-991",
                "title": "Markets close mixed",
                "description": "Indexes diverged after the rate decision.",
                "link": "https://example.com/markets-close",
                "pubDate": "2025-06-01 21:05:00",
                "creator": ["Desk One", "Desk Two"],
                "image_url": "https://example.com/img/markets.jpg",
                "keywords": ["rates", "equities"]
            },
            {
                "title": "Missing link is dropped",
                "description": "No url here.",
                "link": ""
            }
        ]
    }"#;

    #[test]
    fn normalizes_fixture_batch() {
        let parsed: HeadlineFeedResponse = serde_json::from_str(FIXTURE).unwrap();
        assert_eq!(parsed.status, "success");

        let articles: Vec<Article> = parsed
            .results
            .into_iter()
            .filter_map(|r| HeadlineFeedSource::normalize(r, Section::Finance))
            .collect();

        assert_eq!(articles.len(), 1);
        let a = &articles[0];
        assert_eq!(a.id, "hf-991");
        assert_eq!(a.byline.as_deref(), Some("Desk One, Desk Two"));
        assert_eq!(a.section, Section::Finance);
        assert_eq!(a.keywords.len(), 2);
        let published = a.published_date.expect("date parsed");
        assert_eq!(published.format("%Y-%m-%d %H:%M").to_string(), "2025-06-01 21:05");
    }

    #[test]
    fn finance_maps_to_business_category() {
        assert_eq!(HeadlineFeedSource::api_category(Section::Finance), "business");
        assert_eq!(HeadlineFeedSource::api_category(Section::Sports), "sports");
    }
}
