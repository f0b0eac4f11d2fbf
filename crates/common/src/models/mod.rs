//! Canonical article model
//!
//! Every source adapter normalizes its raw payload into [`Article`]
//! before anything else touches it; raw shapes never cross this
//! boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Topical section. Closed enumeration fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    World,
    Us,
    Politics,
    Business,
    Technology,
    Health,
    Sports,
    Entertainment,
    Finance,
}

impl Section {
    /// All sections, in rotation order
    pub const ALL: [Section; 9] = [
        Section::World,
        Section::Us,
        Section::Politics,
        Section::Business,
        Section::Technology,
        Section::Health,
        Section::Sports,
        Section::Entertainment,
        Section::Finance,
    ];

    /// Sections whose jobs get a priority boost in the queue
    pub const PREMIUM: [Section; 4] = [
        Section::Politics,
        Section::Us,
        Section::World,
        Section::Business,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::World => "world",
            Section::Us => "us",
            Section::Politics => "politics",
            Section::Business => "business",
            Section::Technology => "technology",
            Section::Health => "health",
            Section::Sports => "sports",
            Section::Entertainment => "entertainment",
            Section::Finance => "finance",
        }
    }

    pub fn is_premium(&self) -> bool {
        Self::PREMIUM.contains(self)
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "world" => Ok(Section::World),
            "us" | "u.s." => Ok(Section::Us),
            "politics" => Ok(Section::Politics),
            "business" => Ok(Section::Business),
            "technology" | "tech" => Ok(Section::Technology),
            "health" => Ok(Section::Health),
            "sports" => Ok(Section::Sports),
            "entertainment" | "arts" => Ok(Section::Entertainment),
            "finance" => Ok(Section::Finance),
            other => Err(format!("unknown section: {}", other)),
        }
    }
}

/// Who produced the attached commentary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentarySource {
    Ai,
    Fallback,
}

impl CommentarySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommentarySource::Ai => "ai",
            CommentarySource::Fallback => "fallback",
        }
    }
}

/// Canonical article shape shared by every source adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    /// Stable external identifier. The `url` is the deduplication key.
    pub id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub url: String,
    pub published_date: Option<DateTime<Utc>>,
    pub byline: Option<String>,
    pub image_url: Option<String>,
    pub source: String,
    pub section: Section,
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    /// Presence of a non-empty value means "enriched"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_commentary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commentary_generated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commentary_source: Option<CommentarySource>,
}

impl Article {
    /// An article is complete iff its commentary is non-empty.
    /// An empty string is treated as absent.
    pub fn is_complete(&self) -> bool {
        self.ai_commentary
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false)
    }

    /// Ephemeral ids bypass store writes and never enter section lists
    pub fn is_ephemeral(&self) -> bool {
        self.id.starts_with(crate::EPHEMERAL_ID_PREFIX)
    }

    /// Attach commentary, stamping generation time and source
    pub fn with_commentary(
        mut self,
        commentary: String,
        source: CommentarySource,
        at: DateTime<Utc>,
    ) -> Self {
        self.ai_commentary = Some(commentary);
        self.commentary_generated_at = Some(at);
        self.commentary_source = Some(source);
        self
    }
}

/// Snapshot written to `article:{id}` by the enrichment worker.
/// Carries the cache stamp alongside the article fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleSnapshot {
    #[serde(flatten)]
    pub article: Article,
    #[serde(rename = "_commentarySource")]
    pub commentary_source: CommentarySource,
    #[serde(rename = "_cachedAt")]
    pub cached_at: DateTime<Utc>,
}

impl ArticleSnapshot {
    pub fn new(article: Article, source: CommentarySource, cached_at: DateTime<Utc>) -> Self {
        Self {
            article,
            commentary_source: source,
            cached_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str) -> Article {
        Article {
            id: id.to_string(),
            title: "Markets rally".into(),
            abstract_text: "Stocks climbed on earnings.".into(),
            url: format!("https://example.com/{}", id),
            published_date: None,
            byline: None,
            image_url: None,
            source: "top-stories".into(),
            section: Section::Business,
            keywords: BTreeSet::new(),
            ai_commentary: None,
            commentary_generated_at: None,
            commentary_source: None,
        }
    }

    #[test]
    fn empty_commentary_is_incomplete() {
        let mut a = sample("a1");
        assert!(!a.is_complete());
        a.ai_commentary = Some(String::new());
        assert!(!a.is_complete());
        a.ai_commentary = Some("   ".into());
        assert!(!a.is_complete());
        a.ai_commentary = Some("Key Points: ...".into());
        assert!(a.is_complete());
    }

    #[test]
    fn ephemeral_prefix_detected() {
        assert!(sample("temp-123").is_ephemeral());
        assert!(!sample("nyt-123").is_ephemeral());
    }

    #[test]
    fn section_round_trip() {
        for s in Section::ALL {
            assert_eq!(s.as_str().parse::<Section>().unwrap(), s);
        }
        assert!("gardening".parse::<Section>().is_err());
    }

    #[test]
    fn snapshot_serializes_stamps() {
        let a = sample("a2").with_commentary("text".into(), CommentarySource::Ai, Utc::now());
        let snap = ArticleSnapshot::new(a, CommentarySource::Ai, Utc::now());
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["_commentarySource"], "ai");
        assert!(json.get("_cachedAt").is_some());
        assert_eq!(json["section"], "business");
    }
}
