//! Article entity
//!
//! Persisted shape of the canonical article. `url` carries a unique
//! index (the deduplication key); secondary indexes cover
//! (section, published_date desc) and (commentary-present, section).

use crate::models::{Article, CommentarySource, Section};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "articles")]
pub struct Model {
    /// Stable external identifier
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub id: String,

    #[sea_orm(column_type = "Text", unique)]
    pub url: String,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text")]
    pub abstract_text: String,

    pub published_date: Option<DateTimeWithTimeZone>,

    #[sea_orm(column_type = "Text", nullable)]
    pub byline: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub image_url: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub source: String,

    #[sea_orm(column_type = "Text")]
    pub section: String,

    /// Keyword set as JSONB
    #[sea_orm(column_type = "JsonBinary")]
    pub keywords: Json,

    #[sea_orm(column_type = "Text", nullable)]
    pub ai_commentary: Option<String>,

    pub commentary_generated_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(column_type = "Text", nullable)]
    pub commentary_source: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Convert the persisted row back into the canonical shape.
    /// Rows with an unknown section are rejected rather than guessed.
    pub fn into_article(self) -> crate::errors::Result<Article> {
        let section = Section::from_str(&self.section).map_err(|e| {
            crate::errors::AppError::Internal {
                message: format!("stored article {}: {}", self.id, e),
            }
        })?;

        let keywords: BTreeSet<String> =
            serde_json::from_value(self.keywords).unwrap_or_default();

        let commentary_source = match self.commentary_source.as_deref() {
            Some("ai") => Some(CommentarySource::Ai),
            Some("fallback") => Some(CommentarySource::Fallback),
            _ => None,
        };

        Ok(Article {
            id: self.id,
            title: self.title,
            abstract_text: self.abstract_text,
            url: self.url,
            published_date: self.published_date.map(|d| d.to_utc()),
            byline: self.byline,
            image_url: self.image_url,
            source: self.source,
            section,
            keywords,
            ai_commentary: self.ai_commentary,
            commentary_generated_at: self.commentary_generated_at.map(|d| d.to_utc()),
            commentary_source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn row_round_trips_to_article() {
        let now = Utc::now();
        let row = Model {
            id: "nyt-1".into(),
            url: "https://example.com/1".into(),
            title: "Title".into(),
            abstract_text: "Abstract".into(),
            published_date: Some(now.into()),
            byline: Some("By Someone".into()),
            image_url: None,
            source: "top-stories".into(),
            section: "world".into(),
            keywords: serde_json::json!(["economy", "trade"]),
            ai_commentary: Some("Key Points: ...".into()),
            commentary_generated_at: Some(now.into()),
            commentary_source: Some("ai".into()),
            created_at: now.into(),
            updated_at: now.into(),
        };

        let article = row.into_article().unwrap();
        assert_eq!(article.section, Section::World);
        assert_eq!(article.keywords.len(), 2);
        assert_eq!(article.commentary_source, Some(CommentarySource::Ai));
        assert!(article.is_complete());
    }

    #[test]
    fn unknown_section_is_rejected() {
        let now = Utc::now();
        let row = Model {
            id: "x".into(),
            url: "https://example.com/x".into(),
            title: "t".into(),
            abstract_text: "a".into(),
            published_date: None,
            byline: None,
            image_url: None,
            source: "s".into(),
            section: "gardening".into(),
            keywords: serde_json::json!([]),
            ai_commentary: None,
            commentary_generated_at: None,
            commentary_source: None,
            created_at: now.into(),
            updated_at: now.into(),
        };
        assert!(row.into_article().is_err());
    }
}
