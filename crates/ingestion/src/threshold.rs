//! Threshold gate
//!
//! Counts enriched articles per section in the store and opens the
//! cache-admission gate once every section meets the minimum. The
//! gate only withholds cache publication; store writes and direct
//! store reads never consult it.

use metrics::gauge;
use newsforge_common::db::ArticleStore;
use newsforge_common::errors::Result;
use newsforge_common::models::Section;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct SectionThreshold {
    pub section: Section,
    pub count: u64,
    pub met: bool,
}

/// Per-section counts and the overall flag, for the observability
/// surface
#[derive(Debug, Clone, Serialize)]
pub struct ThresholdStatus {
    pub sections: Vec<SectionThreshold>,
    pub threshold: u64,
    pub all_met: bool,
}

pub struct ThresholdGate {
    store: Arc<dyn ArticleStore>,
    sections: Vec<Section>,
    threshold: u64,
    open: AtomicBool,
    last: RwLock<Option<ThresholdStatus>>,
}

impl ThresholdGate {
    pub fn new(store: Arc<dyn ArticleStore>, sections: Vec<Section>, threshold: u64) -> Self {
        Self {
            store,
            sections,
            threshold,
            open: AtomicBool::new(false),
            last: RwLock::new(None),
        }
    }

    /// Recount enriched articles per section and update the gate.
    /// Returns the fresh status and whether this check opened the gate.
    pub async fn check_threshold(&self) -> Result<(ThresholdStatus, bool)> {
        let counts = self.store.enriched_counts_by_section().await?;

        let sections: Vec<SectionThreshold> = self
            .sections
            .iter()
            .map(|&section| {
                let count = counts.get(&section).copied().unwrap_or(0);
                gauge!(
                    "newsforge_section_enriched_count",
                    "section" => section.as_str()
                )
                .set(count as f64);
                SectionThreshold {
                    section,
                    count,
                    met: count >= self.threshold,
                }
            })
            .collect();

        let all_met = sections.iter().all(|s| s.met);
        let status = ThresholdStatus {
            sections,
            threshold: self.threshold,
            all_met,
        };

        let was_open = self.open.swap(all_met, Ordering::SeqCst);
        gauge!("newsforge_threshold_gate_open").set(if all_met { 1.0 } else { 0.0 });

        let became_open = all_met && !was_open;
        if became_open {
            info!(threshold = self.threshold, "threshold met for every section; gate open");
        } else if !all_met && was_open {
            info!("a section dropped below threshold; gate closed");
        } else {
            debug!(all_met, "threshold check");
        }

        *self.last.write().expect("threshold lock") = Some(status.clone());
        Ok((status, became_open))
    }

    /// Last computed gate state; false until the first check passes
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Last computed status, if a check has run
    pub fn status(&self) -> Option<ThresholdStatus> {
        self.last.read().expect("threshold lock").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use newsforge_common::db::MemoryArticleStore;
    use newsforge_common::models::Article;
    use std::collections::BTreeSet;

    fn enriched(id: &str, section: Section) -> Article {
        Article {
            id: id.into(),
            title: "T".into(),
            abstract_text: "A".into(),
            url: format!("https://example.com/{}", id),
            published_date: None,
            byline: None,
            image_url: None,
            source: "s".into(),
            section,
            keywords: BTreeSet::new(),
            ai_commentary: Some("Key Points: ...".into()),
            commentary_generated_at: None,
            commentary_source: None,
        }
    }

    #[tokio::test]
    async fn gate_opens_when_all_sections_meet_threshold() {
        let store = Arc::new(MemoryArticleStore::new());
        let sections = vec![Section::World, Section::Technology];
        let gate = ThresholdGate::new(store.clone(), sections, 2);

        assert!(!gate.is_open());

        for i in 0..2 {
            store
                .upsert_by_url(&enriched(&format!("w{}", i), Section::World))
                .await
                .unwrap();
        }
        let (status, became_open) = gate.check_threshold().await.unwrap();
        assert!(!status.all_met);
        assert!(!became_open);
        assert!(!gate.is_open());

        for i in 0..2 {
            store
                .upsert_by_url(&enriched(&format!("t{}", i), Section::Technology))
                .await
                .unwrap();
        }
        let (status, became_open) = gate.check_threshold().await.unwrap();
        assert!(status.all_met);
        assert!(became_open);
        assert!(gate.is_open());

        // A second check does not report a fresh transition
        let (_, became_open) = gate.check_threshold().await.unwrap();
        assert!(!became_open);
    }

    #[tokio::test]
    async fn status_reports_per_section_counts() {
        let store = Arc::new(MemoryArticleStore::new());
        store
            .upsert_by_url(&enriched("w1", Section::World))
            .await
            .unwrap();
        let gate = ThresholdGate::new(store, vec![Section::World, Section::Health], 8);

        let (status, _) = gate.check_threshold().await.unwrap();
        let world = status
            .sections
            .iter()
            .find(|s| s.section == Section::World)
            .unwrap();
        assert_eq!(world.count, 1);
        assert!(!world.met);
        assert_eq!(status.threshold, 8);
        assert!(gate.status().is_some());
    }
}
