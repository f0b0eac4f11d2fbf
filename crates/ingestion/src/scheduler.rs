//! Section rotation scheduler
//!
//! Walks the fixed section list on a fixed period, driving the
//! fetcher one section per tick. Strictly serial: one loop task, one
//! section in flight. Start and stop are idempotent.

use crate::fetcher::ArticleFetcher;
use crate::threshold::ThresholdGate;
use metrics::{counter, gauge};
use newsforge_common::models::Section;
use serde::Serialize;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Rotation snapshot for the observability surface
#[derive(Debug, Clone, Serialize)]
pub struct RotationStatus {
    pub current_section: Section,
    pub index: usize,
    pub total: usize,
    pub rotations_completed: u64,
}

struct RotationState {
    index: usize,
    rotations: u64,
}

pub struct SectionRotation {
    sections: Vec<Section>,
    fetcher: Arc<ArticleFetcher>,
    gate: Arc<ThresholdGate>,
    period: Duration,
    max_per_tick: usize,
    state: Mutex<RotationState>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SectionRotation {
    pub fn new(
        sections: Vec<Section>,
        fetcher: Arc<ArticleFetcher>,
        gate: Arc<ThresholdGate>,
        period: Duration,
        max_per_tick: usize,
    ) -> Self {
        assert!(!sections.is_empty(), "rotation needs at least one section");
        Self {
            sections,
            fetcher,
            gate,
            period,
            max_per_tick,
            state: Mutex::new(RotationState {
                index: 0,
                rotations: 0,
            }),
            handle: Mutex::new(None),
        }
    }

    /// One rotation step: fetch the current section, advance the
    /// index, and report when a full pass completes
    pub async fn run_tick(&self) {
        let section = {
            let state = self.state.lock().expect("rotation lock");
            self.sections[state.index]
        };

        match self.fetcher.fetch_section(section, self.max_per_tick).await {
            Ok(processed) => {
                counter!("newsforge_rotation_ticks_total").increment(1);
                if processed > 0 {
                    info!(section = %section, processed, "rotation tick");
                }
            }
            Err(e) => {
                warn!(section = %section, error = %e, "rotation tick failed");
            }
        }

        let wrapped = {
            let mut state = self.state.lock().expect("rotation lock");
            state.index = (state.index + 1) % self.sections.len();
            gauge!("newsforge_rotation_index").set(state.index as f64);
            if state.index == 0 {
                state.rotations += 1;
                true
            } else {
                false
            }
        };

        if wrapped {
            counter!("newsforge_rotations_completed_total").increment(1);
            let counts: Vec<String> = self
                .gate
                .status()
                .map(|status| {
                    status
                        .sections
                        .iter()
                        .map(|s| format!("{}={}", s.section, s.count))
                        .collect()
                })
                .unwrap_or_default();
            info!(sections = %counts.join(" "), "rotation complete");
        }
    }

    /// One serial sweep over every section; used at boot to seed the
    /// threshold before periodic rotation takes over
    pub async fn run_backfill_once(&self) {
        info!(sections = self.sections.len(), "boot backfill pass starting");
        for &section in &self.sections {
            if let Err(e) = self.fetcher.fetch_section(section, self.max_per_tick).await {
                warn!(section = %section, error = %e, "backfill fetch failed");
            }
        }
        info!("boot backfill pass finished");
    }

    /// Spawn the rotation loop. A second call while running is a no-op.
    pub fn start(self: Arc<Self>) {
        let mut handle = self.handle.lock().expect("rotation handle lock");
        if handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }

        let rotation = Arc::clone(&self);
        let period = self.period;
        *handle = Some(tokio::spawn(async move {
            info!(period_secs = period.as_secs(), "section rotation started");
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                rotation.run_tick().await;
            }
        }));
    }

    /// Stop the rotation loop. Stopping an idle scheduler is a no-op.
    pub fn stop(&self) {
        let mut handle = self.handle.lock().expect("rotation handle lock");
        if let Some(h) = handle.take() {
            h.abort();
            info!("section rotation stopped");
        }
    }

    pub fn status(&self) -> RotationStatus {
        let state = self.state.lock().expect("rotation lock");
        RotationStatus {
            current_section: self.sections[state.index],
            index: state.index,
            total: self.sections.len(),
            rotations_completed: state.rotations,
        }
    }
}

impl Drop for SectionRotation {
    fn drop(&mut self) {
        if let Ok(mut handle) = self.handle.lock() {
            if let Some(h) = handle.take() {
                h.abort();
            }
        }
    }
}
