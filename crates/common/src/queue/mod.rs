//! Enrichment job queue
//!
//! Durable, idempotent, priority-ordered queue of per-article
//! enrichment tasks. Job ids are `commentary-{articleId}`, so a second
//! submission of an in-flight article is a no-op. Job records persist
//! in the cache shard pool so a restart preserves the backlog.
//!
//! The queue owns job state only; dispatch policy (rate limit,
//! concurrency, drain delay) lives in the consumer loop.

use crate::cache::TieredCache;
use crate::config::QueueConfig;
use crate::db::ArticleStore;
use crate::errors::{AppError, Result};
use crate::models::{Article, CommentarySource, Section};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Prefix composing the idempotency key
pub const JOB_ID_PREFIX: &str = "commentary-";

fn queue_job_key(job_id: &str) -> String {
    format!("queue:job:{}", job_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

/// Work order handed to the enrichment worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub article_id: String,
    pub title: String,
    pub content: String,
    pub section: Section,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentJob {
    pub job_id: String,
    pub payload: JobPayload,
    /// Full snapshot so the worker can cache the enriched article
    pub article: Article,
    /// 1 highest .. 10 lowest
    pub priority: u8,
    pub attempts: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub state: JobState,
}

/// Outcome of a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Enqueued { job_id: String, priority: u8 },
    /// The store or cache already holds commentary for the article
    AlreadyDone,
    /// A job with this id is already waiting, active, or delayed
    Duplicate,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitOptions {
    /// Explicit priority; callers on the user-triggered path pass 1
    pub priority: Option<u8>,
    pub delay: Option<std::time::Duration>,
}

/// Outcome of a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    Retry { next_run_at: DateTime<Utc> },
    Terminal,
}

/// Queue snapshot for the observability surface
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
    pub health: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct WaitEntry {
    priority: u8,
    enqueued_at: DateTime<Utc>,
    seq: u64,
    job_id: String,
}

impl Ord for WaitEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.priority, self.enqueued_at, self.seq).cmp(&(
            other.priority,
            other.enqueued_at,
            other.seq,
        ))
    }
}

impl PartialOrd for WaitEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct QueueInner {
    jobs: HashMap<String, EnrichmentJob>,
    waiting: BinaryHeap<Reverse<WaitEntry>>,
    completed_log: VecDeque<(String, DateTime<Utc>)>,
    failed_log: VecDeque<(String, DateTime<Utc>)>,
    seq: u64,
    closed: bool,
}

pub struct EnrichmentQueue {
    cache: Arc<TieredCache>,
    store: Arc<dyn ArticleStore>,
    config: QueueConfig,
    inner: Mutex<QueueInner>,
}

impl EnrichmentQueue {
    pub fn new(cache: Arc<TieredCache>, store: Arc<dyn ArticleStore>, config: QueueConfig) -> Self {
        Self {
            cache,
            store,
            config,
            inner: Mutex::new(QueueInner {
                jobs: HashMap::new(),
                waiting: BinaryHeap::new(),
                completed_log: VecDeque::new(),
                failed_log: VecDeque::new(),
                seq: 0,
                closed: false,
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Rebuild queue state from persisted job records. Jobs that were
    /// active when the process died go back to waiting.
    pub async fn restore(&self) -> Result<usize> {
        let keys = self.cache.pool().keys("queue:job:*").await?;
        let mut restored = 0;

        for key in keys {
            let Some(mut job) = self.cache.get_json::<EnrichmentJob>(&key).await? else {
                continue;
            };
            match job.state {
                JobState::Waiting | JobState::Delayed => {}
                JobState::Active => {
                    job.state = JobState::Waiting;
                    job.lock_expires_at = None;
                }
                JobState::Completed | JobState::Failed => continue,
            }

            let mut inner = self.inner.lock().expect("queue lock");
            if inner.jobs.contains_key(&job.job_id) {
                continue;
            }
            if job.state == JobState::Waiting {
                let entry = WaitEntry {
                    priority: job.priority,
                    enqueued_at: job.enqueued_at,
                    seq: inner.seq,
                    job_id: job.job_id.clone(),
                };
                inner.seq += 1;
                inner.waiting.push(Reverse(entry));
            }
            inner.jobs.insert(job.job_id.clone(), job);
            restored += 1;
        }

        if restored > 0 {
            info!(restored, "queue state restored from cache");
        }
        Ok(restored)
    }

    /// Admit an article for enrichment
    pub async fn submit(&self, article: &Article, opts: SubmitOptions) -> Result<Admission> {
        if article.id.trim().is_empty() {
            return Err(AppError::InvalidJob {
                message: "article id is empty".to_string(),
            });
        }
        if self.inner.lock().expect("queue lock").closed {
            return Err(AppError::ServiceUnavailable {
                message: "queue is shutting down".to_string(),
            });
        }

        let job_id = format!("{}{}", JOB_ID_PREFIX, article.id);
        let now = Utc::now();

        // Already enriched in the store
        if let Some(stored) = self.store.find_by_id(&article.id).await? {
            if stored.is_complete() {
                return Ok(Admission::AlreadyDone);
            }
        }

        // Commentary already cached: back-fill the store and skip
        let commentary_key = crate::commentary_key(&article.id);
        if let Some(commentary) = self.cache.get_json::<String>(&commentary_key).await? {
            if !commentary.trim().is_empty() {
                if let Err(e) = self
                    .store
                    .upsert_commentary(&article.id, &commentary, CommentarySource::Ai, now)
                    .await
                {
                    warn!(article_id = %article.id, error = %e, "cache back-fill to store failed");
                }
                return Ok(Admission::AlreadyDone);
            }
        }

        let priority = opts
            .priority
            .map(|p| p.clamp(1, 10))
            .unwrap_or_else(|| compute_priority(article, now));

        let job = {
            let mut inner = self.inner.lock().expect("queue lock");

            if let Some(existing) = inner.jobs.get(&job_id) {
                if matches!(
                    existing.state,
                    JobState::Waiting | JobState::Active | JobState::Delayed
                ) {
                    counter!("newsforge_jobs_duplicate_total").increment(1);
                    return Ok(Admission::Duplicate);
                }
            }

            let (state, next_run_at) = match opts.delay {
                Some(delay) => (
                    JobState::Delayed,
                    Some(now + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::zero())),
                ),
                None => (JobState::Waiting, None),
            };

            let job = EnrichmentJob {
                job_id: job_id.clone(),
                payload: JobPayload {
                    article_id: article.id.clone(),
                    title: article.title.clone(),
                    content: article.abstract_text.clone(),
                    section: article.section,
                },
                article: article.clone(),
                priority,
                attempts: 0,
                max_attempts: self.config.max_attempts,
                enqueued_at: now,
                next_run_at,
                lock_expires_at: None,
                state,
            };

            if state == JobState::Waiting {
                let entry = WaitEntry {
                    priority,
                    enqueued_at: now,
                    seq: inner.seq,
                    job_id: job_id.clone(),
                };
                inner.seq += 1;
                inner.waiting.push(Reverse(entry));
            }
            inner.jobs.insert(job_id.clone(), job.clone());
            job
        };

        self.persist(&job).await;
        counter!("newsforge_jobs_submitted_total").increment(1);
        debug!(job_id = %job_id, priority, "job admitted");

        Ok(Admission::Enqueued { job_id, priority })
    }

    /// Pop the highest-priority ready job and mark it active
    pub async fn next_ready(&self) -> Option<EnrichmentJob> {
        let now = Utc::now();
        let job = {
            let mut inner = self.inner.lock().expect("queue lock");

            // Promote delayed jobs whose run time has arrived
            let due: Vec<(String, u8, DateTime<Utc>)> = inner
                .jobs
                .values()
                .filter(|j| {
                    j.state == JobState::Delayed
                        && j.next_run_at.map(|at| at <= now).unwrap_or(true)
                })
                .map(|j| (j.job_id.clone(), j.priority, j.enqueued_at))
                .collect();
            for (job_id, priority, enqueued_at) in due {
                let entry = WaitEntry {
                    priority,
                    enqueued_at,
                    seq: inner.seq,
                    job_id: job_id.clone(),
                };
                inner.seq += 1;
                inner.waiting.push(Reverse(entry));
                if let Some(j) = inner.jobs.get_mut(&job_id) {
                    j.state = JobState::Waiting;
                    j.next_run_at = None;
                }
            }

            // Pop entries until one still refers to a waiting job
            loop {
                let Some(Reverse(entry)) = inner.waiting.pop() else {
                    return None;
                };
                let lock_secs = self.config.lock_secs as i64;
                if let Some(job) = inner.jobs.get_mut(&entry.job_id) {
                    if job.state == JobState::Waiting {
                        job.state = JobState::Active;
                        job.lock_expires_at = Some(now + ChronoDuration::seconds(lock_secs));
                        break job.clone();
                    }
                }
            }
        };

        self.persist(&job).await;
        Some(job)
    }

    /// Mark a job finished
    pub async fn complete(&self, job_id: &str) {
        let now = Utc::now();
        let (job, evicted) = {
            let mut inner = self.inner.lock().expect("queue lock");
            let job = match inner.jobs.get_mut(job_id) {
                Some(job) => {
                    job.state = JobState::Completed;
                    job.lock_expires_at = None;
                    job.clone()
                }
                None => return,
            };
            inner.completed_log.push_back((job_id.to_string(), now));
            let evicted = prune_retention(&mut inner, &self.config, now);
            (job, evicted)
        };

        self.persist(&job).await;
        self.drop_records(&evicted).await;
        counter!("newsforge_jobs_completed_total").increment(1);
    }

    /// Record a failed attempt; either schedules the retry with
    /// exponential backoff or transitions to terminal failure
    pub async fn fail_attempt(&self, job_id: &str, err: &AppError) -> Option<FailOutcome> {
        let now = Utc::now();
        let (job, outcome, evicted) = {
            let mut inner = self.inner.lock().expect("queue lock");
            let job = inner.jobs.get_mut(job_id)?;

            job.attempts += 1;
            job.lock_expires_at = None;

            let outcome = if job.attempts >= job.max_attempts {
                job.state = JobState::Failed;
                job.next_run_at = None;
                FailOutcome::Terminal
            } else {
                let backoff_secs =
                    self.config.backoff_base_secs * 2u64.pow(job.attempts.saturating_sub(1));
                let next_run_at = now + ChronoDuration::seconds(backoff_secs as i64);
                job.state = JobState::Delayed;
                job.next_run_at = Some(next_run_at);
                FailOutcome::Retry { next_run_at }
            };

            let job = job.clone();
            let evicted = if outcome == FailOutcome::Terminal {
                inner.failed_log.push_back((job_id.to_string(), now));
                prune_retention(&mut inner, &self.config, now)
            } else {
                Vec::new()
            };
            (job, outcome, evicted)
        };

        match &outcome {
            FailOutcome::Terminal => {
                counter!("newsforge_jobs_failed_total").increment(1);
                warn!(job_id, attempts = job.attempts, error = %err, "job failed terminally");
            }
            FailOutcome::Retry { next_run_at } => {
                debug!(job_id, attempts = job.attempts, %next_run_at, error = %err, "job scheduled for retry");
            }
        }

        self.persist(&job).await;
        self.drop_records(&evicted).await;
        Some(outcome)
    }

    /// Re-enqueue active jobs whose lock expired without completion
    pub async fn requeue_stalled(&self) -> Vec<String> {
        let now = Utc::now();
        let stalled: Vec<EnrichmentJob> = {
            let mut inner = self.inner.lock().expect("queue lock");
            let stalled_ids: Vec<String> = inner
                .jobs
                .values()
                .filter(|j| {
                    j.state == JobState::Active
                        && j.lock_expires_at.map(|at| at < now).unwrap_or(false)
                })
                .map(|j| j.job_id.clone())
                .collect();

            let mut jobs = Vec::with_capacity(stalled_ids.len());
            for job_id in stalled_ids {
                if let Some(job) = inner.jobs.get_mut(&job_id) {
                    job.state = JobState::Waiting;
                    job.lock_expires_at = None;
                    jobs.push(job.clone());
                }
                let (priority, enqueued_at) = {
                    let j = &inner.jobs[&job_id];
                    (j.priority, j.enqueued_at)
                };
                let entry = WaitEntry {
                    priority,
                    enqueued_at,
                    seq: inner.seq,
                    job_id,
                };
                inner.seq += 1;
                inner.waiting.push(Reverse(entry));
            }
            jobs
        };

        for job in &stalled {
            warn!(job_id = %job.job_id, "stalled job re-enqueued");
            counter!("newsforge_jobs_stalled_total").increment(1);
            self.persist(job).await;
        }
        stalled.into_iter().map(|j| j.job_id).collect()
    }

    /// Stop accepting submissions; in-flight jobs may finish
    pub fn close(&self) {
        self.inner.lock().expect("queue lock").closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("queue lock").closed
    }

    /// Queue stats for the observability surface
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().expect("queue lock");
        let mut stats = QueueStats {
            waiting: 0,
            active: 0,
            completed: 0,
            failed: 0,
            delayed: 0,
            health: "healthy".to_string(),
        };
        for job in inner.jobs.values() {
            match job.state {
                JobState::Waiting => stats.waiting += 1,
                JobState::Active => stats.active += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
                JobState::Delayed => stats.delayed += 1,
            }
        }
        if stats.waiting > 100 {
            stats.health = "backlogged".to_string();
        }
        gauge!("newsforge_queue_waiting").set(stats.waiting as f64);
        stats
    }

    async fn persist(&self, job: &EnrichmentJob) {
        let key = queue_job_key(&job.job_id);
        let ttl = self.config.keep_failed_age_secs;
        if let Err(e) = self.cache.set_json(&key, job, ttl).await {
            warn!(job_id = %job.job_id, error = %e, "failed to persist job record");
        }
    }

    async fn drop_records(&self, job_ids: &[String]) {
        if job_ids.is_empty() {
            return;
        }
        let keys: Vec<String> = job_ids.iter().map(|id| queue_job_key(id)).collect();
        if let Err(e) = self.cache.del(&keys).await {
            warn!(error = %e, "failed to drop pruned job records");
        }
    }
}

/// Priority for an automatic submission: fresher articles and premium
/// sections run first
fn compute_priority(article: &Article, now: DateTime<Utc>) -> u8 {
    let mut priority: u8 = match article.published_date {
        Some(published) => {
            let age = now.signed_duration_since(published);
            if age < ChronoDuration::hours(6) {
                1
            } else if age < ChronoDuration::hours(24) {
                2
            } else if age < ChronoDuration::hours(48) {
                3
            } else {
                5
            }
        }
        None => 5,
    };
    if article.section.is_premium() {
        priority = priority.saturating_sub(1);
    }
    priority.max(1)
}

/// Trim completed/failed logs to the retention policy, removing the
/// pruned jobs from the in-memory map; returns ids whose persisted
/// records should be dropped
fn prune_retention(
    inner: &mut QueueInner,
    config: &QueueConfig,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut evicted = Vec::new();

    let completed_cutoff = now - ChronoDuration::seconds(config.keep_completed_age_secs as i64);
    while inner.completed_log.len() > config.keep_completed_count
        || inner
            .completed_log
            .front()
            .map(|(_, at)| *at < completed_cutoff)
            .unwrap_or(false)
    {
        if let Some((job_id, _)) = inner.completed_log.pop_front() {
            inner.jobs.remove(&job_id);
            evicted.push(job_id);
        }
    }

    let failed_cutoff = now - ChronoDuration::seconds(config.keep_failed_age_secs as i64);
    while inner.failed_log.len() > config.keep_failed_count
        || inner
            .failed_log
            .front()
            .map(|(_, at)| *at < failed_cutoff)
            .unwrap_or(false)
    {
        if let Some((job_id, _)) = inner.failed_log.pop_front() {
            inner.jobs.remove(&job_id);
            evicted.push(job_id);
        }
    }

    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ShardPool;
    use crate::db::MemoryArticleStore;
    use std::collections::BTreeSet;

    fn article(id: &str, section: Section) -> Article {
        Article {
            id: id.into(),
            title: format!("Title {}", id),
            abstract_text: "Abstract".into(),
            url: format!("https://example.com/{}", id),
            published_date: None,
            byline: None,
            image_url: None,
            source: "top-stories".into(),
            section,
            keywords: BTreeSet::new(),
            ai_commentary: None,
            commentary_generated_at: None,
            commentary_source: None,
        }
    }

    fn queue() -> (EnrichmentQueue, Arc<TieredCache>, Arc<MemoryArticleStore>) {
        let cache = Arc::new(TieredCache::new(Arc::new(ShardPool::memory_only())));
        let store = Arc::new(MemoryArticleStore::new());
        let q = EnrichmentQueue::new(
            Arc::clone(&cache),
            store.clone() as Arc<dyn ArticleStore>,
            QueueConfig::default(),
        );
        (q, cache, store)
    }

    #[tokio::test]
    async fn duplicate_submission_is_noop() {
        let (q, _, _) = queue();
        let a = article("x", Section::Technology);

        let first = q.submit(&a, SubmitOptions::default()).await.unwrap();
        assert!(matches!(first, Admission::Enqueued { .. }));

        let second = q.submit(&a, SubmitOptions::default()).await.unwrap();
        assert_eq!(second, Admission::Duplicate);

        let stats = q.stats();
        assert_eq!(stats.waiting, 1);
    }

    #[tokio::test]
    async fn empty_article_id_is_rejected() {
        let (q, _, _) = queue();
        let a = article("", Section::World);
        let err = q.submit(&a, SubmitOptions::default()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidJob { .. }));
    }

    #[tokio::test]
    async fn enriched_store_article_short_circuits() {
        let (q, _, store) = queue();
        let mut a = article("done", Section::World);
        a.ai_commentary = Some("Key Points: ...".into());
        store.upsert_by_url(&a).await.unwrap();

        let admission = q.submit(&a, SubmitOptions::default()).await.unwrap();
        assert_eq!(admission, Admission::AlreadyDone);
        assert_eq!(q.stats().waiting, 0);
    }

    #[tokio::test]
    async fn cached_commentary_back_fills_store() {
        let (q, cache, store) = queue();
        let a = article("cached", Section::Health);
        store.upsert_by_url(&a).await.unwrap();
        cache
            .set_json(&crate::commentary_key("cached"), &"From cache".to_string(), 60)
            .await
            .unwrap();

        let admission = q.submit(&a, SubmitOptions::default()).await.unwrap();
        assert_eq!(admission, Admission::AlreadyDone);

        let stored = store.find_by_id("cached").await.unwrap().unwrap();
        assert_eq!(stored.ai_commentary.as_deref(), Some("From cache"));
        assert_eq!(stored.commentary_source, Some(CommentarySource::Ai));
    }

    #[tokio::test]
    async fn dispatch_orders_by_priority_then_age() {
        let (q, _, _) = queue();

        let low = article("low", Section::Sports);
        q.submit(&low, SubmitOptions::default()).await.unwrap();

        let mut fresh = article("fresh", Section::Sports);
        fresh.published_date = Some(Utc::now());
        q.submit(&fresh, SubmitOptions::default()).await.unwrap();

        let user = article("user", Section::Sports);
        q.submit(
            &user,
            SubmitOptions {
                priority: Some(1),
                delay: None,
            },
        )
        .await
        .unwrap();

        // fresh (prio 1) beats user (prio 1) only on enqueue order;
        // both beat low (prio 5)
        let first = q.next_ready().await.unwrap();
        assert_eq!(first.payload.article_id, "fresh");
        let second = q.next_ready().await.unwrap();
        assert_eq!(second.payload.article_id, "user");
        let third = q.next_ready().await.unwrap();
        assert_eq!(third.payload.article_id, "low");
        assert!(q.next_ready().await.is_none());
    }

    #[tokio::test]
    async fn premium_section_gets_priority_boost() {
        let now = Utc::now();
        let mut a = article("p", Section::Politics);
        a.published_date = Some(now - ChronoDuration::hours(30));
        // age 30h -> 3, premium -> 2
        assert_eq!(compute_priority(&a, now), 2);

        let mut b = article("s", Section::Sports);
        b.published_date = Some(now - ChronoDuration::hours(2));
        assert_eq!(compute_priority(&b, now), 1);

        let c = article("old", Section::Politics);
        assert_eq!(compute_priority(&c, now), 4);
    }

    #[tokio::test]
    async fn retry_backoff_doubles_then_fails_terminally() {
        let (q, _, _) = queue();
        let a = article("retry", Section::World);
        q.submit(&a, SubmitOptions::default()).await.unwrap();

        let job = q.next_ready().await.unwrap();
        let err = AppError::UpstreamTransient {
            message: "503".into(),
        };

        let before = Utc::now();
        let out = q.fail_attempt(&job.job_id, &err).await.unwrap();
        let FailOutcome::Retry { next_run_at } = out else {
            panic!("expected retry");
        };
        let delay = next_run_at.signed_duration_since(before).num_seconds();
        assert!((4..=6).contains(&delay), "first backoff ~5s, got {}", delay);
        assert_eq!(q.stats().delayed, 1);

        // Force the delayed job due and run it again
        {
            let mut inner = q.inner.lock().unwrap();
            inner.jobs.get_mut(&job.job_id).unwrap().next_run_at = Some(Utc::now());
        }
        let job2 = q.next_ready().await.unwrap();
        let before = Utc::now();
        let out = q.fail_attempt(&job2.job_id, &err).await.unwrap();
        let FailOutcome::Retry { next_run_at } = out else {
            panic!("expected second retry");
        };
        let delay = next_run_at.signed_duration_since(before).num_seconds();
        assert!((9..=11).contains(&delay), "second backoff ~10s, got {}", delay);

        {
            let mut inner = q.inner.lock().unwrap();
            inner.jobs.get_mut(&job.job_id).unwrap().next_run_at = Some(Utc::now());
        }
        let job3 = q.next_ready().await.unwrap();
        let out = q.fail_attempt(&job3.job_id, &err).await.unwrap();
        assert_eq!(out, FailOutcome::Terminal);
        assert_eq!(q.stats().failed, 1);
    }

    #[tokio::test]
    async fn stalled_job_is_requeued() {
        let (q, _, _) = queue();
        let a = article("stall", Section::World);
        q.submit(&a, SubmitOptions::default()).await.unwrap();

        let job = q.next_ready().await.unwrap();
        assert_eq!(q.stats().active, 1);

        // Expire the lock manually
        {
            let mut inner = q.inner.lock().unwrap();
            inner.jobs.get_mut(&job.job_id).unwrap().lock_expires_at =
                Some(Utc::now() - ChronoDuration::seconds(1));
        }

        let stalled = q.requeue_stalled().await;
        assert_eq!(stalled, vec![job.job_id.clone()]);
        assert_eq!(q.stats().waiting, 1);
        assert_eq!(q.stats().active, 0);
    }

    #[tokio::test]
    async fn delayed_submission_waits_for_run_time() {
        let (q, _, _) = queue();
        let a = article("later", Section::World);
        q.submit(
            &a,
            SubmitOptions {
                priority: None,
                delay: Some(std::time::Duration::from_secs(3600)),
            },
        )
        .await
        .unwrap();

        assert!(q.next_ready().await.is_none());
        assert_eq!(q.stats().delayed, 1);
    }

    #[tokio::test]
    async fn restore_rebuilds_waiting_and_active_jobs() {
        let (q, cache, store) = queue();
        let a = article("persisted", Section::World);
        q.submit(&a, SubmitOptions::default()).await.unwrap();
        let job = q.next_ready().await.unwrap();
        assert_eq!(job.state, JobState::Active);

        // Simulate a restart: fresh queue over the same cache pool
        let q2 = EnrichmentQueue::new(
            Arc::clone(&cache),
            store as Arc<dyn ArticleStore>,
            QueueConfig::default(),
        );
        let restored = q2.restore().await.unwrap();
        assert_eq!(restored, 1);
        // The previously active job is waiting again
        let job = q2.next_ready().await.unwrap();
        assert_eq!(job.payload.article_id, "persisted");
    }

    #[tokio::test]
    async fn closed_queue_rejects_submissions() {
        let (q, _, _) = queue();
        q.close();
        let a = article("x", Section::World);
        let err = q.submit(&a, SubmitOptions::default()).await.unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable { .. }));
    }

    #[tokio::test]
    async fn completion_updates_stats_and_persists() {
        let (q, cache, _) = queue();
        let a = article("c", Section::World);
        q.submit(&a, SubmitOptions::default()).await.unwrap();
        let job = q.next_ready().await.unwrap();
        q.complete(&job.job_id).await;

        let stats = q.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.active, 0);

        let persisted = cache
            .get_json::<EnrichmentJob>(&queue_job_key(&job.job_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(persisted.state, JobState::Completed);
    }
}
