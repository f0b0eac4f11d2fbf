//! Queue consumer
//!
//! Supervised loops replacing event handlers: one dispatcher pops the
//! priority queue under a rate limiter and posts jobs to a bounded
//! channel; a small worker pool runs enrichment and reports outcomes
//! back to the queue; a stalled-job monitor runs on a timer.
//!
//! Dispatch policy: at most `starts_per_window` job starts per window,
//! concurrency capped by the worker count, and a drain delay between
//! polls when the queue is empty to keep cache-tier command counts
//! down.

use crate::worker::EnrichmentWorker;
use governor::clock::QuantaClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use newsforge_common::config::QueueConfig;
use newsforge_common::queue::{EnrichmentJob, EnrichmentQueue, FailOutcome};
use rand::Rng;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Consecutive worker failures before the breaker pauses consumption
const BREAKER_MAX_FAILURES: u32 = 5;
const BREAKER_PAUSE: Duration = Duration::from_secs(30);

/// Maximum random jitter added to empty-queue polls
const DRAIN_JITTER_MS: u64 = 500;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

fn create_start_limiter(starts_per_window: u32, window_secs: u64) -> Arc<DirectLimiter> {
    let starts = NonZeroU32::new(starts_per_window.max(1)).expect("non-zero starts");
    let period = Duration::from_secs(window_secs.max(1)) / starts.get();
    let quota = Quota::with_period(period)
        .expect("non-zero period")
        .allow_burst(starts);
    Arc::new(RateLimiter::direct(quota))
}

/// Handle to the running consumer loops
pub struct ConsumerHandle {
    handles: Vec<JoinHandle<()>>,
}

impl ConsumerHandle {
    /// Wait for every loop to wind down
    pub async fn wait(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "consumer task panicked");
            }
        }
    }
}

pub struct QueueConsumer {
    queue: Arc<EnrichmentQueue>,
    worker: Arc<EnrichmentWorker>,
    config: QueueConfig,
}

impl QueueConsumer {
    pub fn new(queue: Arc<EnrichmentQueue>, worker: Arc<EnrichmentWorker>) -> Self {
        let config = queue.config().clone();
        Self {
            queue,
            worker,
            config,
        }
    }

    /// Start the dispatcher, worker pool, and stalled monitor. The
    /// `shutdown` channel flipping to true stops dispatch; active jobs
    /// finish before the workers exit.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> ConsumerHandle {
        let (job_tx, job_rx) = mpsc::channel::<EnrichmentJob>(1);
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));
        let failures = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();

        // Worker pool
        for worker_id in 1..=self.config.concurrency.max(1) {
            let rx = Arc::clone(&job_rx);
            let queue = Arc::clone(&self.queue);
            let worker = Arc::clone(&self.worker);
            let failures = Arc::clone(&failures);
            handles.push(tokio::spawn(async move {
                run_worker(worker_id, rx, queue, worker, failures).await;
            }));
        }

        // Stalled-job monitor
        {
            let queue = Arc::clone(&self.queue);
            let mut shutdown = shutdown.clone();
            let interval = Duration::from_secs(self.config.stalled_interval_secs.max(1));
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let stalled = queue.requeue_stalled().await;
                            if !stalled.is_empty() {
                                debug!(count = stalled.len(), "requeued stalled jobs");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        // Dispatcher
        {
            let queue = Arc::clone(&self.queue);
            let limiter = create_start_limiter(
                self.config.starts_per_window,
                self.config.window_secs,
            );
            let drain_delay = Duration::from_secs(self.config.drain_delay_secs.max(1));
            let failures = Arc::clone(&failures);
            let mut shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                info!("queue dispatcher started");
                loop {
                    if *shutdown.borrow() {
                        break;
                    }

                    // Circuit breaker: repeated worker failures pause
                    // dispatch instead of burning quota
                    if failures.load(Ordering::SeqCst) >= BREAKER_MAX_FAILURES {
                        warn!(
                            failures = failures.load(Ordering::SeqCst),
                            "circuit breaker open; pausing dispatch"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(BREAKER_PAUSE) => {}
                            _ = shutdown.changed() => break,
                        }
                        failures.store(0, Ordering::SeqCst);
                        info!("circuit breaker reset; resuming dispatch");
                    }

                    match queue.next_ready().await {
                        Some(job) => {
                            limiter.until_ready().await;
                            if job_tx.send(job).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let jitter =
                                Duration::from_millis(rand::thread_rng().gen_range(0..=DRAIN_JITTER_MS));
                            tokio::select! {
                                _ = tokio::time::sleep(drain_delay + jitter) => {}
                                _ = shutdown.changed() => break,
                            }
                        }
                    }
                }
                info!("queue dispatcher stopped");
                // Dropping job_tx lets the workers drain and exit
            }));
        }

        ConsumerHandle { handles }
    }
}

async fn run_worker(
    worker_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<EnrichmentJob>>>,
    queue: Arc<EnrichmentQueue>,
    worker: Arc<EnrichmentWorker>,
    failures: Arc<AtomicU32>,
) {
    info!(worker_id, "enrichment worker started");
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };

        debug!(worker_id, job_id = %job.job_id, "job picked up");
        match worker.enrich(&job.article).await {
            Ok(outcome) => {
                failures.store(0, Ordering::SeqCst);
                queue.complete(&job.job_id).await;
                debug!(worker_id, job_id = %job.job_id, source = outcome.source.as_str(), "job completed");
            }
            Err(e) => {
                failures.fetch_add(1, Ordering::SeqCst);
                match queue.fail_attempt(&job.job_id, &e).await {
                    Some(FailOutcome::Terminal) => {
                        // Attempts are spent; complete the article via
                        // the deterministic fallback
                        if let Err(fallback_err) = worker.write_fallback(&job.article).await {
                            error!(
                                worker_id,
                                job_id = %job.job_id,
                                error = %fallback_err,
                                "fallback write failed; article stays incomplete"
                            );
                        }
                    }
                    Some(FailOutcome::Retry { next_run_at }) => {
                        debug!(worker_id, job_id = %job.job_id, %next_run_at, "job will retry");
                    }
                    None => {
                        warn!(worker_id, job_id = %job.job_id, "failed job vanished from queue");
                    }
                }
            }
        }
    }
    info!(worker_id, "enrichment worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockCommentaryProvider;
    use newsforge_common::balancer::{KeyPool, QuotaPolicy};
    use newsforge_common::cache::{ShardPool, TieredCache};
    use newsforge_common::db::{ArticleStore, MemoryArticleStore};
    use newsforge_common::models::{Article, Section};
    use newsforge_common::queue::{Admission, SubmitOptions};
    use std::collections::BTreeSet;

    fn article(id: &str) -> Article {
        Article {
            id: id.into(),
            title: format!("Title {}", id),
            abstract_text: "Abstract".into(),
            url: format!("https://example.com/{}", id),
            published_date: None,
            byline: None,
            image_url: None,
            source: "top-stories".into(),
            section: Section::World,
            keywords: BTreeSet::new(),
            ai_commentary: None,
            commentary_generated_at: None,
            commentary_source: None,
        }
    }

    fn rig() -> (
        Arc<EnrichmentQueue>,
        Arc<EnrichmentWorker>,
        Arc<TieredCache>,
        Arc<MemoryArticleStore>,
    ) {
        let cache = Arc::new(TieredCache::new(Arc::new(ShardPool::memory_only())));
        let store = Arc::new(MemoryArticleStore::new());
        let pool = Arc::new(KeyPool::new(
            "ai",
            QuotaPolicy::ai(),
            vec!["key-1".into()],
            1_000_000,
        ));
        let mut cfg = QueueConfig::default();
        cfg.drain_delay_secs = 1;
        let queue = Arc::new(EnrichmentQueue::new(
            Arc::clone(&cache),
            store.clone() as Arc<dyn ArticleStore>,
            cfg,
        ));
        let worker = Arc::new(EnrichmentWorker::new(
            Arc::clone(&cache),
            store.clone() as Arc<dyn ArticleStore>,
            pool,
            Arc::new(MockCommentaryProvider::new()),
        ));
        (queue, worker, cache, store)
    }

    #[tokio::test]
    async fn consumer_drains_submitted_jobs() {
        let (queue, worker, cache, store) = rig();
        for i in 0..3 {
            let a = article(&format!("c{}", i));
            store.upsert_by_url(&a).await.unwrap();
            let admission = queue.submit(&a, SubmitOptions::default()).await.unwrap();
            assert!(matches!(admission, Admission::Enqueued { .. }));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = QueueConsumer::new(Arc::clone(&queue), worker).start(shutdown_rx);

        // Poll until all three jobs are done
        for _ in 0..100 {
            if queue.stats().completed == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(queue.stats().completed, 3);

        for i in 0..3 {
            let id = format!("c{}", i);
            assert!(store.find_by_id(&id).await.unwrap().unwrap().is_complete());
            assert!(cache
                .exists(&newsforge_common::commentary_key(&id))
                .await
                .unwrap());
        }

        queue.close();
        shutdown_tx.send(true).unwrap();
        handle.wait().await;
    }

    #[tokio::test]
    async fn duplicate_submissions_produce_one_cache_write() {
        let (queue, worker, cache, store) = rig();
        let a = article("dup");
        store.upsert_by_url(&a).await.unwrap();

        let first = queue.submit(&a, SubmitOptions::default()).await.unwrap();
        assert!(matches!(first, Admission::Enqueued { .. }));
        let second = queue.submit(&a, SubmitOptions::default()).await.unwrap();
        assert_eq!(second, Admission::Duplicate);
        assert_eq!(queue.stats().waiting, 1);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = QueueConsumer::new(Arc::clone(&queue), worker).start(shutdown_rx);

        for _ in 0..100 {
            if queue.stats().completed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(queue.stats().completed, 1);
        assert!(cache
            .exists(&newsforge_common::commentary_key("dup"))
            .await
            .unwrap());

        shutdown_tx.send(true).unwrap();
        handle.wait().await;
    }

    #[test]
    fn limiter_allows_burst_then_throttles() {
        let limiter = create_start_limiter(10, 60);
        let mut admitted = 0;
        while limiter.check().is_ok() {
            admitted += 1;
            assert!(admitted <= 10, "burst should cap at the window budget");
        }
        assert_eq!(admitted, 10);
    }
}
