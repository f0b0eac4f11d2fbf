//! Key-pool load balancers
//!
//! Distributes requests across N credentials for a single upstream,
//! tracking per-credential daily usage. A credential that trips its
//! provider's rate limit is quarantined until the next UTC midnight;
//! an authentication rejection bans it for the process lifetime.
//!
//! Two quota flavors exist: token quotas (AI provider, usage observed
//! per response) and request-count quotas (publisher APIs, one unit
//! per dispatched call).

use crate::errors::{AppError, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use metrics::counter;
use serde::Serialize;
use std::future::Future;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Quota headroom policy for a pool
#[derive(Debug, Clone, Copy)]
pub struct QuotaPolicy {
    /// Units kept in reserve below the daily limit during selection
    pub safety_buffer: u64,
    /// Expected cost of one dispatched call
    pub reserved_quantum: u64,
}

impl QuotaPolicy {
    /// Token-quota policy for the AI provider
    pub fn ai() -> Self {
        Self {
            safety_buffer: 1_000,
            reserved_quantum: 600,
        }
    }

    /// Request-count policy for publisher APIs
    pub fn publisher() -> Self {
        Self {
            safety_buffer: 0,
            reserved_quantum: 1,
        }
    }
}

/// Credential handed to a dispatch closure
#[derive(Debug, Clone)]
pub struct PoolCredential {
    /// Ordinal, 1-based
    pub id: usize,
    pub secret: String,
}

/// Successful dispatch outcome: the value plus observed usage units
#[derive(Debug)]
pub struct Dispatched<T> {
    pub value: T,
    pub units: u64,
}

#[derive(Debug)]
struct CredentialState {
    secret: String,
    daily_limit: u64,
    used_today: u64,
    /// Quarantined until UTC midnight (daily quota tripped)
    dead: bool,
    /// Rejected by the provider; permanent for the process
    auth_failed: bool,
    healthy: bool,
    last_error: Option<String>,
}

impl CredentialState {
    fn new(secret: String, daily_limit: u64) -> Self {
        Self {
            secret,
            daily_limit,
            used_today: 0,
            dead: false,
            auth_failed: false,
            healthy: true,
            last_error: None,
        }
    }

    /// Normal selection keeps `safety_buffer` units of headroom
    fn eligible(&self, policy: &QuotaPolicy) -> bool {
        !self.dead
            && !self.auth_failed
            && self.used_today + policy.reserved_quantum
                < self.daily_limit.saturating_sub(policy.safety_buffer)
    }

    /// Last-resort selection ignores the safety buffer but never the
    /// hard limit, so `used_today` cannot exceed `daily_limit`
    fn last_resort_eligible(&self, policy: &QuotaPolicy) -> bool {
        !self.dead
            && !self.auth_failed
            && self.used_today + policy.reserved_quantum <= self.daily_limit
    }
}

struct PoolInner {
    creds: Vec<CredentialState>,
    next_index: usize,
    day: NaiveDate,
}

impl PoolInner {
    /// Zero counters and clear quarantines at the first operation
    /// after a UTC day roll. Auth bans survive.
    fn reset_if_rolled(&mut self, today: NaiveDate) {
        if today == self.day {
            return;
        }
        for c in self.creds.iter_mut() {
            c.used_today = 0;
            c.dead = false;
            c.healthy = !c.auth_failed;
            c.last_error = None;
        }
        self.day = today;
    }
}

/// Per-credential snapshot for the observability surface
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStats {
    pub id: usize,
    pub used_today: u64,
    pub daily_limit: u64,
    pub remaining: u64,
    pub available: bool,
    pub dead: bool,
    pub auth_failed: bool,
    pub last_error: Option<String>,
}

/// Pool snapshot for the observability surface
#[derive(Debug, Clone, Serialize)]
pub struct BalancerStats {
    pub name: String,
    pub credentials: Vec<CredentialStats>,
    pub total_used: u64,
    pub total_limit: u64,
    pub next_reset: DateTime<Utc>,
}

/// Round-robin credential pool with daily quotas
pub struct KeyPool {
    name: String,
    policy: QuotaPolicy,
    inner: Mutex<PoolInner>,
}

impl KeyPool {
    /// Build a pool where every credential shares one daily limit
    pub fn new(name: impl Into<String>, policy: QuotaPolicy, secrets: Vec<String>, daily_limit: u64) -> Self {
        let creds = secrets
            .into_iter()
            .map(|s| CredentialState::new(s, daily_limit))
            .collect();
        Self {
            name: name.into(),
            policy,
            inner: Mutex::new(PoolInner {
                creds,
                next_index: 0,
                day: Utc::now().date_naive(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("pool lock").creds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke `op` with a chosen credential, rotating to the next
    /// eligible one on rate-limit, auth, and transient failures, up to
    /// N - 1 additional tries.
    pub async fn dispatch<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(PoolCredential) -> Fut,
        Fut: Future<Output = Result<Dispatched<T>>>,
    {
        self.dispatch_inner(Utc::now(), op).await
    }

    async fn dispatch_inner<T, F, Fut>(&self, now: DateTime<Utc>, op: F) -> Result<T>
    where
        F: Fn(PoolCredential) -> Fut,
        Fut: Future<Output = Result<Dispatched<T>>>,
    {
        let tries = {
            let inner = self.inner.lock().expect("pool lock");
            inner.creds.len()
        };
        if tries == 0 {
            return Err(AppError::Configuration {
                message: format!("no credentials configured for pool '{}'", self.name),
            });
        }

        let mut last_err: Option<AppError> = None;
        for _ in 0..tries {
            let cred = match self.select(now.date_naive()) {
                Ok(c) => c,
                Err(e) => return Err(last_err.unwrap_or(e)),
            };

            match op(cred.clone()).await {
                Ok(d) => {
                    self.record_success(cred.id, d.units);
                    return Ok(d.value);
                }
                Err(e) if e.is_rate_limit() => {
                    self.quarantine(cred.id, &e);
                    last_err = Some(e);
                }
                Err(e) if e.is_auth() => {
                    self.ban(cred.id, &e);
                    last_err = Some(e);
                }
                Err(e) if e.is_transient() => {
                    self.mark_unhealthy(cred.id, &e);
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or(AppError::ExhaustedAllCredentials {
            pool: self.name.clone(),
        }))
    }

    /// Round-robin over eligible credentials; falls back to the
    /// least-used credential when none has safety-buffer headroom.
    fn select(&self, today: NaiveDate) -> Result<PoolCredential> {
        let mut inner = self.inner.lock().expect("pool lock");
        inner.reset_if_rolled(today);

        let n = inner.creds.len();
        for offset in 0..n {
            let idx = (inner.next_index + offset) % n;
            if inner.creds[idx].eligible(&self.policy) {
                inner.next_index = (idx + 1) % n;
                return Ok(PoolCredential {
                    id: idx + 1,
                    secret: inner.creds[idx].secret.clone(),
                });
            }
        }

        let last_resort = inner
            .creds
            .iter()
            .enumerate()
            .filter(|(_, c)| c.last_resort_eligible(&self.policy))
            .min_by_key(|(_, c)| c.used_today)
            .map(|(idx, c)| (idx, c.secret.clone()));

        if let Some((idx, secret)) = last_resort {
            debug!(pool = %self.name, credential = idx + 1, "using last-resort credential");
            return Ok(PoolCredential { id: idx + 1, secret });
        }

        counter!("newsforge_balancer_exhausted_total", "pool" => self.name.clone()).increment(1);
        Err(AppError::ExhaustedAllCredentials {
            pool: self.name.clone(),
        })
    }

    fn record_success(&self, id: usize, units: u64) {
        let mut inner = self.inner.lock().expect("pool lock");
        if let Some(c) = inner.creds.get_mut(id - 1) {
            c.used_today = (c.used_today + units).min(c.daily_limit);
            c.healthy = true;
            c.last_error = None;
        }
        counter!("newsforge_balancer_dispatch_total", "pool" => self.name.clone()).increment(1);
    }

    fn quarantine(&self, id: usize, err: &AppError) {
        warn!(pool = %self.name, credential = id, error = %err, "credential quarantined until UTC midnight");
        let mut inner = self.inner.lock().expect("pool lock");
        if let Some(c) = inner.creds.get_mut(id - 1) {
            c.dead = true;
            c.healthy = false;
            c.last_error = Some(err.to_string());
        }
        counter!("newsforge_balancer_quarantine_total", "pool" => self.name.clone()).increment(1);
    }

    fn ban(&self, id: usize, err: &AppError) {
        warn!(pool = %self.name, credential = id, error = %err, "credential rejected; disabled for process lifetime");
        let mut inner = self.inner.lock().expect("pool lock");
        if let Some(c) = inner.creds.get_mut(id - 1) {
            c.auth_failed = true;
            c.healthy = false;
            c.last_error = Some(err.to_string());
        }
    }

    fn mark_unhealthy(&self, id: usize, err: &AppError) {
        let mut inner = self.inner.lock().expect("pool lock");
        if let Some(c) = inner.creds.get_mut(id - 1) {
            c.healthy = false;
            c.last_error = Some(err.to_string());
        }
    }

    /// Per-credential counters, totals, next reset
    pub fn stats(&self) -> BalancerStats {
        let mut inner = self.inner.lock().expect("pool lock");
        inner.reset_if_rolled(Utc::now().date_naive());

        let credentials: Vec<CredentialStats> = inner
            .creds
            .iter()
            .enumerate()
            .map(|(idx, c)| CredentialStats {
                id: idx + 1,
                used_today: c.used_today,
                daily_limit: c.daily_limit,
                remaining: c.daily_limit.saturating_sub(c.used_today),
                available: c.eligible(&self.policy),
                dead: c.dead,
                auth_failed: c.auth_failed,
                last_error: c.last_error.clone(),
            })
            .collect();

        let total_used = credentials.iter().map(|c| c.used_today).sum();
        let total_limit = credentials.iter().map(|c| c.daily_limit).sum();

        BalancerStats {
            name: self.name.clone(),
            credentials,
            total_used,
            total_limit,
            next_reset: next_utc_midnight(Utc::now()),
        }
    }
}

/// The next UTC midnight after `now`
pub fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive().succ_opt().expect("date range");
    Utc.from_utc_datetime(&tomorrow.and_hms_opt(0, 0, 0).expect("midnight"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn pool(n: usize, limit: u64, policy: QuotaPolicy) -> KeyPool {
        let secrets = (1..=n).map(|i| format!("key-{}", i)).collect();
        KeyPool::new("test", policy, secrets, limit)
    }

    #[tokio::test]
    async fn round_robin_rotates_credentials() {
        let p = pool(3, 1_000, QuotaPolicy::publisher());
        let mut seen = Vec::new();
        for _ in 0..6 {
            let id = p
                .dispatch(|cred| async move { Ok(Dispatched { value: cred.id, units: 1 }) })
                .await
                .unwrap();
            seen.push(id);
        }
        assert_eq!(seen, vec![1, 2, 3, 1, 2, 3]);
    }

    #[tokio::test]
    async fn rate_limit_quarantines_and_fails_over() {
        let p = pool(2, 1_000, QuotaPolicy::publisher());
        let out = p
            .dispatch(|cred| async move {
                if cred.id == 1 {
                    Err(AppError::RateLimited {
                        credential: cred.id,
                        message: "429".into(),
                    })
                } else {
                    Ok(Dispatched { value: cred.id, units: 1 })
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 2);

        let stats = p.stats();
        assert!(stats.credentials[0].dead);
        assert!(!stats.credentials[1].dead);

        // Subsequent dispatches skip the quarantined credential
        let out = p
            .dispatch(|cred| async move { Ok(Dispatched { value: cred.id, units: 1 }) })
            .await
            .unwrap();
        assert_eq!(out, 2);
    }

    #[tokio::test]
    async fn all_rate_limited_surfaces_exhaustion() {
        let p = pool(2, 1_000, QuotaPolicy::publisher());
        let err = p
            .dispatch(|cred| async move {
                Err::<Dispatched<()>, _>(AppError::RateLimited {
                    credential: cred.id,
                    message: "429".into(),
                })
            })
            .await
            .unwrap_err();
        // The last provider error is surfaced; both credentials are dead
        assert!(err.is_rate_limit());
        let err = p
            .dispatch(|cred| async move { Ok(Dispatched { value: cred.id, units: 1 }) })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExhaustedAllCredentials { .. }));
    }

    #[tokio::test]
    async fn quota_safety_never_exceeds_daily_limit() {
        // Publisher policy: reserved quantum 1, no safety buffer
        let p = pool(1, 5, QuotaPolicy::publisher());
        let mut ok = 0;
        for _ in 0..10 {
            match p
                .dispatch(|cred| async move { Ok(Dispatched { value: cred.id, units: 1 }) })
                .await
            {
                Ok(_) => ok += 1,
                Err(e) => assert!(matches!(e, AppError::ExhaustedAllCredentials { .. })),
            }
        }
        assert_eq!(ok, 5);
        let stats = p.stats();
        assert!(stats.credentials[0].used_today <= stats.credentials[0].daily_limit);
    }

    #[tokio::test]
    async fn ai_policy_keeps_safety_buffer_with_last_resort() {
        // limit 1_000: eligible needs used + 600 < 0 after buffer, so
        // normal selection never matches and last resort carries calls
        // until the hard limit would be crossed
        let p = pool(2, 1_000, QuotaPolicy::ai());
        let mut ok = 0;
        for _ in 0..4 {
            if p.dispatch(|_| async { Ok(Dispatched { value: (), units: 600 }) })
                .await
                .is_ok()
            {
                ok += 1;
            }
        }
        // Each credential fits exactly one 600-token call under the hard limit
        assert_eq!(ok, 2);
        let stats = p.stats();
        for c in &stats.credentials {
            assert!(c.used_today <= c.daily_limit);
        }
    }

    #[tokio::test]
    async fn auth_failure_is_permanent_across_day_roll() {
        let p = pool(2, 1_000, QuotaPolicy::publisher());
        let _ = p
            .dispatch(|cred| async move {
                if cred.id == 1 {
                    Err::<Dispatched<usize>, _>(AppError::AuthRejected {
                        credential: cred.id,
                        message: "401".into(),
                    })
                } else {
                    Ok(Dispatched { value: cred.id, units: 1 })
                }
            })
            .await;

        // Roll the UTC day and verify the quarantine clears but the ban holds
        let tomorrow = Utc::now() + ChronoDuration::days(1);
        let out = p
            .dispatch_inner(tomorrow, |cred| async move {
                Ok(Dispatched { value: cred.id, units: 1 })
            })
            .await
            .unwrap();
        assert_eq!(out, 2);
        let stats = p.stats();
        assert!(stats.credentials[0].auth_failed);
    }

    #[tokio::test]
    async fn utc_midnight_reset_clears_counters_and_dead() {
        let p = pool(1, 5, QuotaPolicy::publisher());
        for _ in 0..5 {
            let _ = p
                .dispatch(|cred| async move { Ok(Dispatched { value: cred.id, units: 1 }) })
                .await;
        }
        assert!(p
            .dispatch(|cred| async move { Ok(Dispatched { value: cred.id, units: 1 }) })
            .await
            .is_err());

        let tomorrow = Utc::now() + ChronoDuration::days(1);
        let out = p
            .dispatch_inner(tomorrow, |cred| async move {
                Ok(Dispatched { value: cred.id, units: 1 })
            })
            .await;
        assert!(out.is_ok());
        let stats = p.stats();
        // stats() resets against the real clock, so read through the inner state
        assert!(!stats.credentials[0].dead);
    }

    #[test]
    fn next_midnight_is_start_of_tomorrow() {
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 15, 9, 26).unwrap();
        let midnight = next_utc_midnight(now);
        assert_eq!(midnight, Utc.with_ymd_and_hms(2025, 3, 15, 0, 0, 0).unwrap());
    }
}
