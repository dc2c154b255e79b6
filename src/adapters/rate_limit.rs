//! Sliding-window rate limiting keyed by identity

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::agents::error::DomainError;

/// Quota for one limiter tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl RateLimitConfig {
    /// General API traffic
    pub const API: Self = Self {
        max_requests: 100,
        window_ms: 15 * 60 * 1000,
    };

    /// Agent (LLM) calls
    pub const AGENT: Self = Self {
        max_requests: 20,
        window_ms: 60 * 1000,
    };

    /// Credential endpoints
    pub const AUTH: Self = Self {
        max_requests: 5,
        window_ms: 15 * 60 * 1000,
    };
}

/// Outcome of [`RateLimiter::admit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { remaining: u32 },
    Denied { retry_after_secs: u64 },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// Read-only view of an identity's window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStats {
    pub limit: u32,
    pub used: u32,
    pub remaining: u32,
    /// Seconds until the oldest counted request leaves the window
    pub reset_after_seconds: u64,
}

/// Probability that an `admit` call also sweeps expired identities
pub const DEFAULT_SWEEP_PROBABILITY: f64 = 0.01;

/// Per-identity sliding-window limiter.
///
/// A timestamp `t` counts while `now - window_ms < t <= now`. Admission is
/// atomic: prune, check, and append happen under one lock.
pub struct RateLimiter {
    config: RateLimitConfig,
    sweep_probability: f64,
    windows: Mutex<HashMap<String, VecDeque<u64>>>,
}

pub type SharedRateLimiter = Arc<RateLimiter>;

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_sweep_probability(config, DEFAULT_SWEEP_PROBABILITY)
    }

    pub fn with_sweep_probability(config: RateLimitConfig, sweep_probability: f64) -> Self {
        Self {
            config: RateLimitConfig {
                max_requests: config.max_requests.max(1),
                window_ms: config.window_ms.max(1),
            },
            sweep_probability: sweep_probability.clamp(0.0, 1.0),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<u64>>> {
        // A panic while holding the lock cannot leave a window half-updated
        self.windows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_live(&self, timestamp: u64, now: u64) -> bool {
        timestamp.saturating_add(self.config.window_ms) > now
    }

    /// Admit or deny a request for `identity` at `now` (epoch milliseconds)
    pub fn admit(&self, identity: &str, now: u64) -> Admission {
        let mut windows = self.lock();

        if self.sweep_probability > 0.0 && rand::random::<f64>() < self.sweep_probability {
            self.sweep_locked(&mut windows, now);
        }

        let window = windows.entry(identity.to_string()).or_default();
        while let Some(&oldest) = window.front() {
            if self.is_live(oldest, now) {
                break;
            }
            window.pop_front();
        }

        if window.len() as u64 >= u64::from(self.config.max_requests) {
            let oldest = window.front().copied().unwrap_or(now);
            let wait_ms = (oldest + self.config.window_ms).saturating_sub(now);
            let retry_after_secs = wait_ms.div_ceil(1000);
            tracing::debug!(identity = %identity, retry_after_secs, "Rate limit exceeded");
            return Admission::Denied { retry_after_secs };
        }

        window.push_back(now);
        Admission::Admitted {
            remaining: self.config.max_requests - window.len() as u32,
        }
    }

    /// Usage for `identity` at `now`, without mutating any state
    pub fn stats(&self, identity: &str, now: u64) -> RateLimitStats {
        let windows = self.lock();
        let live: Vec<u64> = windows
            .get(identity)
            .map(|w| w.iter().copied().filter(|&t| self.is_live(t, now)).collect())
            .unwrap_or_default();

        let used = (live.len() as u32).min(self.config.max_requests);
        let reset_after_seconds = live
            .first()
            .map(|oldest| (oldest + self.config.window_ms).saturating_sub(now).div_ceil(1000))
            .unwrap_or(0);

        RateLimitStats {
            limit: self.config.max_requests,
            used,
            remaining: self.config.max_requests - used,
            reset_after_seconds,
        }
    }

    /// Forget everything about `identity`
    pub fn reset(&self, identity: &str) {
        self.lock().remove(identity);
    }

    /// Drop identities whose windows have fully expired
    pub fn sweep(&self, now: u64) {
        let mut windows = self.lock();
        self.sweep_locked(&mut windows, now);
    }

    fn sweep_locked(&self, windows: &mut HashMap<String, VecDeque<u64>>, now: u64) {
        let before = windows.len();
        windows.retain(|_, window| window.back().is_some_and(|&newest| self.is_live(newest, now)));
        let removed = before - windows.len();
        if removed > 0 {
            tracing::debug!(removed, "Swept expired rate-limit windows");
        }
    }

    /// Number of identities currently tracked
    pub fn tracked_identities(&self) -> usize {
        self.lock().len()
    }
}

/// Current wall-clock time in epoch milliseconds
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Identity used for HTTP rate limiting: `x-user-id`, then `x-forwarded-for`
pub fn identity_from_headers(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty())
    };
    header("x-user-id")
        .or_else(|| header("x-forwarded-for"))
        .unwrap_or_else(|| "anonymous".to_string())
}

pub async fn rate_limit_middleware(
    State(limiter): State<SharedRateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let identity = identity_from_headers(request.headers());
    match limiter.admit(&identity, now_ms()) {
        Admission::Admitted { .. } => next.run(request).await,
        Admission::Denied { retry_after_secs } => {
            DomainError::rate_limited("Too many requests, please try again later", Some(retry_after_secs))
                .into_response()
        }
    }
}

pub fn create_limiter(config: RateLimitConfig, sweep_probability: f64) -> SharedRateLimiter {
    Arc::new(RateLimiter::with_sweep_probability(config, sweep_probability))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, window_ms: u64) -> RateLimiter {
        RateLimiter::with_sweep_probability(
            RateLimitConfig {
                max_requests,
                window_ms,
            },
            0.0,
        )
    }

    #[test]
    fn test_window_scenario() {
        let limiter = limiter(2, 1000);
        assert!(limiter.admit("u", 0).is_admitted());
        assert!(limiter.admit("u", 100).is_admitted());
        assert_eq!(limiter.admit("u", 200), Admission::Denied { retry_after_secs: 1 });
        assert!(limiter.admit("u", 1001).is_admitted());
    }

    #[test]
    fn test_retry_after_is_sufficient_and_minimal() {
        for deny_at in [0u64, 1, 250, 999] {
            let limiter = limiter(1, 1000);
            assert!(limiter.admit("u", 0).is_admitted());
            let Admission::Denied { retry_after_secs } = limiter.admit("u", deny_at) else {
                panic!("expected denial at {}", deny_at);
            };

            let retry_at = deny_at + retry_after_secs * 1000;
            assert!(limiter.stats("u", retry_at).remaining > 0);
            if retry_after_secs > 0 {
                let earlier = deny_at + (retry_after_secs - 1) * 1000;
                assert_eq!(limiter.stats("u", earlier).remaining, 0);
            }
            assert!(limiter.admit("u", retry_at).is_admitted());
        }
    }

    #[test]
    fn test_no_window_exceeds_quota() {
        let limiter = limiter(3, 1000);
        let mut admitted = Vec::new();
        for t in (0..5000).step_by(70) {
            if limiter.admit("u", t).is_admitted() {
                admitted.push(t);
            }
        }

        for &start in &admitted {
            let in_window = admitted.iter().filter(|&&t| t >= start && t < start + 1000).count();
            assert!(in_window <= 3, "window starting at {} admitted {}", start, in_window);
        }
    }

    #[test]
    fn test_identities_are_independent() {
        let limiter = limiter(1, 1000);
        assert!(limiter.admit("a", 0).is_admitted());
        assert!(!limiter.admit("a", 1).is_admitted());
        assert!(limiter.admit("b", 1).is_admitted());
    }

    #[test]
    fn test_stats_agree_with_admit() {
        let limiter = limiter(2, 1000);
        assert_eq!(limiter.stats("u", 0).remaining, 2);
        limiter.admit("u", 0);
        limiter.admit("u", 10);

        let stats = limiter.stats("u", 500);
        assert_eq!(stats.used, 2);
        assert_eq!(stats.remaining, 0);
        assert_eq!(stats.reset_after_seconds, 1);
        assert!(!limiter.admit("u", 500).is_admitted());

        assert_eq!(limiter.stats("u", 1000).remaining, 1);
        assert!(limiter.admit("u", 1000).is_admitted());
    }

    #[test]
    fn test_reset_clears_window() {
        let limiter = limiter(1, 60_000);
        limiter.admit("u", 0);
        assert!(!limiter.admit("u", 1).is_admitted());
        limiter.reset("u");
        assert!(limiter.admit("u", 2).is_admitted());
    }

    #[test]
    fn test_sweep_only_drops_expired_identities() {
        let limiter = limiter(5, 1000);
        limiter.admit("old", 0);
        limiter.admit("fresh", 900);
        assert_eq!(limiter.tracked_identities(), 2);

        limiter.sweep(1500);
        assert_eq!(limiter.tracked_identities(), 1);
        assert_eq!(limiter.stats("fresh", 1500).used, 1);
    }

    #[test]
    fn test_concurrent_admission_never_over_admits() {
        let limiter = Arc::new(limiter(50, 60_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..20).filter(|_| limiter.admit("u", 1).is_admitted()).count())
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 50);
    }

    #[test]
    fn test_identity_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(identity_from_headers(&headers), "anonymous");
        headers.insert("x-forwarded-for", "10.0.0.1, 10.0.0.2".parse().unwrap());
        assert_eq!(identity_from_headers(&headers), "10.0.0.1");
        headers.insert("x-user-id", "founder-1".parse().unwrap());
        assert_eq!(identity_from_headers(&headers), "founder-1");
    }
}
