//! Per-client admission gate.
//!
//! Fixed window counting: each client key owns a window start and a count.
//! A request is admitted while the count is below the ceiling; the window
//! restarts once a full width has elapsed since its start. Rejected requests
//! do not count against the client.
//!
//! Windows that expired more than a grace period ago are evicted, both
//! inline (when the table grows past a threshold) and by a background task.

use crate::config::settings::RateLimitConfig;
use crate::utils::{set_header, Clock};
use hyper::HeaderMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

/// Counting state of one client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub window_start: Instant,
    pub count: u32,
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the client's window restarts
    pub reset_after: Duration,
}

#[derive(Debug, Default)]
struct GateState {
    windows: HashMap<String, RateWindow>,
    last_sweep: Option<Instant>,
}

#[derive(Debug)]
pub struct AdmissionGate {
    state: Mutex<GateState>,
    max_requests: u32,
    window: Duration,
    grace: Duration,
    cleanup_threshold: usize,
    cleanup_interval: Duration,
}

impl AdmissionGate {
    /// Gate with `max_requests` per `window`, a one-window grace period and
    /// inline sweeping disabled
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            max_requests,
            window,
            grace: window,
            cleanup_threshold: usize::MAX,
            cleanup_interval: Duration::from_secs(60),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            grace: config.grace(),
            cleanup_threshold: config.cleanup_threshold,
            cleanup_interval: config.cleanup_interval(),
            ..Self::new(config.max_requests, config.window())
        }
    }

    /// Admit or reject one request from `key` at `now`
    pub fn check(&self, key: &str, now: Instant) -> RateDecision {
        let mut state = self.lock();

        if state.windows.len() > self.cleanup_threshold {
            let due = state
                .last_sweep
                .map_or(true, |last| now.saturating_duration_since(last) >= self.cleanup_interval);
            if due {
                self.sweep_locked(&mut state, now);
            }
        }

        let window = state
            .windows
            .entry(key.to_string())
            .or_insert(RateWindow { window_start: now, count: 0 });

        if now.saturating_duration_since(window.window_start) >= self.window {
            window.window_start = now;
            window.count = 0;
        }

        let allowed = window.count < self.max_requests;
        if allowed {
            window.count += 1;
        }

        let elapsed = now.saturating_duration_since(window.window_start);
        RateDecision {
            allowed,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(window.count),
            reset_after: self.window.saturating_sub(elapsed),
        }
    }

    pub fn admit(&self, key: &str, now: Instant) -> bool {
        self.check(key, now).allowed
    }

    /// Evict windows that expired more than the grace period ago. Returns the
    /// number of evicted entries.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut state = self.lock();
        self.sweep_locked(&mut state, now)
    }

    /// Number of tracked clients
    pub fn len(&self) -> usize {
        self.lock().windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweep on a fixed interval until the returned task is aborted
    pub fn spawn_sweeper(self: Arc<Self>, clock: Arc<dyn Clock>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep(clock.now());
            }
        })
    }

    fn sweep_locked(&self, state: &mut GateState, now: Instant) -> usize {
        let ttl = self.window.saturating_add(self.grace);
        let before = state.windows.len();
        state
            .windows
            .retain(|_, window| now.saturating_duration_since(window.window_start) < ttl);
        state.last_sweep = Some(now);

        let removed = before - state.windows.len();
        if removed > 0 {
            debug!(
                removed_entries = removed,
                remaining_entries = state.windows.len(),
                "Rate limiter cleanup completed"
            );
        }
        removed
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        // Counters stay usable even if a holder panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RateDecision {
    /// Whole seconds until the window restarts, rounded up
    pub fn reset_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    /// Attach `RateLimit-*` headers, plus `Retry-After` on rejection
    pub fn apply_headers(&self, headers: &mut HeaderMap, window: Duration) {
        set_header(headers, "ratelimit-policy", &format!("{};w={}", self.limit, window.as_secs()));
        set_header(headers, "ratelimit-limit", &self.limit.to_string());
        set_header(headers, "ratelimit-remaining", &self.remaining.to_string());
        set_header(headers, "ratelimit-reset", &self.reset_secs().to_string());
        if !self.allowed {
            set_header(headers, "retry-after", &self.reset_secs().to_string());
        }
    }
}
