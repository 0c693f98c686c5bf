use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use kulima_core::util::user_fingerprint;
use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::error::AppError;

/// Fixed-window request limiter keyed by endpoint and caller.
///
/// Windows that have run out are dropped at most once per window length,
/// so the map only holds callers seen recently.
#[derive(Clone)]
pub struct EndpointRateLimiter {
    state: Arc<Mutex<LimiterState>>,
    window: Duration,
    batch_limit: u32,
    status_limit: u32,
    metrics: Arc<RateLimitMetrics>,
}

#[derive(Clone, Copy)]
pub enum ProtectedEndpoint {
    SyncBatch,
    SyncStatus,
}

struct LimiterState {
    windows: HashMap<String, RateWindow>,
    last_sweep: Instant,
}

#[derive(Default)]
struct RateLimitMetrics {
    sync_batch_allowed: AtomicU64,
    sync_batch_limited: AtomicU64,
    sync_status_allowed: AtomicU64,
    sync_status_limited: AtomicU64,
    tracked_windows: AtomicU64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RateLimitMetricsSnapshot {
    pub sync_batch_allowed: u64,
    pub sync_batch_limited: u64,
    pub sync_status_allowed: u64,
    pub sync_status_limited: u64,
    /// Open (endpoint, caller) windows held in memory.
    pub tracked_windows: u64,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started_at: Instant,
    count: u32,
}

impl EndpointRateLimiter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.rate_limit_window,
            config.sync_batch_rate_limit_per_window,
            config.sync_status_rate_limit_per_window,
        )
    }

    fn new(window: Duration, batch_limit: u32, status_limit: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(LimiterState {
                windows: HashMap::new(),
                last_sweep: Instant::now(),
            })),
            window,
            batch_limit,
            status_limit,
            metrics: Arc::new(RateLimitMetrics::default()),
        }
    }

    pub async fn check(&self, endpoint: ProtectedEndpoint, user_id: &str) -> Result<(), AppError> {
        let limit = match endpoint {
            ProtectedEndpoint::SyncBatch => self.batch_limit,
            ProtectedEndpoint::SyncStatus => self.status_limit,
        };

        let key = format!("{}:{user_id}", endpoint.label());
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if now.duration_since(state.last_sweep) >= self.window {
            let before = state.windows.len();
            state
                .windows
                .retain(|_, window| now.duration_since(window.started_at) < self.window);
            state.last_sweep = now;
            tracing::debug!(
                dropped = before - state.windows.len(),
                remaining = state.windows.len(),
                "Swept expired rate limit windows"
            );
        }

        let entry = state.windows.entry(key).or_insert(RateWindow {
            started_at: now,
            count: 0,
        });

        if now.duration_since(entry.started_at) >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }

        let result = if entry.count >= limit {
            let retry_after_secs = self
                .window
                .saturating_sub(now.duration_since(entry.started_at))
                .as_secs()
                .max(1);
            self.counter(endpoint, false).fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                endpoint = endpoint.label(),
                user = user_fingerprint(user_id),
                retry_after_secs,
                "Rate limit exceeded"
            );
            Err(AppError::too_many_requests(
                "Rate limit exceeded for sync endpoint",
                retry_after_secs,
            ))
        } else {
            entry.count += 1;
            self.counter(endpoint, true).fetch_add(1, Ordering::Relaxed);
            Ok(())
        };

        self.metrics
            .tracked_windows
            .store(u64::try_from(state.windows.len()).unwrap_or(u64::MAX), Ordering::Relaxed);
        result
    }

    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            sync_batch_allowed: self.metrics.sync_batch_allowed.load(Ordering::Relaxed),
            sync_batch_limited: self.metrics.sync_batch_limited.load(Ordering::Relaxed),
            sync_status_allowed: self.metrics.sync_status_allowed.load(Ordering::Relaxed),
            sync_status_limited: self.metrics.sync_status_limited.load(Ordering::Relaxed),
            tracked_windows: self.metrics.tracked_windows.load(Ordering::Relaxed),
        }
    }

    fn counter(&self, endpoint: ProtectedEndpoint, allowed: bool) -> &AtomicU64 {
        match (endpoint, allowed) {
            (ProtectedEndpoint::SyncBatch, true) => &self.metrics.sync_batch_allowed,
            (ProtectedEndpoint::SyncBatch, false) => &self.metrics.sync_batch_limited,
            (ProtectedEndpoint::SyncStatus, true) => &self.metrics.sync_status_allowed,
            (ProtectedEndpoint::SyncStatus, false) => &self.metrics.sync_status_limited,
        }
    }
}

impl ProtectedEndpoint {
    pub const fn label(self) -> &'static str {
        match self {
            Self::SyncBatch => "sync_batch",
            Self::SyncStatus => "sync_status",
        }
    }
}
