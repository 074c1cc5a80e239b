//! Sliding-window rate limiter keyed by `(identity, protocol)`.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use super::policy::RateLimit;

/// A rejected charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaRejection {
    /// Weight already charged inside the window.
    pub used: u32,
    pub limit: u32,
    /// When enough weight will have expired to admit the request.
    pub retry_after: Duration,
}

#[derive(Debug, Default)]
struct Window {
    // (charged at, weight), oldest first
    entries: VecDeque<(Instant, u32)>,
    total: u32,
}

impl Window {
    fn evict(&mut self, now: Instant, span: Duration) {
        while let Some(&(at, weight)) = self.entries.front() {
            if now.duration_since(at) < span {
                break;
            }
            self.entries.pop_front();
            self.total -= weight;
        }
    }
}

/// Shared limiter. Each charge is check-and-record under one lock.
pub struct SlidingWindowLimiter {
    config: Option<RateLimit>,
    windows: Mutex<HashMap<(String, String), Window>>,
}

impl SlidingWindowLimiter {
    pub fn new(config: Option<RateLimit>) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    /// Charge `weight` to `(identity, protocol)` if the window has room.
    pub fn try_consume(
        &self,
        identity: &str,
        class: &str,
        protocol: &str,
        weight: u32,
    ) -> Result<(), QuotaRejection> {
        let Some(config) = &self.config else {
            return Ok(());
        };
        let (window_secs, limit) = config.limit_for(class);
        let span = Duration::from_secs(window_secs);
        let now = Instant::now();

        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = windows
            .entry((identity.to_string(), protocol.to_string()))
            .or_default();
        window.evict(now, span);

        if window.total.saturating_add(weight) > limit {
            // free up enough weight, oldest first
            let mut freed = 0u32;
            let needed = window.total.saturating_add(weight).saturating_sub(limit);
            let mut retry_after = span;
            for &(at, w) in &window.entries {
                freed += w;
                if freed >= needed {
                    retry_after = span.saturating_sub(now.duration_since(at));
                    break;
                }
            }
            return Err(QuotaRejection {
                used: window.total,
                limit,
                retry_after,
            });
        }

        window.entries.push_back((now, weight));
        window.total += weight;
        Ok(())
    }

    /// Drop windows with nothing left in them. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let Some(config) = &self.config else {
            return 0;
        };
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let before = windows.len();
        // the widest window any class uses bounds how long an entry can matter
        let widest = config
            .classes
            .values()
            .filter_map(|c| c.window_secs)
            .chain(std::iter::once(config.window_secs))
            .max()
            .unwrap_or(config.window_secs);
        let span = Duration::from_secs(widest);
        windows.retain(|_, window| {
            window.evict(now, span);
            !window.entries.is_empty()
        });
        before - windows.len()
    }

    /// Number of live `(identity, protocol)` windows.
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or_default()
    }
}
