//! Per-user sliding window rate limiting.

use crate::types::{Timestamp, UserId};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateCheck {
    pub allowed: bool,
    /// Calls inside the window, including this one.
    pub count: usize,
    pub limit: usize,
}

/// Counts calls per user over a trailing window. Each user has their own
/// lock so one busy user never blocks another.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    window_ms: i64,
    windows: RwLock<HashMap<UserId, Arc<Mutex<VecDeque<Timestamp>>>>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window_ms: i64) -> Self {
        Self {
            max_calls,
            window_ms,
            windows: RwLock::new(HashMap::new()),
        }
    }

    fn window_for(&self, user_id: UserId) -> Arc<Mutex<VecDeque<Timestamp>>> {
        if let Some(window) = self.windows.read().get(&user_id) {
            return window.clone();
        }
        self.windows
            .write()
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .clone()
    }

    // record first, then count. the call that pushes the window past the limit is
    // the first one refused
    pub fn check(&self, user_id: UserId, now: Timestamp) -> RateCheck {
        let window = self.window_for(user_id);
        let mut calls = window.lock();
        calls.push_back(now);

        let cutoff = now.minus_millis(self.window_ms);
        while calls.front().is_some_and(|t| *t <= cutoff) {
            calls.pop_front();
        }

        let count = calls.len();
        let allowed = count <= self.max_calls;
        if !allowed {
            warn!(user_id = %user_id, count, limit = self.max_calls, "rate limit exceeded");
        }
        RateCheck {
            allowed,
            count,
            limit: self.max_calls,
        }
    }

    pub fn reset(&self, user_id: UserId) {
        self.windows.write().remove(&user_id);
    }
}
