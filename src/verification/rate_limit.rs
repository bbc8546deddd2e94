//! Failed-attempt limiting for code verification.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    fn check(&self, user_id: &str, now_ms: i64) -> RateLimitDecision;
    fn record_failure(&self, user_id: &str, now_ms: i64);
    fn reset(&self, user_id: &str);
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check(&self, _user_id: &str, _now_ms: i64) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }

    fn record_failure(&self, _user_id: &str, _now_ms: i64) {}

    fn reset(&self, _user_id: &str) {}
}

/// Locks a user out after `max_failures` mismatches inside a sliding window.
#[derive(Debug)]
pub struct AttemptLimiter {
    max_failures: usize,
    window_ms: i64,
    failures: Mutex<HashMap<String, Vec<i64>>>,
}

impl AttemptLimiter {
    #[must_use]
    pub fn new(max_failures: u32, window_ms: i64) -> Self {
        Self {
            max_failures: usize::try_from(max_failures.max(1)).unwrap_or(usize::MAX),
            window_ms: window_ms.max(1),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Number of users with failures still inside the window.
    #[must_use]
    pub fn tracked_users(&self) -> usize {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl RateLimiter for AttemptLimiter {
    fn check(&self, user_id: &str, now_ms: i64) -> RateLimitDecision {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(attempts) = failures.get_mut(user_id) else {
            return RateLimitDecision::Allowed;
        };
        let window_start = now_ms.saturating_sub(self.window_ms);
        attempts.retain(|&at| at > window_start);
        if attempts.is_empty() {
            failures.remove(user_id);
            return RateLimitDecision::Allowed;
        }
        if attempts.len() >= self.max_failures {
            RateLimitDecision::Limited
        } else {
            RateLimitDecision::Allowed
        }
    }

    fn record_failure(&self, user_id: &str, now_ms: i64) {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let window_start = now_ms.saturating_sub(self.window_ms);
        failures.retain(|_, attempts| {
            attempts.retain(|&at| at > window_start);
            !attempts.is_empty()
        });
        failures
            .entry(user_id.to_string())
            .or_default()
            .push(now_ms);
    }

    fn reset(&self, user_id: &str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(user_id);
    }
}
