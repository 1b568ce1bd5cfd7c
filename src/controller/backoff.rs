//! Requeue backoff for nodes whose cloud status has not settled
//!
//! Attempt counters live in the scheduler adapter only; the reconciliation pass
//! itself never sees them.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Calculate exponential backoff delay for retry attempts
///
/// # Arguments
/// * `attempt` - Current retry attempt number (0-indexed)
/// * `base_delay_secs` - Base delay in seconds (default: 15)
/// * `max_delay_secs` - Maximum delay cap in seconds (default: 300 = 5 minutes)
pub fn calculate_backoff(
    attempt: u32,
    base_delay_secs: Option<u64>,
    max_delay_secs: Option<u64>,
) -> Duration {
    let base = base_delay_secs.unwrap_or(15);
    let max = max_delay_secs.unwrap_or(300);

    // Exponential: base * 2^attempt, capped at max
    let delay_secs = base.saturating_mul(2_u64.saturating_pow(attempt.min(16)));
    Duration::from_secs(delay_secs.min(max))
}

#[derive(Debug, Clone, Copy)]
struct Attempts {
    count: u32,
    touched: Instant,
}

/// Per-node requeue attempt counters
///
/// The kube-rs scheduler never runs a pass for a node that has left its cache,
/// so a counter can outlive its node. Counters untouched for twice the maximum
/// delay are evicted whenever a new delay is handed out.
#[derive(Debug)]
pub struct RequeueTracker {
    base_delay_secs: u64,
    max_delay_secs: u64,
    attempts: Mutex<HashMap<String, Attempts>>,
}

impl RequeueTracker {
    pub fn new(base_delay_secs: u64, max_delay_secs: u64) -> Self {
        Self {
            base_delay_secs,
            max_delay_secs: max_delay_secs.max(base_delay_secs),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Delay before the next pass for `key`, advancing its attempt counter
    pub fn next_delay(&self, key: &str) -> Duration {
        self.next_delay_at(key, Instant::now())
    }

    fn next_delay_at(&self, key: &str, now: Instant) -> Duration {
        let mut attempts = self.lock();
        evict(&mut attempts, self.stale_after(), now);

        let entry = attempts.entry(key.to_string()).or_insert(Attempts {
            count: 0,
            touched: now,
        });
        let delay = calculate_backoff(
            entry.count,
            Some(self.base_delay_secs),
            Some(self.max_delay_secs),
        );
        entry.count = entry.count.saturating_add(1);
        entry.touched = now;
        delay
    }

    /// Forget `key` once a pass settles
    pub fn reset(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Drop counters not touched since `now - 2 * max delay`; returns how many
    pub fn evict_stale(&self, now: Instant) -> usize {
        evict(&mut self.lock(), self.stale_after(), now)
    }

    pub fn attempts(&self, key: &str) -> u32 {
        self.lock().get(key).map(|a| a.count).unwrap_or(0)
    }

    /// Number of keys currently carrying a counter
    pub fn tracked(&self) -> usize {
        self.lock().len()
    }

    fn stale_after(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs.saturating_mul(2))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Attempts>> {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn evict(attempts: &mut HashMap<String, Attempts>, stale_after: Duration, now: Instant) -> usize {
    let before = attempts.len();
    attempts.retain(|_, a| now.saturating_duration_since(a.touched) <= stale_after);
    before - attempts.len()
}

impl Default for RequeueTracker {
    fn default() -> Self {
        Self::new(15, 300)
    }
}
