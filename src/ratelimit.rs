//! Per-caller fixed-window admission. In-process only; cross-process
//! coordination is a non-goal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

struct Window {
    count: u32,
    ends_at: Instant,
}

/// Fixed-window counter per derived caller key. The map lock is only taken
/// to find or create an entry; counters mutate under the per-entry lock.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    entries: RwLock<HashMap<String, Arc<Mutex<Window>>>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Admit or reject one request for `key`.
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> bool {
        let entry = self.entry(key, now);
        let mut window = entry.lock().unwrap_or_else(|e| e.into_inner());
        if now >= window.ends_at {
            window.count = 1;
            window.ends_at = now + self.window;
            return true;
        }
        if window.count < self.limit {
            window.count += 1;
            return true;
        }
        false
    }

    fn entry(&self, key: &str, now: Instant) -> Arc<Mutex<Window>> {
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = entries.get(key) {
                return Arc::clone(entry);
            }
        }
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(entries.entry(key.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(Window {
                count: 0,
                ends_at: now + self.window,
            }))
        }))
    }

    /// Discard entries whose window has closed. Run periodically.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, entry| {
            let window = entry.lock().unwrap_or_else(|e| e.into_inner());
            now < window.ends_at
        });
    }

    pub fn tracked_keys(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check_at("k", now));
        assert!(limiter.check_at("k", now));
        assert!(limiter.check_at("k", now));
        assert!(!limiter.check_at("k", now));
    }

    #[test]
    fn fresh_window_always_admits_first_request() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check_at("k", now));
        assert!(!limiter.check_at("k", now));
        let later = now + Duration::from_secs(61);
        assert!(limiter.check_at("k", later));
        assert!(!limiter.check_at("k", later));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check_at("a", now));
        assert!(limiter.check_at("b", now));
        assert!(!limiter.check_at("a", now));
    }

    #[test]
    fn sweep_discards_closed_windows() {
        let limiter = RateLimiter::new(5, Duration::from_millis(1));
        let now = Instant::now();
        limiter.check_at("old", now - Duration::from_secs(10));
        limiter.check_at("live", now + Duration::from_secs(10));
        assert_eq!(limiter.tracked_keys(), 2);
        limiter.sweep();
        assert_eq!(limiter.tracked_keys(), 1);
    }
}
