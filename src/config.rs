use std::time::Duration;

/// Page size and cache capacity, plus the lock-wait timeout that
/// bounds how long a blocked acquisition waits before aborting. Kept
/// as fields on an owned struct rather than module-level constants so
/// tests can tighten the timeout per case (e.g. to shrink the window
/// for a deadlock test) without affecting other tests sharing the
/// process.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub page_size: usize,
    pub capacity: usize,
    pub lock_timeout: Duration,
}

impl Config {
    pub fn new(page_size: usize, capacity: usize) -> Self {
        Self {
            page_size,
            capacity,
            lock_timeout: Duration::from_millis(500),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(4096, 50)
    }
}
