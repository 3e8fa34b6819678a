//! Clock abstraction for deterministic time in gate control paths.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond clock used for decision TTLs and verification deadlines.
pub trait Clock: Send + Sync {
    /// Milliseconds since UNIX epoch.
    fn now_ms(&self) -> u64;
}

/// System (production) clock. Wraps `SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Virtual (deterministic) clock with manual control, for tests.
#[derive(Debug)]
pub struct VirtualClock {
    inner: Mutex<u64>,
}

impl VirtualClock {
    /// Create a new virtual clock seeded at `start_ms`.
    pub fn new(start_ms: u64) -> Self {
        Self { inner: Mutex::new(start_ms) }
    }

    /// Advance the virtual clock by `delta_ms`.
    pub fn advance_ms(&self, delta_ms: u64) {
        let mut now = self.inner.lock().expect("virtual clock lock poisoned");
        *now = now.saturating_add(delta_ms);
    }

    /// Set the virtual clock to an absolute ms value.
    pub fn set_ms(&self, value: u64) {
        *self.inner.lock().expect("virtual clock lock poisoned") = value;
    }
}

impl Clock for VirtualClock {
    fn now_ms(&self) -> u64 {
        *self.inner.lock().expect("virtual clock lock poisoned")
    }
}
