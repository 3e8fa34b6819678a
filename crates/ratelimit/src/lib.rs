//! Per-actor sliding-window admission control.
//!
//! Each actor gets at most `limit` admissions per `window_seconds`. A
//! refused call records nothing, so a saturated actor is admitted again as
//! soon as an old hit ages out of the window rather than being pushed
//! further back by its own refused attempts.

#![deny(unsafe_code)]

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

/// Outcome of an admission request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Admission {
    /// Whether the action may proceed.
    pub allowed: bool,
    /// Human-readable reason, also used verbatim in skipped receipts.
    pub reason: String,
}

impl Admission {
    fn allowed() -> Self {
        Self { allowed: true, reason: "within rate limit".to_string() }
    }

    fn refused() -> Self {
        Self { allowed: false, reason: "rate limit exceeded".to_string() }
    }
}

/// Sliding-window rate limiter keyed by actor.
///
/// Per-actor histories are mutated only under one guard, so concurrent
/// `accept` calls observe a count equal to some serial ordering.
#[derive(Debug)]
pub struct SlidingWindow {
    limit: usize,
    window_ms: u64,
    hits: Mutex<HashMap<String, Vec<u64>>>,
}

impl SlidingWindow {
    /// A limiter admitting `limit` hits per actor per `window_seconds`.
    pub fn new(limit: usize, window_seconds: u64) -> Self {
        Self {
            limit,
            window_ms: window_seconds.saturating_mul(1000),
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or refuse `actor` at time `now_ms`.
    ///
    /// Hits older than the window are purged first; if the survivors have
    /// already reached the limit the call is refused and nothing is
    /// recorded. Calls sharing an identical `now_ms` are admitted until the
    /// post-increment count would exceed the limit.
    pub fn accept(&self, actor: &str, now_ms: u64) -> Admission {
        let window_start = now_ms.saturating_sub(self.window_ms);
        let mut hits = self.hits.lock().expect("rate limiter lock poisoned");
        let history = hits.entry(actor.to_string()).or_default();
        history.retain(|ts| *ts >= window_start);
        if history.len() >= self.limit {
            return Admission::refused();
        }
        history.push(now_ms);
        Admission::allowed()
    }

    /// Hits currently recorded for `actor` (diagnostics and tests).
    pub fn recorded(&self, actor: &str) -> usize {
        self.hits
            .lock()
            .expect("rate limiter lock poisoned")
            .get(actor)
            .map_or(0, Vec::len)
    }
}
