//! Event debouncing for the native scanner.
//!
//! Large dataset uploads arrive as long bursts of writes per file (rsync,
//! SMB copies, editors saving sidecars). A path is only forwarded once it
//! has been quiet for the configured window; the last event kind wins.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Whether a settled path was first seen or modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Added,
    Changed,
}

/// Tracks in-flight paths until they settle.
#[derive(Debug)]
pub struct Debouncer {
    pending: HashMap<String, (PendingKind, Instant)>,
    window: Duration,
}

impl Debouncer {
    pub fn new(window_ms: u64) -> Self {
        Self {
            pending: HashMap::new(),
            window: Duration::from_millis(window_ms),
        }
    }

    /// Record an observation, restarting the settle window. An `Added`
    /// followed by writes stays `Added`.
    pub fn record(&mut self, path: String, kind: PendingKind) {
        let kind = match self.pending.get(&path) {
            Some((PendingKind::Added, _)) => PendingKind::Added,
            _ => kind,
        };
        self.pending.insert(path, (kind, Instant::now()));
    }

    /// Drop a path (its unlink arrived before it settled).
    pub fn remove(&mut self, path: &str) {
        self.pending.remove(path);
    }

    /// Take every path that has been quiet for the full window.
    pub fn take_settled(&mut self) -> Vec<(String, PendingKind)> {
        let now = Instant::now();
        let mut settled = Vec::new();
        self.pending.retain(|path, (kind, last_seen)| {
            if now.duration_since(*last_seen) >= self.window {
                settled.push((path.clone(), *kind));
                false
            } else {
                true
            }
        });
        settled
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
