use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_PER_WINDOW: u32 = 5;
const CLEANUP_INTERVAL: Duration = Duration::from_secs(600);

/// Volatile-token scrubbers, applied in order: the more specific shapes
/// (UUIDs) run before the generic ones (bare 10-13 digit integers) so a
/// partial replacement cannot leave half a token behind.
static NORMALIZERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
        r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:?\d{2})?",
        r"\[\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\]",
        r"0x[0-9a-fA-F]+",
        r"\b\d{10,13}\b",
        r"request[_-]?id[=:]\s*[^\s,}\]]+",
        r"(pid[=:]\s*|process\s+)\d+",
        r":\d{4,5}/",
        r"session[_-]?id[=:]\s*[^\s,}\]]+",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("normalizer pattern"))
    .collect()
});

#[derive(Debug, Clone)]
pub struct DedupEntry {
    pub signature_hash: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrence_count: u64,
    window_start: DateTime<Utc>,
    window_count: u32,
}

struct DedupInner {
    entries: HashMap<String, DedupEntry>,
    rate_window: Duration,
    max_per_window: u32,
}

/// Collapses repeated errors into signature classes and rate-limits how often
/// each class may be emitted inside a sliding window.
pub struct Deduplicator {
    inner: Mutex<DedupInner>,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Deduplicator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(DedupInner {
                entries: HashMap::new(),
                rate_window: DEFAULT_RATE_WINDOW,
                max_per_window: DEFAULT_MAX_PER_WINDOW,
            }),
        }
    }

    /// Decides whether an error line should produce an event. Always returns
    /// the entry so suppressed occurrences remain visible through stats.
    pub fn should_emit(&self, error_line: &str) -> (bool, DedupEntry) {
        let hash = signature(error_line);
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("dedup lock poisoned");
        let rate_window =
            chrono::Duration::from_std(inner.rate_window).unwrap_or(chrono::Duration::zero());
        let max_per_window = inner.max_per_window;

        let entry = inner.entries.entry(hash.clone()).or_insert(DedupEntry {
            signature_hash: hash,
            first_seen: now,
            last_seen: now,
            occurrence_count: 0,
            window_start: now,
            window_count: 0,
        });

        if entry.occurrence_count == 0 {
            entry.occurrence_count = 1;
            entry.window_count = 1;
            return (true, entry.clone());
        }

        entry.last_seen = now;
        entry.occurrence_count += 1;

        if now.signed_duration_since(entry.window_start) > rate_window {
            entry.window_start = now;
            entry.window_count = 1;
            return (true, entry.clone());
        }

        entry.window_count += 1;
        if entry.window_count <= max_per_window {
            return (true, entry.clone());
        }

        (false, entry.clone())
    }

    pub fn set_rate_window(&self, window: Duration) {
        self.inner.lock().expect("dedup lock poisoned").rate_window = window;
    }

    pub fn set_max_per_window(&self, max: u32) {
        self.inner.lock().expect("dedup lock poisoned").max_per_window = max;
    }

    /// Unique signatures seen and total occurrences across them, including
    /// suppressed ones.
    pub fn stats(&self) -> (usize, u64) {
        let inner = self.inner.lock().expect("dedup lock poisoned");
        let total = inner.entries.values().map(|e| e.occurrence_count).sum();
        (inner.entries.len(), total)
    }

    /// Periodically drops signatures not seen for two rate windows.
    pub fn spawn_evictor(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let dedup = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(CLEANUP_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tick.tick() => dedup.evict_stale(Utc::now()),
                }
            }
        })
    }

    fn evict_stale(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("dedup lock poisoned");
        let window =
            chrono::Duration::from_std(inner.rate_window).unwrap_or(chrono::Duration::zero());
        let cutoff = now - window * 2;
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.last_seen >= cutoff);
        let evicted = before - inner.entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, "evicted stale dedup entries");
        }
    }
}

/// First 8 bytes of SHA-256 over the normalized line, hex-encoded.
pub fn signature(error_line: &str) -> String {
    let normalized = normalize(error_line);
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(&digest[..8])
}

/// Strips volatile tokens and collapses whitespace so equivalent errors hash
/// identically.
pub fn normalize(error_line: &str) -> String {
    let mut result = error_line.to_string();
    for pattern in NORMALIZERS.iter() {
        result = pattern.replace_all(&result, "").into_owned();
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
