// =============================================================================
// Topic Cache: Deduplicates scans and verifications by normalized topic
// =============================================================================
//
// Keys are normalized topics (lower-case alphanumeric words separated by a
// single space), so "Bank run at XYZ!" and "bank  run at xyz" share an entry.
//
// An entry is one of:
//   Scanned: the cheap scan already evaluated this topic
//   InFlight: a deep verification holds the claim for this key
//   Verified: a deep verification completed and produced an alert
//
// Every entry carries its own expiry. Expired entries are evicted on lookup
// and reported as `Stale` so the caller refetches. The in-flight claim gives
// at-most-one concurrent verification per key; its expiry bounds how long a
// lost claim can block the key.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::trace;

/// Normalize a free-text topic into a cache key.
pub fn normalize_topic(topic: &str) -> String {
    topic
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntryKind {
    Scanned { confidence: f64 },
    InFlight,
    Verified { alert_id: String, severity: u8 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    #[serde(flatten)]
    pub kind: EntryKind,
    pub expires_at: DateTime<Utc>,
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(EntryKind),
    Miss,
    /// An entry existed but had expired; it has been evicted.
    Stale,
    /// A verification for this key is in progress.
    InFlight,
}

pub struct TopicCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl TopicCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn lookup_at(&self, key: &str, now: DateTime<Utc>) -> CacheLookup {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return CacheLookup::Miss,
                Some(e) if now < e.expires_at => {
                    return match &e.kind {
                        EntryKind::InFlight => CacheLookup::InFlight,
                        kind => CacheLookup::Hit(kind.clone()),
                    };
                }
                Some(_) => {}
            }
        }
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(e) if now >= e.expires_at => {
                entries.remove(key);
                trace!(key, "stale cache entry evicted");
                CacheLookup::Stale
            }
            // Replaced between the two locks.
            Some(e) => match &e.kind {
                EntryKind::InFlight => CacheLookup::InFlight,
                kind => CacheLookup::Hit(kind.clone()),
            },
            None => CacheLookup::Miss,
        }
    }

    pub fn record_scan(&self, key: &str, confidence: f64, now: DateTime<Utc>) {
        self.insert(key, EntryKind::Scanned { confidence }, now);
    }

    /// Take the verification claim for `key`. Returns false when another
    /// live claim holds it.
    pub fn claim(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut entries = self.entries.write();
        if let Some(e) = entries.get(key) {
            if e.kind == EntryKind::InFlight && now < e.expires_at {
                return false;
            }
        }
        entries.insert(
            key.to_string(),
            CacheEntry {
                kind: EntryKind::InFlight,
                expires_at: now + self.ttl,
            },
        );
        true
    }

    /// Drop an in-flight claim without recording a result.
    pub fn release(&self, key: &str) {
        let mut entries = self.entries.write();
        if matches!(entries.get(key), Some(e) if e.kind == EntryKind::InFlight) {
            entries.remove(key);
        }
    }

    /// Drop a scanned entry so the next poll evaluates the topic afresh.
    /// Claims and verified results are left alone.
    pub fn forget_scan(&self, key: &str) {
        let mut entries = self.entries.write();
        if matches!(entries.get(key), Some(e) if matches!(e.kind, EntryKind::Scanned { .. })) {
            entries.remove(key);
        }
    }

    /// Replace the claim with a verified result.
    pub fn complete(&self, key: &str, alert_id: &str, severity: u8, now: DateTime<Utc>) {
        self.insert(
            key,
            EntryKind::Verified {
                alert_id: alert_id.to_string(),
                severity,
            },
            now,
        );
    }

    /// Evict every expired entry. Returns the number removed.
    pub fn prune_at(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| now < e.expires_at);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, key: &str, kind: EntryKind, now: DateTime<Utc>) {
        self.entries.write().insert(
            key.to_string(),
            CacheEntry {
                kind,
                expires_at: now + self.ttl,
            },
        );
    }
}

impl std::fmt::Debug for TopicCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicCache")
            .field("ttl_secs", &self.ttl.num_seconds())
            .field("entries", &self.len())
            .finish()
    }
}
