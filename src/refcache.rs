//! Persistent reference cache with TTL expiry and single-flight resolution.
//!
//! Every distinct reference key gets at most one real resolution attempt per
//! run, no matter how many concurrent document tasks demand it. Results are
//! timestamped and can be persisted as a warm cache for the next run.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// Outcome of resolving a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefStatus {
    /// Target exists / responded successfully.
    Valid,
    /// Target definitively missing (404, file not found).
    Invalid,
    /// Probe failed: timeout, connection refused, DNS.
    Error,
}

/// A resolved reference: status plus a human-readable detail for issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckedRef {
    pub status: RefStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckedRef {
    pub fn valid() -> Self {
        Self {
            status: RefStatus::Valid,
            detail: None,
        }
    }

    pub fn invalid(detail: impl Into<String>) -> Self {
        Self {
            status: RefStatus::Invalid,
            detail: Some(detail.into()),
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            status: RefStatus::Error,
            detail: Some(detail.into()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == RefStatus::Valid
    }
}

/// Persisted form: one record per key. Unknown fields from newer versions
/// are ignored on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    status: RefStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    timestamp: DateTime<Utc>,
}

/// Deduplicating, TTL-based, persistable key→status cache.
pub struct RefCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
    /// In-flight resolutions: concurrent callers for one key share a cell.
    inflight: Mutex<HashMap<String, Arc<OnceCell<CheckedRef>>>>,
}

impl RefCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_secs as i64),
            entries: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh entry for `key`, if one exists. Entries older than the TTL are
    /// treated as absent; they are overwritten on the next resolution rather
    /// than swept.
    pub fn get(&self, key: &str) -> Option<CheckedRef> {
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(key)?;
        if Utc::now() - entry.timestamp < self.ttl {
            Some(CheckedRef {
                status: entry.status,
                detail: entry.detail.clone(),
            })
        } else {
            None
        }
    }

    /// Store a result for `key`, timestamped now.
    pub fn insert(&self, key: &str, result: CheckedRef) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            CacheEntry {
                status: result.status,
                detail: result.detail,
                timestamp: Utc::now(),
            },
        );
    }

    /// Resolve `key`, invoking `resolver` at most once per run regardless of
    /// concurrent demand. Returns the result and whether it came from the
    /// cache (or an in-flight resolution started by another caller) rather
    /// than from running `resolver` here.
    pub async fn resolve<F, Fut>(&self, key: &str, resolver: F) -> (CheckedRef, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CheckedRef>,
    {
        if let Some(hit) = self.get(key) {
            return (hit, true);
        }

        let cell = {
            let mut inflight = self.inflight.lock().unwrap();
            // Another caller may have finished (storing its entry and
            // clearing its cell) between the miss above and taking this
            // lock. Entries land before cells are cleared, so re-checking
            // here closes that window.
            if let Some(hit) = self.get(key) {
                return (hit, true);
            }
            Arc::clone(
                inflight
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let mut ran = false;
        let result = cell
            .get_or_init(|| {
                ran = true;
                resolver()
            })
            .await
            .clone();

        if ran {
            // Store before clearing the marker so later callers hit the
            // fresh entry instead of racing onto a new cell.
            self.insert(key, result.clone());
            self.inflight.lock().unwrap().remove(key);
        }

        (result, !ran)
    }

    /// Restore a persisted snapshot. A missing file is a cold start and
    /// returns Ok(0); an unreadable or unparseable snapshot is an error the
    /// caller should surface, leaving the cache empty.
    pub fn load(&self, path: &Path) -> Result<usize> {
        if !path.exists() {
            return Ok(0);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cache {}", path.display()))?;
        let loaded: HashMap<String, CacheEntry> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse cache {}", path.display()))?;
        let count = loaded.len();
        *self.entries.lock().unwrap() = loaded;
        Ok(count)
    }

    /// Write all entries, valid and invalid, with their timestamps.
    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let entries = self.entries.lock().unwrap();
        let json = serde_json::to_string(&*entries)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write cache {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
