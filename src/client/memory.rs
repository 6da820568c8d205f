//! In-process backend adapter over a read-write-locked hash map.

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use thiserror::Error;

use super::CacheClient;
use crate::error::BoxError;

/// Error surfaced by [`MemoryClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryClientError {
    /// Key absent, or present but past its deadline.
    #[error("key not found")]
    NotFound,
}

#[derive(Debug)]
struct Entry {
    payload: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// In-memory key/value backend honoring per-entry TTLs.
///
/// Expired entries report a miss on read and on delete; expiry is checked
/// lazily, there is no sweeper thread.
#[derive(Debug, Default)]
pub struct MemoryClient {
    entries: RwLock<FxHashMap<String, Entry>>,
}

impl MemoryClient {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    /// True if no live entries remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl CacheClient for MemoryClient {
    fn set(&self, key: &str, payload: &[u8], ttl: Option<Duration>) -> Result<(), BoxError> {
        let entry = Entry {
            payload: payload.to_vec(),
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.entries.write().insert(key.to_owned(), entry);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, BoxError> {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => Ok(entry.payload.clone()),
            _ => Err(Box::new(MemoryClientError::NotFound)),
        }
    }

    fn del(&self, key: &str) -> Result<(), BoxError> {
        // Deleting a key that was never set, or whose entry already
        // expired, is a miss, not a failure.
        match self.entries.write().remove(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => Ok(()),
            _ => Err(Box::new(MemoryClientError::NotFound)),
        }
    }

    fn is_miss(&self, err: &BoxError) -> bool {
        matches!(
            err.downcast_ref::<MemoryClientError>(),
            Some(MemoryClientError::NotFound)
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
