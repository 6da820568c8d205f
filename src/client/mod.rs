//! Backend capability consumed by the fetcher.
//!
//! The fetcher never assumes a wire protocol, persistence model, or
//! eviction policy; it talks to any backend through the narrow
//! [`CacheClient`] trait. [`MemoryClient`] is the in-process adapter, used
//! as the sample backend and as the test double.

mod memory;

pub use memory::{MemoryClient, MemoryClientError};

use std::time::Duration;

use crate::error::BoxError;

/// Narrow capability the fetcher requires of any cache backend.
///
/// Implementations own their wire protocol and failure vocabulary; the one
/// classification the fetcher needs is [`is_miss`](CacheClient::is_miss),
/// separating "key absent" from genuine failure. A miss drives the
/// cache-aside producer path; anything else propagates untouched.
pub trait CacheClient: Send + Sync + 'static {
    /// Write `payload` under `key`. `None` ttl means no expiration.
    fn set(&self, key: &str, payload: &[u8], ttl: Option<Duration>) -> Result<(), BoxError>;

    /// Read the payload stored under `key`.
    fn get(&self, key: &str) -> Result<Vec<u8>, BoxError>;

    /// Delete `key`.
    fn del(&self, key: &str) -> Result<(), BoxError>;

    /// Classify `err`: true if it means "key absent" rather than failure.
    fn is_miss(&self, err: &BoxError) -> bool;
}
