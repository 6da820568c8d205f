//! Error types for the fetchkit library.
//!
//! ## Key Components
//!
//! - [`FetchError`]: the crate-level error enum covering key construction,
//!   serialization, backend, producer, and coalescing failures.
//! - [`BoxError`]: the boxed error type carried across the backend client
//!   boundary (see [`CacheClient`](crate::client::CacheClient)).
//! - [`SharedCause`]: a reference-counted error cause, cloneable so one
//!   coalesced failure can be replicated to every waiting caller.
//!
//! ## Example Usage
//!
//! ```
//! use fetchkit::error::FetchError;
//!
//! let err = FetchError::CacheMiss { key: "prefix_key".to_owned() };
//! assert!(err.is_miss());
//! assert!(err.to_string().contains("prefix_key"));
//! ```

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Boxed error type crossing the backend client boundary.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Reference-counted error cause shared between coalesced waiters.
pub type SharedCause = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors produced by key construction, the serialization boundary, the
/// backend port, and the coalescing engine.
///
/// The enum is `Clone` because a single coalesced computation has one
/// result that every attached waiter receives; foreign causes are held
/// behind [`SharedCause`] to keep cloning cheap.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Key construction saw an inadmissible element (absent value,
    /// associative map). No partial key is produced.
    #[error("invalid key element: {0}")]
    InvalidKeyElement(&'static str),

    /// Encoding or decoding at the serialization boundary failed. Distinct
    /// from [`FetchError::Backend`]: the backend is fine, the data is not.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The backend reported the key absent. Expected inside
    /// [`fetch`](crate::fetcher::CacheFetcher::fetch), where it triggers the
    /// producer path; surfaced as an error from the plain read operations.
    #[error("cache miss for key {key:?}")]
    CacheMiss {
        /// Key the backend did not have.
        key: String,
    },

    /// Any backend failure other than a miss. Never retried at this layer.
    #[error("cache backend error: {0}")]
    Backend(SharedCause),

    /// The producer function failed. The cause is carried verbatim and the
    /// cache is left untouched.
    #[error("producer failed: {0}")]
    Producer(SharedCause),

    /// This caller's bounded wait on a coalesced computation expired. Says
    /// nothing about the computation itself, which keeps running.
    #[error("coalesced wait timed out after {0:?}")]
    CoalescingTimeout(Duration),

    /// The coalesced work function panicked; published so waiters are never
    /// stranded on a flight that can no longer complete.
    #[error("coalesced work panicked")]
    WorkPanicked,
}

impl FetchError {
    /// Wrap a backend client error.
    pub fn backend(err: BoxError) -> Self {
        FetchError::Backend(Arc::from(err))
    }

    /// Wrap a producer error without reclassifying it.
    pub fn producer(err: BoxError) -> Self {
        FetchError::Producer(Arc::from(err))
    }

    /// True if this error is a cache miss rather than a genuine failure.
    pub fn is_miss(&self) -> bool {
        matches!(self, FetchError::CacheMiss { .. })
    }

    /// True if this error is a coalescing timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::CoalescingTimeout(_))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
