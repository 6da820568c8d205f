//! fetchkit: cache-aside fetch orchestration over any key/value backend.
//!
//! Sits between application code and a cache backend and solves two
//! problems: deriving one deterministic string key from heterogeneous,
//! possibly nested inputs, and making sure that when many concurrent
//! callers want the same absent key, exactly one of them recomputes it
//! while the rest wait for and share the result, with a bounded wait.
//!
//! - [`key`]: deterministic key construction (plain or SHA-256 hashed).
//! - [`codec`]: the invertible serialization boundary, bincode by default.
//! - [`client`]: the narrow backend capability plus an in-memory adapter.
//! - [`group`]: single-flight coalescing with bounded, cancel-free waits.
//! - [`fetcher`]: the cache-aside orchestrator tying the above together.
//!
//! ```
//! use fetchkit::prelude::*;
//!
//! let mut fetcher = CacheFetcher::builder(MemoryClient::new()).build();
//! fetcher.set_key(["user", "profile"], [KeyElement::from(42_u64)])?;
//!
//! // Miss: the producer runs and its value is written through.
//! let name: String = fetcher.fetch(None, || Ok("alice".to_owned()))?;
//! assert_eq!(name, "alice");
//! assert!(!fetcher.is_cached());
//!
//! // Hit: served by the backend, the producer is never invoked.
//! let again: String = fetcher.fetch(None, || unreachable!())?;
//! assert_eq!(again, "alice");
//! assert!(fetcher.is_cached());
//! # Ok::<(), fetchkit::FetchError>(())
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod fetcher;
pub mod group;
pub mod key;
pub mod prelude;

pub use client::CacheClient;
pub use error::{BoxError, FetchError};
pub use fetcher::{CacheFetcher, FetchGroup};
