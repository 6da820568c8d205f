//! Convenience re-exports for typical fetchkit usage.

pub use crate::client::{CacheClient, MemoryClient, MemoryClientError};
pub use crate::codec::{BincodeCodec, ValueCodec};
pub use crate::error::{BoxError, FetchError, SharedCause};
pub use crate::fetcher::{CacheFetcher, FetchGroup, FetcherBuilder};
pub use crate::group::{CoalescingGroup, DEFAULT_GROUP_TIMEOUT};
pub use crate::key::{KeyBuilder, KeyElement, KEY_SEPARATOR};
