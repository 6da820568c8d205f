//! Cache-aside fetch orchestration.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  caller                                                              │
//! │    │                                                                 │
//! │    ▼                                                                 │
//! │  CacheFetcher::fetch(ttl, producer)                                  │
//! │    │                                                                 │
//! │    ▼                                                                 │
//! │  CoalescingGroup (one flight per key)                                │
//! │    │                                                                 │
//! │    ├── backend hit  ──────────────► payload, cached = true           │
//! │    │                                                                 │
//! │    └── backend miss ─► producer() ─► encode ─► backend set           │
//! │                                      │                               │
//! │                                      └──────► payload, cached=false  │
//! │    │                                                                 │
//! │    ▼                                                                 │
//! │  every waiter: decode payload, adopt hit/miss flag                   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A non-miss backend failure inside the flight aborts without invoking the
//! producer, so a degraded backend never triggers a recomputation storm.
//! Producer errors travel verbatim; cache misses inside `fetch` are not
//! errors at all, they are the trigger for computation.
//!
//! ## Example Usage
//!
//! ```
//! use fetchkit::prelude::*;
//!
//! let mut fetcher = CacheFetcher::builder(MemoryClient::new()).build();
//! fetcher.set_key(["user", "name"], [KeyElement::from(42_u64)])?;
//!
//! let name: String = fetcher.fetch(None, || Ok("alice".to_owned()))?;
//! assert_eq!(name, "alice");
//! assert!(!fetcher.is_cached());
//!
//! // Second fetch is served by the backend; the producer never runs.
//! let again: String = fetcher.fetch(None, || unreachable!())?;
//! assert_eq!(again, "alice");
//! assert!(fetcher.is_cached());
//! # Ok::<(), fetchkit::FetchError>(())
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::client::CacheClient;
use crate::codec::{BincodeCodec, ValueCodec};
use crate::error::{BoxError, FetchError};
use crate::group::{CoalescingGroup, DEFAULT_GROUP_TIMEOUT};
use crate::key::{KeyBuilder, KeyElement};

/// Result shared between coalesced callers: the encoded payload plus
/// whether the backend (rather than the producer) supplied it.
///
/// Sharing bytes instead of decoded values keeps the group usable by
/// fetchers of any value type; each waiter decodes into its own
/// destination.
#[derive(Debug, Clone)]
pub struct FlightValue {
    payload: Vec<u8>,
    cached: bool,
}

/// Coalescing registry shared by fetchers that dedupe against each other.
pub type FetchGroup = CoalescingGroup<FlightValue>;

/// Builder for [`CacheFetcher`].
pub struct FetcherBuilder<C, S = BincodeCodec> {
    client: Arc<C>,
    codec: S,
    group: Option<FetchGroup>,
    group_timeout: Duration,
    debug_print: bool,
    raw_strings: bool,
}

impl<C: CacheClient> FetcherBuilder<C> {
    fn new(client: Arc<C>) -> Self {
        Self {
            client,
            codec: BincodeCodec,
            group: None,
            group_timeout: DEFAULT_GROUP_TIMEOUT,
            debug_print: false,
            raw_strings: false,
        }
    }
}

impl<C, S> FetcherBuilder<C, S>
where
    C: CacheClient,
    S: ValueCodec + Clone + 'static,
{
    /// Share a coalescing group with other fetchers. Defaults to a fresh
    /// group owned by this fetcher alone.
    pub fn group(mut self, group: FetchGroup) -> Self {
        self.group = Some(group);
        self
    }

    /// Bound every coalesced wait. Defaults to
    /// [`DEFAULT_GROUP_TIMEOUT`](crate::group::DEFAULT_GROUP_TIMEOUT).
    pub fn group_timeout(mut self, timeout: Duration) -> Self {
        self.group_timeout = timeout;
        self
    }

    /// Emit one `tracing` debug event per operation with the operation
    /// name, key, and hit/miss state. Observability only.
    pub fn debug_print(mut self, enabled: bool) -> Self {
        self.debug_print = enabled;
        self
    }

    /// Bypass the codec for the string operations (`set_string`,
    /// `get_string`, `fetch_string`), storing UTF-8 bytes as-is.
    pub fn raw_strings(mut self, enabled: bool) -> Self {
        self.raw_strings = enabled;
        self
    }

    /// Swap the serialization codec.
    pub fn codec<S2>(self, codec: S2) -> FetcherBuilder<C, S2>
    where
        S2: ValueCodec + Clone + 'static,
    {
        FetcherBuilder {
            client: self.client,
            codec,
            group: self.group,
            group_timeout: self.group_timeout,
            debug_print: self.debug_print,
            raw_strings: self.raw_strings,
        }
    }

    /// Finish the fetcher.
    pub fn build(self) -> CacheFetcher<C, S> {
        CacheFetcher {
            client: self.client,
            codec: self.codec,
            group: self.group.unwrap_or_default(),
            group_timeout: self.group_timeout,
            debug_print: self.debug_print,
            raw_strings: self.raw_strings,
            key: String::new(),
            cached: false,
        }
    }
}

/// Cache-aside orchestrator bound to one backend client.
///
/// Holds the current key and an observational `cached` flag, recomputed on
/// every operation: did the most recent operation resolve via the backend
/// rather than via computation. Clones share the client and the coalescing
/// group but carry their own key and flag, so one fetcher per thread is the
/// intended shape.
pub struct CacheFetcher<C, S = BincodeCodec> {
    client: Arc<C>,
    codec: S,
    group: FetchGroup,
    group_timeout: Duration,
    debug_print: bool,
    raw_strings: bool,

    key: String,
    cached: bool,
}

impl<C, S> Clone for CacheFetcher<C, S>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            codec: self.codec.clone(),
            group: self.group.clone(),
            group_timeout: self.group_timeout,
            debug_print: self.debug_print,
            raw_strings: self.raw_strings,
            key: self.key.clone(),
            cached: self.cached,
        }
    }
}

impl<C: CacheClient> CacheFetcher<C> {
    /// Start building a fetcher that owns `client`.
    pub fn builder(client: C) -> FetcherBuilder<C> {
        FetcherBuilder::new(Arc::new(client))
    }

    /// Start building a fetcher over a client shared with other owners.
    pub fn builder_shared(client: Arc<C>) -> FetcherBuilder<C> {
        FetcherBuilder::new(client)
    }

    /// Fetcher with all defaults.
    pub fn new(client: C) -> Self {
        Self::builder(client).build()
    }
}

impl<C, S> CacheFetcher<C, S>
where
    C: CacheClient,
    S: ValueCodec + Clone + 'static,
{
    /// Derive and install the current key from prefixes and elements.
    pub fn set_key<I, P, E>(&mut self, prefixes: I, elements: E) -> Result<(), FetchError>
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
        E: IntoIterator<Item = KeyElement>,
    {
        self.key = KeyBuilder::new(prefixes).elements(elements).build()?;
        Ok(())
    }

    /// Like [`set_key`](Self::set_key), with the element segment replaced
    /// by its SHA-256 hex digest.
    pub fn set_hash_key<I, P, E>(&mut self, prefixes: I, elements: E) -> Result<(), FetchError>
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
        E: IntoIterator<Item = KeyElement>,
    {
        self.key = KeyBuilder::new(prefixes)
            .elements(elements)
            .hashed(true)
            .build()?;
        Ok(())
    }

    /// The current key. Purely observational.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the most recently completed operation resolved via the
    /// backend rather than via computation.
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    /// Encode `value` and write it through under the current key.
    pub fn set<T: Serialize>(&mut self, value: &T, ttl: Option<Duration>) -> Result<(), FetchError> {
        self.cached = false;
        let payload = self.codec.encode(value)?;
        self.write(&payload, ttl)?;
        self.cached = true;
        self.debug_event("set");
        Ok(())
    }

    /// String counterpart of [`set`](Self::set); raw pass-through when the
    /// fetcher was built with `raw_strings`.
    pub fn set_string(&mut self, value: &str, ttl: Option<Duration>) -> Result<(), FetchError> {
        self.cached = false;
        let payload = if self.raw_strings {
            value.as_bytes().to_vec()
        } else {
            self.codec.encode(&value)?
        };
        self.write(&payload, ttl)?;
        self.cached = true;
        self.debug_event("set_string");
        Ok(())
    }

    /// Read and decode the value under the current key.
    ///
    /// A backend "not found" comes back as [`FetchError::CacheMiss`] with
    /// `is_cached() == false`; any other backend error propagates. Routed
    /// through the coalescing group, so a concurrent `fetch` on the same
    /// key shares its flight.
    pub fn get<T: DeserializeOwned>(&mut self) -> Result<T, FetchError> {
        let flight = self.run_read()?;
        self.debug_event("get");
        self.decode_flight(&flight.payload)
    }

    /// Read the value under the current key as a string.
    pub fn get_string(&mut self) -> Result<String, FetchError> {
        let flight = self.run_read()?;
        self.debug_event("get_string");
        if self.raw_strings {
            self.flight_utf8(flight.payload)
        } else {
            self.decode_flight(&flight.payload)
        }
    }

    /// The cache-aside operation: return the cached value for the current
    /// key, or compute, store, and return it.
    ///
    /// Concurrent calls with the same key coalesce onto one flight, so
    /// `producer` runs at most once no matter how many callers are waiting;
    /// each waiter decodes the shared payload and adopts the shared
    /// hit/miss flag. The wait is bounded by the group timeout; expiry
    /// releases this caller without cancelling the flight.
    pub fn fetch<T, F>(&mut self, ttl: Option<Duration>, producer: F) -> Result<T, FetchError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Result<T, BoxError> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        let codec = self.codec.clone();
        let key = self.key.clone();

        let flight = self.run_flight(move || match client.get(&key) {
            Ok(payload) => Ok(FlightValue {
                payload,
                cached: true,
            }),
            Err(err) if client.is_miss(&err) => {
                let produced = producer().map_err(FetchError::producer)?;
                let payload = codec.encode(&produced)?;
                client.set(&key, &payload, ttl).map_err(FetchError::backend)?;
                Ok(FlightValue {
                    payload,
                    cached: false,
                })
            },
            Err(err) => Err(FetchError::backend(err)),
        })?;

        self.debug_event("fetch");
        self.decode_flight(&flight.payload)
    }

    /// String variant of [`fetch`](Self::fetch), honoring `raw_strings`.
    pub fn fetch_string<F>(
        &mut self,
        ttl: Option<Duration>,
        producer: F,
    ) -> Result<String, FetchError>
    where
        F: FnOnce() -> Result<String, BoxError> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        let codec = self.codec.clone();
        let key = self.key.clone();
        let raw = self.raw_strings;

        let flight = self.run_flight(move || match client.get(&key) {
            Ok(payload) => Ok(FlightValue {
                payload,
                cached: true,
            }),
            Err(err) if client.is_miss(&err) => {
                let produced = producer().map_err(FetchError::producer)?;
                let payload = if raw {
                    produced.into_bytes()
                } else {
                    codec.encode(&produced)?
                };
                client.set(&key, &payload, ttl).map_err(FetchError::backend)?;
                Ok(FlightValue {
                    payload,
                    cached: false,
                })
            },
            Err(err) => Err(FetchError::backend(err)),
        })?;

        self.debug_event("fetch_string");
        if self.raw_strings {
            self.flight_utf8(flight.payload)
        } else {
            self.decode_flight(&flight.payload)
        }
    }

    /// Delete the current key.
    ///
    /// A backend miss on delete is not an error: the key simply was not
    /// there, and `is_cached()` reports `false`. Success means the backend
    /// actually held the key, mirroring the read/write flag semantics.
    pub fn del(&mut self) -> Result<(), FetchError> {
        match self.client.del(&self.key) {
            Ok(()) => self.cached = true,
            Err(err) if self.client.is_miss(&err) => self.cached = false,
            Err(err) => {
                self.cached = false;
                return Err(FetchError::backend(err));
            },
        }
        self.debug_event("del");
        Ok(())
    }

    /// Write an already-encoded payload through under the current key.
    fn write(&self, payload: &[u8], ttl: Option<Duration>) -> Result<(), FetchError> {
        self.client
            .set(&self.key, payload, ttl)
            .map_err(FetchError::backend)
    }

    /// Decode a flight payload. A payload the codec rejects means the
    /// operation failed, so the hit flag is dropped along with it.
    fn decode_flight<T: DeserializeOwned>(&mut self, payload: &[u8]) -> Result<T, FetchError> {
        self.codec.decode(payload).map_err(|err| {
            self.cached = false;
            err
        })
    }

    /// Raw-mode counterpart of [`decode_flight`](Self::decode_flight).
    fn flight_utf8(&mut self, payload: Vec<u8>) -> Result<String, FetchError> {
        String::from_utf8(payload).map_err(|err| {
            self.cached = false;
            FetchError::Serialization(err.to_string())
        })
    }

    /// Coalesced backend read shared by the plain read operations.
    fn run_read(&mut self) -> Result<FlightValue, FetchError> {
        let client = Arc::clone(&self.client);
        let key = self.key.clone();
        self.run_flight(move || match client.get(&key) {
            Ok(payload) => Ok(FlightValue {
                payload,
                cached: true,
            }),
            Err(err) if client.is_miss(&err) => Err(FetchError::CacheMiss { key }),
            Err(err) => Err(FetchError::backend(err)),
        })
    }

    /// Run one unit of work through the group and adopt its hit/miss flag.
    fn run_flight<F>(&mut self, work: F) -> Result<FlightValue, FetchError>
    where
        F: FnOnce() -> Result<FlightValue, FetchError> + Send + 'static,
    {
        match self.group.run(&self.key, self.group_timeout, work) {
            Ok(flight) => {
                self.cached = flight.cached;
                Ok(flight)
            },
            Err(err) => {
                self.cached = false;
                Err(err)
            },
        }
    }

    fn debug_event(&self, operation: &str) {
        if self.debug_print {
            tracing::debug!(
                target: "fetchkit",
                operation,
                key = %self.key,
                cached = self.cached,
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use thiserror::Error;

    use super::*;
    use crate::client::MemoryClient;

    #[derive(Debug, Error)]
    #[error("backend down")]
    struct BackendDown;

    /// Client whose reads always fail with a non-miss error.
    struct BrokenClient;

    impl CacheClient for BrokenClient {
        fn set(&self, _: &str, _: &[u8], _: Option<Duration>) -> Result<(), BoxError> {
            Err(Box::new(BackendDown))
        }

        fn get(&self, _: &str) -> Result<Vec<u8>, BoxError> {
            Err(Box::new(BackendDown))
        }

        fn del(&self, _: &str) -> Result<(), BoxError> {
            Err(Box::new(BackendDown))
        }

        fn is_miss(&self, _: &BoxError) -> bool {
            false
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        id: u64,
        name: String,
    }

    fn fetcher_with_key(key_tail: &str) -> CacheFetcher<MemoryClient> {
        let mut fetcher = CacheFetcher::new(MemoryClient::new());
        fetcher
            .set_key(["test"], [KeyElement::from(key_tail)])
            .unwrap();
        fetcher
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut fetcher = fetcher_with_key("round_trip");
        let value = Profile {
            id: 1,
            name: "alice".into(),
        };

        fetcher.set(&value, None).unwrap();
        assert!(fetcher.is_cached());

        let back: Profile = fetcher.get().unwrap();
        assert_eq!(back, value);
        assert!(fetcher.is_cached());
    }

    #[test]
    fn get_on_fresh_key_is_a_miss() {
        let mut fetcher = fetcher_with_key("fresh");
        let err = fetcher.get::<Profile>().unwrap_err();
        assert!(err.is_miss());
        assert!(!fetcher.is_cached());
    }

    #[test]
    fn corrupt_payload_fails_the_read_and_clears_the_hit_flag() {
        let client = Arc::new(MemoryClient::new());
        let mut fetcher = CacheFetcher::builder_shared(Arc::clone(&client)).build();
        fetcher.set_key(["p"], [KeyElement::from("k")]).unwrap();

        client.set("p_k", &[0xde, 0xad, 0xbe], None).unwrap();

        let err = fetcher.get::<u64>().unwrap_err();
        assert!(matches!(err, FetchError::Serialization(_)));
        assert!(!fetcher.is_cached());

        // Same for a fetch that finds the corrupt entry in the backend.
        let err = fetcher
            .fetch::<u64, _>(None, || panic!("backend hit, producer must not run"))
            .unwrap_err();
        assert!(matches!(err, FetchError::Serialization(_)));
        assert!(!fetcher.is_cached());
    }

    #[test]
    fn key_is_derived_from_prefixes_and_elements() {
        let mut fetcher = CacheFetcher::new(MemoryClient::new());
        fetcher
            .set_key(["prefix", "key"], [KeyElement::from("hoge"), KeyElement::from("fuga")])
            .unwrap();
        assert_eq!(fetcher.key(), "prefix_key_hoge_fuga");

        fetcher
            .set_hash_key(["prefix"], [KeyElement::from("hoge")])
            .unwrap();
        assert!(fetcher.key().starts_with("prefix_"));
        assert_eq!(fetcher.key().len(), "prefix".len() + 1 + 64);
    }

    #[test]
    fn fetch_miss_runs_producer_then_hit_does_not() {
        let mut fetcher = fetcher_with_key("aside");

        let first: Profile = fetcher
            .fetch(None, || {
                Ok(Profile {
                    id: 9,
                    name: "bob".into(),
                })
            })
            .unwrap();
        assert_eq!(first.id, 9);
        assert!(!fetcher.is_cached());

        let second: Profile = fetcher
            .fetch(None, || panic!("producer must not run on a hit"))
            .unwrap();
        assert_eq!(second, first);
        assert!(fetcher.is_cached());
    }

    #[test]
    fn del_then_get_reports_miss() {
        let mut fetcher = fetcher_with_key("delete");
        fetcher.set(&"v".to_owned(), None).unwrap();

        fetcher.del().unwrap();
        assert!(fetcher.is_cached()); // something was indeed deleted

        let err = fetcher.get::<String>().unwrap_err();
        assert!(err.is_miss());
        assert!(!fetcher.is_cached());
    }

    #[test]
    fn del_of_absent_key_is_not_an_error() {
        let mut fetcher = fetcher_with_key("never_set");
        fetcher.del().unwrap();
        assert!(!fetcher.is_cached());
    }

    #[test]
    fn backend_failure_does_not_invoke_producer() {
        let mut fetcher = CacheFetcher::new(BrokenClient);
        fetcher.set_key(["bad"], []).unwrap();

        let err = fetcher
            .fetch::<String, _>(None, || panic!("producer ran against a broken backend"))
            .unwrap_err();
        assert!(matches!(err, FetchError::Backend(_)));
        assert!(!fetcher.is_cached());
    }

    #[test]
    fn producer_error_propagates_verbatim_and_stores_nothing() {
        let mut fetcher = fetcher_with_key("failing_producer");

        let err = fetcher
            .fetch::<String, _>(None, || Err(BackendDown.into()))
            .unwrap_err();
        match err {
            FetchError::Producer(cause) => assert_eq!(cause.to_string(), "backend down"),
            other => panic!("expected producer error, got {other:?}"),
        }

        let err = fetcher.get::<String>().unwrap_err();
        assert!(err.is_miss());
    }

    #[test]
    fn raw_strings_bypass_the_codec() {
        let client = Arc::new(MemoryClient::new());
        let mut fetcher = CacheFetcher::builder_shared(Arc::clone(&client))
            .raw_strings(true)
            .build();
        fetcher.set_key(["raw"], []).unwrap();

        fetcher.set_string("plain", None).unwrap();
        assert_eq!(fetcher.get_string().unwrap(), "plain");

        // Stored bytes are the string itself, no codec framing.
        assert_eq!(client.get("raw").unwrap(), b"plain");
    }

    #[test]
    fn fetch_string_round_trips_in_both_modes() {
        for raw in [false, true] {
            let mut fetcher = CacheFetcher::builder(MemoryClient::new())
                .raw_strings(raw)
                .build();
            fetcher.set_key(["s"], []).unwrap();

            let out = fetcher.fetch_string(None, || Ok("computed".to_owned())).unwrap();
            assert_eq!(out, "computed");
            assert!(!fetcher.is_cached());

            let again = fetcher
                .fetch_string(None, || panic!("must be served from cache"))
                .unwrap();
            assert_eq!(again, "computed");
            assert!(fetcher.is_cached());
        }
    }

    #[test]
    fn ttl_expiry_reinvokes_producer() {
        let mut fetcher = fetcher_with_key("ttl");

        let _: String = fetcher
            .fetch(Some(Duration::from_millis(30)), || Ok("v1".to_owned()))
            .unwrap();
        std::thread::sleep(Duration::from_millis(80));

        let second: String = fetcher.fetch(None, || Ok("v2".to_owned())).unwrap();
        assert_eq!(second, "v2");
        assert!(!fetcher.is_cached());
    }
}
