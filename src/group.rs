//! Single-flight coalescing of identical in-flight work.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      CoalescingGroup<T>                             │
//! │                                                                     │
//! │   registry: Mutex<FxHashMap<String, Arc<Flight<T>>>>                │
//! │                                                                     │
//! │   run("k", work)                                                    │
//! │      │                                                              │
//! │      ├── "k" absent  → register flight, spawn work on its own       │
//! │      │                 thread, wait as leader                       │
//! │      │                                                              │
//! │      └── "k" pending → attach to the existing flight, wait          │
//! │                                                                     │
//! │   worker thread: run work → deregister "k" → publish result         │
//! │                  → notify all waiters                               │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Concepts
//!
//! - **At-most-once execution**: for any set of concurrent `run` calls with
//!   the same key, the work function executes once; every caller receives a
//!   clone of the identical result.
//! - **Bounded waits**: each caller waits up to its own timeout. An expired
//!   wait releases only that caller; the work keeps running and still
//!   completes for the remaining waiters.
//! - **Fresh flights after completion**: the registration is removed before
//!   the result is published, so a caller arriving after completion starts
//!   a new execution rather than observing a stale one.
//! - **No cross-key blocking**: flights for different keys are fully
//!   independent.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use crate::error::FetchError;

/// Default bound on a coalesced wait.
pub const DEFAULT_GROUP_TIMEOUT: Duration = Duration::from_secs(30);

/// One pending shared computation: a result slot plus a wakeup signal.
struct Flight<T> {
    slot: Mutex<Option<Result<T, FetchError>>>,
    done: Condvar,
}

impl<T> Flight<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            done: Condvar::new(),
        }
    }
}

/// Shared-computation registry keyed by string.
///
/// Cloning is cheap and every clone shares the same registry, so fetchers
/// that should coalesce against each other are given clones of one group.
/// A group's lifecycle is owned by whoever constructs it; there is no
/// process-global instance.
pub struct CoalescingGroup<T> {
    flights: Arc<Mutex<FxHashMap<String, Arc<Flight<T>>>>>,
}

impl<T> Clone for CoalescingGroup<T> {
    fn clone(&self) -> Self {
        Self {
            flights: Arc::clone(&self.flights),
        }
    }
}

impl<T> Default for CoalescingGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CoalescingGroup<T> {
    /// Create an empty group.
    pub fn new() -> Self {
        Self {
            flights: Arc::new(Mutex::new(FxHashMap::default())),
        }
    }

    /// Number of flights currently pending.
    pub fn pending(&self) -> usize {
        self.flights.lock().len()
    }
}

impl<T> CoalescingGroup<T>
where
    T: Clone + Send + 'static,
{
    /// Run `work` under `key`, coalescing with any in-flight call for the
    /// same key.
    ///
    /// The first caller for a key spawns `work` on a dedicated thread; all
    /// callers (that first one included) then wait up to `timeout` for the
    /// shared result. Expiry returns [`FetchError::CoalescingTimeout`] to
    /// the expired caller only. A panicking `work` is published as
    /// [`FetchError::WorkPanicked`] so waiters are never stranded.
    pub fn run<F>(&self, key: &str, timeout: Duration, work: F) -> Result<T, FetchError>
    where
        F: FnOnce() -> Result<T, FetchError> + Send + 'static,
    {
        let (flight, leader) = {
            let mut flights = self.flights.lock();
            match flights.get(key) {
                Some(flight) => (Arc::clone(flight), false),
                None => {
                    let flight = Arc::new(Flight::new());
                    flights.insert(key.to_owned(), Arc::clone(&flight));
                    (flight, true)
                },
            }
        };

        if leader {
            let flights = Arc::clone(&self.flights);
            let worker = Arc::clone(&flight);
            let key = key.to_owned();
            thread::spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(work))
                    .unwrap_or_else(|_| Err(FetchError::WorkPanicked));

                // Deregister before publishing so a caller arriving after
                // completion starts a fresh flight instead of reusing this one.
                flights.lock().remove(&key);

                *worker.slot.lock() = Some(result);
                worker.done.notify_all();
            });
        }

        let deadline = Instant::now() + timeout;
        let mut slot = flight.slot.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            if flight.done.wait_until(&mut slot, deadline).timed_out() {
                // The result may have landed in the same instant the wait
                // expired; prefer it over a timeout.
                return match slot.as_ref() {
                    Some(result) => result.clone(),
                    None => Err(FetchError::CoalescingTimeout(timeout)),
                };
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
