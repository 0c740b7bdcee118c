//! Helpers for testing coalesced operations.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - [`Lookup`] counts its invocations when they are *started*, not when they settle. A cleared
//!    but still pending invocation has already been counted.
//!
//!  - Timings are easiest to reason about with a paused clock, e.g.
//!    `#[tokio::test(start_paused = true)]`. The runtime then advances time whenever all tasks
//!    are idle, so a [`Lookup`] settles exactly after its configured delay.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `coalescer` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("coalescer=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// The value resolved by a successful [`Lookup`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Record {
    /// The id that was looked up.
    pub id: u32,
}

/// The failure of a failing [`Lookup`].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("lookup of {id} failed (invocation {invocation})")]
pub struct LookupError {
    /// The id that was looked up.
    pub id: u32,
    /// The number of the invocation that failed, to tell failures of different invocations apart.
    pub invocation: usize,
}

/// A fake backend that resolves ids to [`Record`]s after a delay.
///
/// Every invocation is counted per id, so tests can assert how often the underlying operation
/// actually ran. Clones share their counters.
#[derive(Clone, Debug)]
pub struct Lookup {
    delay: Duration,
    fail: bool,
    hits: Arc<Mutex<BTreeMap<u32, usize>>>,
}

impl Lookup {
    /// A lookup that succeeds after `delay`.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            fail: false,
            hits: Default::default(),
        }
    }

    /// A lookup that fails after `delay`.
    pub fn failing(delay: Duration) -> Self {
        Self {
            fail: true,
            ..Self::new(delay)
        }
    }

    /// Starts a lookup of `id`.
    pub fn find(&self, id: u32) -> BoxFuture<'static, Result<Record, LookupError>> {
        let invocation = {
            let mut hits = self.hits.lock().unwrap();
            let hits = hits.entry(id).or_default();
            *hits += 1;
            *hits
        };

        let delay = self.delay;
        let fail = self.fail;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            if fail {
                Err(LookupError { id, invocation })
            } else {
                Ok(Record { id })
            }
        })
    }

    /// [`find`](Self::find) as a standalone operation.
    pub fn operation(
        &self,
    ) -> impl Fn(u32) -> BoxFuture<'static, Result<Record, LookupError>> + Send + Sync + 'static
    {
        let lookup = self.clone();
        move |id| lookup.find(id)
    }

    /// The number of invocations for `id`.
    pub fn hits(&self, id: u32) -> usize {
        self.hits.lock().unwrap().get(&id).copied().unwrap_or_default()
    }

    /// The number of invocations for all ids.
    pub fn accesses(&self) -> usize {
        self.hits.lock().unwrap().values().sum()
    }
}
