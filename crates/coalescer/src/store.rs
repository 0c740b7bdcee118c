use std::collections::HashMap;
use std::hash::Hash;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, MutexGuard};

use crate::registry::ClearEntries;

/// The handle to the outcome of an operation, shared by all coalesced callers.
///
/// Every clone resolves to the same value or the same failure. Clones of one pending invocation
/// can be compared with [`Shared::ptr_eq`].
pub type Handle<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// Creates a handle that is already resolved to `value`.
pub(crate) fn resolved<T, E>(value: T) -> Handle<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    futures::future::ready(Ok(value)).boxed().shared()
}

/// The state of a single cache entry.
pub(crate) enum Slot<T, E> {
    /// An invocation is in flight.
    ///
    /// The generation identifies the invocation, so that its completion only ever touches its
    /// own entry and not a newer one created after a clear.
    Pending {
        generation: u64,
        handle: Handle<T, E>,
    },
    /// The invocation succeeded and its value is retained.
    Memoized(T),
}

/// The cache store of one wrapped operation.
pub(crate) struct Store<K, T, E> {
    name: String,
    memoize: bool,
    next_generation: AtomicU64,
    entries: Mutex<HashMap<K, Slot<T, E>>>,
}

impl<K, T, E> Store<K, T, E>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    T: Clone,
{
    pub fn new(name: String, memoize: bool) -> Self {
        Self {
            name,
            memoize,
            next_generation: AtomicU64::new(0),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn memoize(&self) -> bool {
        self.memoize
    }

    pub fn entries(&self) -> MutexGuard<'_, HashMap<K, Slot<T, E>>> {
        self.entries.lock()
    }

    pub fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Updates the entry of the invocation `generation` once it settled.
    ///
    /// `value` is `None` if the invocation failed. Successful values are retained when memoizing,
    /// everything else evicts the entry. An entry that was cleared in the meantime, or replaced
    /// by a newer invocation, is left alone.
    pub fn settle(&self, key: &K, generation: u64, value: Option<&T>) {
        let mut entries = self.entries();
        let is_current = matches!(
            entries.get(key),
            Some(Slot::Pending { generation: current, .. }) if *current == generation
        );
        if !is_current {
            drop(entries);
            tracing::trace!(operation = %self.name, ?key, generation, "Orphaned invocation settled");
            metric!(counter("coalescer.settle") += 1, "status" => "orphaned", "operation" => &self.name);
            return;
        }

        let evicted = match value {
            Some(value) if self.memoize => entries.insert(key.clone(), Slot::Memoized(value.clone())),
            _ => entries.remove(key),
        };
        let len = entries.len();
        drop(entries);
        // the pending handle is dropped outside of the lock
        drop(evicted);

        let status = if value.is_some() { "ok" } else { "err" };
        tracing::trace!(operation = %self.name, ?key, generation, status, "Invocation settled");
        metric!(counter("coalescer.settle") += 1, "status" => status, "operation" => &self.name);
        metric!(gauge("coalescer.entries") = len as u64, "operation" => &self.name);
    }
}

impl<K, T, E> ClearEntries for Store<K, T, E>
where
    K: Send,
    T: Send + Sync,
    E: Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn clear(&self) -> usize {
        let entries = mem::take(&mut *self.entries.lock());
        let removed = entries.len();

        tracing::debug!(operation = %self.name, removed, "Cleared operation");
        metric!(counter("coalescer.clear") += 1, "operation" => &self.name);
        metric!(gauge("coalescer.entries") = 0u64, "operation" => &self.name);
        removed
    }
}
