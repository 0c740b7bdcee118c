use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, MutexGuard};

use crate::key::KeySerializer;
use crate::operation::Operation;
use crate::{CoalesceError, Coalesced};

static GLOBAL_REGISTRY: OnceLock<Arc<Registry>> = OnceLock::new();

/// A cache store that can be emptied through a [`Registry`].
pub(crate) trait ClearEntries: Send + Sync {
    /// The name of the operation owning the store.
    fn name(&self) -> &str;

    /// Removes all entries and returns how many were removed.
    fn clear(&self) -> usize;
}

/// Keeps track of the cache stores of all wrapped operations.
///
/// The registry only holds weak references: dropping the last clone of a [`Coalesced`] frees its
/// store, and the stale registration is pruned on the next registration.
///
/// Every wrapped operation registers with the process-wide [`Registry::global`] unless it was built
/// with an explicit registry. Tests can use a fresh [`Registry::new`] to stay isolated.
#[derive(Default)]
pub struct Registry {
    stores: Mutex<Vec<Weak<dyn ClearEntries>>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stores = self.stores();
        let names: Vec<_> = stores
            .iter()
            .filter_map(Weak::upgrade)
            .map(|store| store.name().to_owned())
            .collect();
        f.debug_struct("Registry").field("stores", &names).finish()
    }
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The process-wide registry, created on first use.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL_REGISTRY.get_or_init(Registry::new))
    }

    fn stores(&self) -> MutexGuard<'_, Vec<Weak<dyn ClearEntries>>> {
        self.stores.lock()
    }

    pub(crate) fn register(&self, store: Weak<dyn ClearEntries>) {
        let mut stores = self.stores();
        stores.retain(|store| store.strong_count() > 0);
        stores.push(store);
    }

    /// The number of live cache stores in this registry.
    pub fn len(&self) -> usize {
        self.stores()
            .iter()
            .filter(|store| store.strong_count() > 0)
            .count()
    }

    /// Whether no live cache store is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry of every registered operation.
    ///
    /// Pending invocations keep running, but their results no longer enter any cache.
    /// Returns the number of removed entries.
    pub fn clear(&self) -> usize {
        let stores: Vec<_> = self.stores().iter().filter_map(Weak::upgrade).collect();
        let removed: usize = stores.iter().map(|store| store.clear()).sum();
        tracing::debug!(stores = stores.len(), removed, "Cleared all operations");
        removed
    }

    /// Removes all entries of one wrapped operation.
    ///
    /// Fails with [`CoalesceError::NotRegistered`] if `operation` was registered with another
    /// registry. Returns the number of removed entries.
    pub fn clear_operation<Args, Op, S>(
        &self,
        operation: &Coalesced<Args, Op, S>,
    ) -> Result<usize, CoalesceError>
    where
        Op: Operation<Args>,
        S: KeySerializer<Args>,
    {
        let target = operation.store_ptr();
        let registered = self
            .stores()
            .iter()
            .any(|store| store.as_ptr() as *const () == target);

        if !registered {
            return Err(CoalesceError::NotRegistered(operation.name().to_owned()));
        }
        Ok(operation.clear())
    }
}

/// Removes every entry of every operation registered with the [global registry](Registry::global).
pub fn clear() -> usize {
    Registry::global().clear()
}

/// Removes all entries of one operation through the [global registry](Registry::global).
pub fn clear_operation<Args, Op, S>(operation: &Coalesced<Args, Op, S>) -> Result<usize, CoalesceError>
where
    Op: Operation<Args>,
    S: KeySerializer<Args>,
{
    Registry::global().clear_operation(operation)
}
