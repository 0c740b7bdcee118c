use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::{FutureExt, Shared};

use crate::key::{JsonKeys, KeySerializer};
use crate::operation::Operation;
use crate::registry::{ClearEntries, Registry};
use crate::store::{Handle, Slot, Store, resolved};
use crate::{CoalesceError, Options};

type OperationStore<Args, Op, S> = Store<
    <S as KeySerializer<Args>>::Key,
    <Op as Operation<Args>>::Output,
    <Op as Operation<Args>>::Error,
>;

/// Wraps an asynchronous [`Operation`], coalescing concurrent calls with equivalent arguments.
///
/// While an invocation for some key is pending, every further call with that key gets a clone of
/// the same [`Handle`] instead of invoking the operation again. Once the invocation settles its
/// entry is evicted, so the next call starts a fresh invocation. With
/// [`memoize`](CoalescedBuilder::memoize) enabled, successful values are retained instead and
/// served to all later calls until cleared. Failures are never retained.
///
/// Invocations are spawned on the current tokio runtime and run to completion, even if no caller
/// awaits their handle, or their entry was [cleared](Self::clear) in the meantime.
///
/// Clones share the same cache entries.
pub struct Coalesced<Args, Op, S = JsonKeys>
where
    Op: Operation<Args>,
    S: KeySerializer<Args>,
{
    operation: Arc<Op>,
    serializer: Arc<S>,
    store: Arc<OperationStore<Args, Op, S>>,
    _args: PhantomData<fn(Args)>,
}

impl<Args, Op, S> Clone for Coalesced<Args, Op, S>
where
    Op: Operation<Args>,
    S: KeySerializer<Args>,
{
    fn clone(&self) -> Self {
        // https://github.com/rust-lang/rust/issues/26925
        Coalesced {
            operation: Arc::clone(&self.operation),
            serializer: Arc::clone(&self.serializer),
            store: Arc::clone(&self.store),
            _args: PhantomData,
        }
    }
}

impl<Args, Op, S> std::fmt::Debug for Coalesced<Args, Op, S>
where
    Op: Operation<Args>,
    S: KeySerializer<Args>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coalesced")
            .field("name", &self.name())
            .field("memoize", &self.store.memoize())
            .field("entries", &self.len())
            .finish()
    }
}

impl<Args, Op, S> Coalesced<Args, Op, S>
where
    Op: Operation<Args>,
    S: KeySerializer<Args>,
{
    /// Calls the operation, or joins the pending or memoized outcome of an equivalent call.
    ///
    /// The returned handle does not need to be awaited for the invocation to make progress.
    ///
    /// # Errors
    ///
    /// - [`CoalesceError::Serialization`] if no key can be derived from `args`.
    /// - [`CoalesceError::NoRuntime`] if a new invocation is needed outside of a tokio runtime.
    ///
    /// In both cases no cache entry is touched. Failures of the operation itself are delivered
    /// through the handle.
    pub fn call(&self, args: Args) -> Result<Handle<Op::Output, Op::Error>, CoalesceError> {
        let key = self.serializer.serialize(&args)?;
        let name = self.name();

        let mut entries = self.store.entries();
        match entries.get(&key) {
            Some(Slot::Pending { handle, .. }) => {
                tracing::trace!(operation = name, ?key, "Joining pending invocation");
                metric!(counter("coalescer.call") += 1, "result" => "pending", "operation" => name);
                return Ok(handle.clone());
            }
            Some(Slot::Memoized(value)) => {
                tracing::trace!(operation = name, ?key, "Serving memoized value");
                metric!(counter("coalescer.call") += 1, "result" => "memoized", "operation" => name);
                return Ok(resolved(value.clone()));
            }
            None => {}
        }

        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| CoalesceError::NoRuntime)?;
        metric!(counter("coalescer.call") += 1, "result" => "miss", "operation" => name);

        let generation = self.store.next_generation();
        tracing::debug!(operation = name, ?key, generation, "Starting new invocation");

        let computation = AssertUnwindSafe(self.operation.call(args)).catch_unwind();
        let store = Arc::downgrade(&self.store);
        let settled_key = key.clone();
        let handle = async move {
            let outcome = computation.await;
            if let Some(store) = store.upgrade() {
                let value = match &outcome {
                    Ok(Ok(value)) => Some(value),
                    _ => None,
                };
                store.settle(&settled_key, generation, value);
            }
            match outcome {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        .boxed()
        .shared();

        // The entry has to be visible before the invocation can settle.
        let evicted = entries.insert(
            key,
            Slot::Pending {
                generation,
                handle: handle.clone(),
            },
        );
        debug_assert!(evicted.is_none());
        drop(entries);

        runtime.spawn(drive(handle.clone()));

        Ok(handle)
    }

    /// Removes all pending and memoized entries of this operation.
    ///
    /// Pending invocations keep running in the background, but their outcome is no longer
    /// shared with later calls and never enters the cache. Returns the number of removed entries.
    pub fn clear(&self) -> usize {
        self.store.clear()
    }

    /// The name of the operation, as used in logs and metrics.
    pub fn name(&self) -> &str {
        ClearEntries::name(&*self.store)
    }

    /// Whether successful values are retained.
    pub fn memoizes(&self) -> bool {
        self.store.memoize()
    }

    /// The number of pending and memoized entries.
    pub fn len(&self) -> usize {
        self.store.entries().len()
    }

    /// Whether there are no pending or memoized entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn store_ptr(&self) -> *const () {
        Arc::as_ptr(&self.store) as *const ()
    }
}

/// Polls an invocation to completion on behalf of all of its callers.
async fn drive<T, E>(handle: Handle<T, E>)
where
    T: Clone,
    E: Clone,
{
    // A panic is surfaced to the callers awaiting the handle.
    let _ = AssertUnwindSafe(handle).catch_unwind().await;
}

/// Builds a [`Coalesced`] operation.
///
/// Created by [`builder`](crate::builder).
pub struct CoalescedBuilder<Args, Op, S = JsonKeys> {
    operation: Op,
    serializer: S,
    options: Options,
    registry: Option<Arc<Registry>>,
    _args: PhantomData<fn(Args)>,
}

impl<Args, Op> CoalescedBuilder<Args, Op, JsonKeys> {
    pub(crate) fn new(operation: Op) -> Self {
        Self {
            operation,
            serializer: JsonKeys,
            options: Options::default(),
            registry: None,
            _args: PhantomData,
        }
    }
}

impl<Args, Op, S> CoalescedBuilder<Args, Op, S> {
    /// Retain successful values indefinitely, until cleared.
    pub fn memoize(mut self, memoize: bool) -> Self {
        self.options.memoize = memoize;
        self
    }

    /// Names the operation in logs and metrics.
    ///
    /// Defaults to the type name of the operation.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    /// Applies all of the given [`Options`].
    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Registers the operation with `registry` instead of the [global](Registry::global) one.
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replaces the default [`JsonKeys`] serializer.
    pub fn serializer<S2>(self, serializer: S2) -> CoalescedBuilder<Args, Op, S2> {
        CoalescedBuilder {
            operation: self.operation,
            serializer,
            options: self.options,
            registry: self.registry,
            _args: PhantomData,
        }
    }

    /// Creates the wrapped operation and registers its cache store.
    pub fn build(self) -> Coalesced<Args, Op, S>
    where
        Op: Operation<Args>,
        S: KeySerializer<Args>,
    {
        let Options { memoize, name } = self.options;
        let name = name.unwrap_or_else(|| std::any::type_name::<Op>().to_owned());
        let store = Arc::new(Store::new(name, memoize));

        let registry = self.registry.unwrap_or_else(Registry::global);
        registry.register(Arc::downgrade(&store) as _);

        Coalesced {
            operation: Arc::new(self.operation),
            serializer: Arc::new(self.serializer),
            store,
            _args: PhantomData,
        }
    }
}

/// Compares two handles for identity.
///
/// Coalesced calls receive the identical handle, while each memoized or fresh call gets its own.
pub fn same_handle<T, E>(a: &Handle<T, E>, b: &Handle<T, E>) -> bool {
    Shared::ptr_eq(a, b)
}
