use std::time::Duration;

use coalescer::{Coalesced, Operation, Registry};
use coalescer_test::{Lookup, LookupError, Record};

/// The time every [`Lookup`] takes to settle.
pub const DELAY: Duration = Duration::from_millis(10);

/// Wraps `lookup` with its own registry, so tests do not interfere through the global one.
pub fn find(
    lookup: &Lookup,
    memoize: bool,
) -> Coalesced<u32, impl Operation<u32, Output = Record, Error = LookupError>> {
    find_in(lookup, memoize, Registry::new())
}

/// Wraps `lookup`, registered with `registry`.
pub fn find_in(
    lookup: &Lookup,
    memoize: bool,
    registry: std::sync::Arc<Registry>,
) -> Coalesced<u32, impl Operation<u32, Output = Record, Error = LookupError>> {
    coalescer::builder(lookup.operation())
        .name("find")
        .memoize(memoize)
        .registry(registry)
        .build()
}
