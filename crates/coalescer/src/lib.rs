//! Request coalescing and memoization for asynchronous operations.
//!
//! A [`Coalesced`] operation makes sure that concurrent calls with equivalent arguments share a
//! single in-flight invocation, instead of each doing the same work. Optionally, it retains
//! successful values, so that later calls with the same arguments do not invoke the operation at
//! all.
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), coalescer::CoalesceError> {
//! use coalescer::Options;
//!
//! let find = coalescer::wrap(
//!     |id: u32| async move { Ok::<_, String>(format!("user {id}")) },
//!     Options::default(),
//! );
//!
//! let first = find.call(1)?;
//! let second = find.call(1)?;
//! assert!(coalescer::same_handle(&first, &second));
//!
//! assert_eq!(first.await, Ok("user 1".to_owned()));
//! assert_eq!(second.await, Ok("user 1".to_owned()));
//! # Ok(())
//! # }
//! ```
//!
//! Calls are grouped by a key derived from their arguments, see [`KeySerializer`]. Entries are
//! removed once their invocation settles, unless memoization is enabled, or when they are
//! cleared via [`Coalesced::clear`], [`clear_operation`] or the global [`clear`].

#![warn(missing_docs)]

#[macro_use]
pub mod metrics;

mod coalesced;
mod config;
mod error;
mod key;
mod operation;
mod registry;
mod store;

pub use coalesced::{Coalesced, CoalescedBuilder, same_handle};
pub use config::Options;
pub use error::CoalesceError;
pub use key::{JsonKeys, KeySerializer};
pub use operation::{Method, Operation};
pub use registry::{Registry, clear, clear_operation};
pub use store::Handle;

/// Starts building a [`Coalesced`] operation with the default options.
pub fn builder<Args, Op>(operation: Op) -> CoalescedBuilder<Args, Op> {
    CoalescedBuilder::new(operation)
}

/// Wraps `operation` with the given `options`, keyed by the default [`JsonKeys`] serializer.
pub fn wrap<Args, Op>(operation: Op, options: Options) -> Coalesced<Args, Op>
where
    Op: Operation<Args>,
    Args: serde::Serialize,
{
    builder(operation).options(options).build()
}
