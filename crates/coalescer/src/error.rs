use thiserror::Error;

/// An error raised by the coalescing layer itself.
///
/// Failures of the wrapped operation are never turned into this type. They are handed to every
/// waiter of the shared [`Handle`](crate::Handle) as they are.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoalesceError {
    /// The key serializer could not produce a key for the given arguments.
    ///
    /// No cache entry was created or consulted for the call.
    #[error("failed to serialize arguments: {0}")]
    Serialization(String),
    /// A new invocation had to be started, but there is no tokio runtime to drive it.
    #[error("no tokio runtime available to drive the operation")]
    NoRuntime,
    /// A scoped clear was requested for an operation that is not registered with the registry.
    #[error("operation `{0}` is not registered with this registry")]
    NotRegistered(String),
}

impl From<serde_json::Error> for CoalesceError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl CoalesceError {
    /// Converts a serializer error into [`Serialization`](Self::Serialization) and logs it.
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::debug!(error = dynerr, "failed to serialize arguments");
        Self::Serialization(e.to_string())
    }
}
