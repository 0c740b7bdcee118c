use std::sync::Arc;

use futures::future::{BoxFuture, TryFuture, TryFutureExt};

/// The underlying asynchronous operation wrapped by a [`Coalesced`](crate::Coalesced).
///
/// `Args` is everything that distinguishes one call from another. Anything else the operation
/// needs, like the value it was called on, is captured by the operation itself.
///
/// This is implemented for every `Fn(Args) -> impl TryFuture` closure and for [`Method`].
pub trait Operation<Args>: Send + Sync + 'static {
    /// The value a successful invocation resolves to.
    type Output: Clone + Send + Sync + 'static;
    /// The failure of an invocation.
    type Error: Clone + Send + Sync + 'static;

    /// Starts one invocation of the operation.
    fn call(&self, args: Args) -> BoxFuture<'static, Result<Self::Output, Self::Error>>;
}

impl<Args, F, Fut> Operation<Args> for F
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: TryFuture + Send + 'static,
    Fut::Ok: Clone + Send + Sync + 'static,
    Fut::Error: Clone + Send + Sync + 'static,
{
    type Output = Fut::Ok;
    type Error = Fut::Error;

    fn call(&self, args: Args) -> BoxFuture<'static, Result<Self::Output, Self::Error>> {
        Box::pin(TryFutureExt::into_future(self(args)))
    }
}

/// A method bound to a shared receiver.
///
/// The method takes the receiver as `self: Arc<Self>`, so that the returned future can outlive
/// the call:
///
/// ```
/// use std::sync::Arc;
///
/// use coalescer::Method;
///
/// struct Users {
///     prefix: String,
/// }
///
/// impl Users {
///     async fn find(self: Arc<Self>, id: u32) -> Result<String, ()> {
///         Ok(format!("{}{id}", self.prefix))
///     }
/// }
///
/// let users = Arc::new(Users { prefix: "user-".into() });
/// let find = coalescer::builder(Method::new(users, Users::find))
///     .name("find_user")
///     .build();
/// // outside of a tokio runtime, nothing can drive the invocation
/// assert_eq!(find.call(7_u32).unwrap_err(), coalescer::CoalesceError::NoRuntime);
/// ```
pub struct Method<R, M> {
    receiver: Arc<R>,
    method: M,
}

impl<R, M> Method<R, M> {
    /// Binds `method` to `receiver`.
    pub fn new(receiver: Arc<R>, method: M) -> Self {
        Self { receiver, method }
    }

    /// The receiver every invocation is called on.
    pub fn receiver(&self) -> &Arc<R> {
        &self.receiver
    }
}

impl<R, M, Args, Fut> Operation<Args> for Method<R, M>
where
    R: Send + Sync + 'static,
    M: Fn(Arc<R>, Args) -> Fut + Send + Sync + 'static,
    Fut: TryFuture + Send + 'static,
    Fut::Ok: Clone + Send + Sync + 'static,
    Fut::Error: Clone + Send + Sync + 'static,
{
    type Output = Fut::Ok;
    type Error = Fut::Error;

    fn call(&self, args: Args) -> BoxFuture<'static, Result<Self::Output, Self::Error>> {
        Box::pin(TryFutureExt::into_future((self.method)(
            Arc::clone(&self.receiver),
            args,
        )))
    }
}
