//! Chainable asynchronous values.
//!
//! An [`AsyncValue`] is the result of a remote call that may not have arrived
//! yet. Calling code composes further work onto it with [`AsyncValue::map`],
//! [`AsyncValue::and_then`] and the document accessors, or writes a whole
//! sequence of dependent calls as an `async` block and turns it into a single
//! value with [`AsyncValue::from_future`]. A failed dependency surfaces as an
//! `Err` at the exact `.await` where it is consumed, so ordinary `?` and
//! `match` handle remote failures like local ones.

use std::{
    cell::Cell,
    fmt,
    future::Future,
    pin::Pin,
    sync::{Mutex, PoisonError},
    task::{Context, Poll},
};

use futures::{FutureExt, future::BoxFuture};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

thread_local! {
    static OFFLOADED: Cell<bool> = const { Cell::new(false) };
}

/// A single eventually-available result or failure.
///
/// Combinators consume the value they are called on, so every value owns its
/// continuation and chains can only grow forward.
#[must_use = "an AsyncValue does nothing unless awaited or chained"]
pub struct AsyncValue<T> {
    future: BoxFuture<'static, Result<T>>,
}

/// Settling side of a pending [`AsyncValue`].
///
/// Settling twice is a logic error and is reported, not ignored. Dropping an
/// unsettled resolver fails the value with [`Error::Abandoned`].
pub struct Resolver<T> {
    sender: Mutex<Option<oneshot::Sender<Result<T>>>>,
}

impl<T> Resolver<T> {
    /// Settle the value successfully.
    ///
    /// # Errors
    /// Returns [`Error::AlreadySettled`] if the value was already settled.
    pub fn resolve(&self, value: T) -> Result<()> {
        self.settle(Ok(value))
    }

    /// Settle the value with a failure.
    ///
    /// # Errors
    /// Returns [`Error::AlreadySettled`] if the value was already settled.
    pub fn fail(&self, error: Error) -> Result<()> {
        self.settle(Err(error))
    }

    /// Whether this resolver has been used.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn settle(&self, outcome: Result<T>) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(Error::AlreadySettled)?;
        // A dropped receiver only means nobody is listening any more.
        let _ = sender.send(outcome);
        Ok(())
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl<T: Send + 'static> AsyncValue<T> {
    /// Create a pending value together with the resolver that settles it.
    pub fn pending() -> (Resolver<T>, Self) {
        let (sender, receiver) = oneshot::channel();
        let value = Self::from_future(async move {
            receiver.await.unwrap_or_else(|_| Err(Error::Abandoned))
        });
        (
            Resolver {
                sender: Mutex::new(Some(sender)),
            },
            value,
        )
    }

    /// A value that is already resolved.
    pub fn resolved(value: T) -> Self {
        Self::ready(Ok(value))
    }

    /// A value that has already failed.
    pub fn failed(error: Error) -> Self {
        Self::ready(Err(error))
    }

    /// A value that is already settled with `outcome`.
    pub fn ready(outcome: Result<T>) -> Self {
        Self::from_future(futures::future::ready(outcome))
    }

    /// Compose a sequence of dependent steps into one value.
    ///
    /// Each `.await` inside `future` is a suspension point; the value resolves
    /// with whatever the future returns.
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            future: future.boxed(),
        }
    }

    /// Resolve to `f(value)` once this value resolves.
    ///
    /// On failure `f` is never called and the failure propagates unchanged.
    pub fn map<U, F>(self, f: F) -> AsyncValue<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        AsyncValue::from_future(async move { self.await.map(f) })
    }

    /// Like [`map`](Self::map), but `f` may fail; its error becomes the
    /// failure of the returned value.
    pub fn try_map<U, F>(self, f: F) -> AsyncValue<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        AsyncValue::from_future(async move { f(self.await?) })
    }

    /// Chain a call that itself returns an [`AsyncValue`], flattening the result.
    pub fn and_then<U, F>(self, f: F) -> AsyncValue<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> AsyncValue<U> + Send + 'static,
    {
        AsyncValue::from_future(async move { f(self.await?).await })
    }

    /// Recover from a failure with another value.
    pub fn or_else<F>(self, f: F) -> Self
    where
        F: FnOnce(Error) -> Self + Send + 'static,
    {
        Self::from_future(async move {
            match self.await {
                Ok(value) => Ok(value),
                Err(error) => f(error).await,
            }
        })
    }

    /// Rewrite the failure of this value.
    pub fn map_err<F>(self, f: F) -> Self
    where
        F: FnOnce(Error) -> Error + Send + 'static,
    {
        Self::from_future(async move { self.await.map_err(f) })
    }

    /// Access a member of the eventual value.
    ///
    /// The accessor may return a plain value or another [`AsyncValue`]
    /// (via [`Member`]); nested values are flattened.
    pub fn field<U, M, F>(self, accessor: F) -> AsyncValue<U>
    where
        U: Send + 'static,
        M: Into<Member<U>>,
        F: FnOnce(T) -> M + Send + 'static,
    {
        AsyncValue::from_future(async move {
            match accessor(self.await?).into() {
                Member::Ready(value) => Ok(value),
                Member::Deferred(value) => value.await,
            }
        })
    }

    /// Invoke the callable this value resolves to.
    pub fn invoke<A, U>(self, args: A) -> AsyncValue<U>
    where
        T: FnOnce(A) -> U,
        A: Send + 'static,
        U: Send + 'static,
    {
        AsyncValue::from_future(async move { Ok((self.await?)(args)) })
    }

    /// Take the outcome if it is available without waiting.
    ///
    /// Returns the value back unchanged while it is still pending.
    ///
    /// # Errors
    /// Returns `Err(self)` if the value has not settled yet.
    pub fn try_now(mut self) -> Result<Result<T>, Self> {
        match (&mut self.future).now_or_never() {
            Some(outcome) => Ok(outcome),
            None => Err(self),
        }
    }
}

/// Result of a member access: either a plain value or a nested async value.
pub enum Member<T> {
    Ready(T),
    Deferred(AsyncValue<T>),
}

impl<T> From<AsyncValue<T>> for Member<T> {
    fn from(value: AsyncValue<T>) -> Self {
        Self::Deferred(value)
    }
}

impl From<Value> for Member<Value> {
    fn from(value: Value) -> Self {
        Self::Ready(value)
    }
}

impl AsyncValue<Value> {
    /// Index into the eventual document by key.
    ///
    /// Fails if the document is not an object or lacks `key`.
    pub fn get(self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.try_map(move |document| take_key(document, &key))
    }

    /// Index into the eventual document by position.
    pub fn index(self, position: usize) -> Self {
        self.try_map(move |document| match document {
            Value::Array(mut items) if position < items.len() => Ok(items.swap_remove(position)),
            other => Err(Error::MalformedResponse(format!(
                "no element {position} in {other}"
            ))),
        })
    }

    /// Assign `value` under `key` once the document arrives.
    ///
    /// Resolves to the mutated document.
    pub fn set(self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        self.try_map(move |mut document| {
            let Some(object) = document.as_object_mut() else {
                return Err(Error::MalformedResponse(format!(
                    "cannot assign {key} on {document}"
                )));
            };
            object.insert(key, value);
            Ok(document)
        })
    }

    /// Deserialize the eventual document into `U`.
    pub fn decode<U>(self) -> AsyncValue<U>
    where
        U: serde::de::DeserializeOwned + Send + 'static,
    {
        self.try_map(|document| Ok(serde_json::from_value(document)?))
    }
}

pub(crate) fn take_key(document: Value, key: &str) -> Result<Value> {
    match document {
        Value::Object(mut object) => object
            .remove(key)
            .ok_or_else(|| Error::MalformedResponse(format!("missing key {key}"))),
        other => Err(Error::MalformedResponse(format!(
            "cannot read {key} from {other}"
        ))),
    }
}

impl<T> Future for AsyncValue<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.poll_unpin(cx)
    }
}

impl<T> fmt::Debug for AsyncValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncValue").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> From<Result<T>> for AsyncValue<T> {
    fn from(outcome: Result<T>) -> Self {
        Self::ready(outcome)
    }
}

struct OffloadGuard;

impl OffloadGuard {
    fn enter() -> Self {
        OFFLOADED.with(|flag| flag.set(true));
        Self
    }
}

impl Drop for OffloadGuard {
    fn drop(&mut self) {
        OFFLOADED.with(|flag| flag.set(false));
    }
}

/// Run blocking work on the blocking pool and wrap its result.
///
/// Offloading is only allowed from the scheduler itself; an offloaded task
/// that tries to offload again gets [`Error::NestedOffload`].
pub fn offload<T, F>(work: F) -> AsyncValue<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    if OFFLOADED.with(Cell::get) {
        tracing::error!("Refusing to offload from an offloaded task");
        return AsyncValue::failed(Error::NestedOffload);
    }
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return AsyncValue::failed(Error::failed("offload requires a running tokio runtime"));
    };

    let task = handle.spawn_blocking(move || {
        let _guard = OffloadGuard::enter();
        work()
    });
    AsyncValue::from_future(async move { Ok(task.await?) })
}
