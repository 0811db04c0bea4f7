//! # Fetch coordinator: fetch functions, contexts and task handles.
//!
//! Overlapping refreshes are reconciled optimistically instead of with a lock:
//! every refresh bumps the notifier's *generation* and captures it. When the
//! fetch finishes, its outcome is written only if the generation is unchanged.
//!
//! ```text
//! refresh() ─► gen = 7, write Loading, spawn fetch(ctx{gen 7}) ──────────────┐
//! refresh(force) ─► gen = 8, ctx{7}.token cancelled, spawn fetch(ctx{gen 8}) │
//!                                                                            ▼
//!                               fetch #7 completes: gen 8 != 7 → discard, Err(Cancelled)
//!                               fetch #8 completes: gen 8 == 8 → write Data, Ok(result)
//! ```
//!
//! ## Rules
//! - Cancellation is **cooperative**: a superseded fetch keeps running unless it
//!   checks [`FetchContext::is_active`] or awaits [`FetchContext::cancelled`]
//! - Results of superseded fetches are **discarded**, never written
//! - A fetch that panics is written as an error, it does not leave the notifier loading

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug_span, Instrument};

use crate::error::{BoxError, NotifierError};
use crate::result::{AsyncResult, Value};

use super::core::Shared;
use super::listeners::panic_message;

/// # Asynchronous source of a notifier's data.
///
/// Implement this for fetchers with their own state; closures go through [`FetchFn`].
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use fetchcell::{Fetch, FetchContext, NotifierError};
///
/// struct Profile;
///
/// #[async_trait]
/// impl Fetch<String> for Profile {
///     async fn fetch(&self, ctx: FetchContext<String>) -> Result<String, NotifierError> {
///         if ctx.is_cancelled() {
///             return Err(NotifierError::Cancelled);
///         }
///         Ok("alice".to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait Fetch<T: Value>: Send + Sync + 'static {
    /// Produces the next value. Errors are written into the notifier's result.
    async fn fetch(&self, ctx: FetchContext<T>) -> Result<T, NotifierError>;

    /// Name recorded on the `fetch` tracing span of every run.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Closure-backed [`Fetch`] implementation.
///
/// Wraps `F: Fn(FetchContext<T>) -> Fut`, producing a fresh future per refresh.
pub struct FetchFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> FetchFn<F> {
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<T, F, Fut, E> Fetch<T> for FetchFn<F>
where
    T: Value,
    F: Fn(FetchContext<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    async fn fetch(&self, ctx: FetchContext<T>) -> Result<T, NotifierError> {
        (self.f)(ctx).await.map_err(NotifierError::failed)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// What a finished fetch asks to write, resolved against the value current at completion.
pub(crate) enum Outcome<T> {
    /// `Data(value)` stamped now.
    Data(T),
    /// `Error`, keeping the given data or else the current data.
    Failed(NotifierError, Option<T>),
    /// `Loading`, keeping the current data.
    Loading,
    /// Written verbatim.
    Replace(AsyncResult<T>),
}

impl<T: Clone> Outcome<T> {
    pub(crate) fn resolve(self, current: &AsyncResult<T>) -> AsyncResult<T> {
        match self {
            Outcome::Data(data) => AsyncResult::ready(data),
            Outcome::Failed(error, Some(data)) => {
                AsyncResult::ready(data).to_error(error)
            }
            Outcome::Failed(error, None) => current.to_error(error),
            Outcome::Loading => current.to_loading(),
            Outcome::Replace(result) => result,
        }
    }
}

impl<T> From<Result<T, NotifierError>> for Outcome<T> {
    fn from(res: Result<T, NotifierError>) -> Self {
        match res {
            Ok(data) => Outcome::Data(data),
            Err(error) => Outcome::Failed(error, None),
        }
    }
}

/// Type-erased fetch function stored by a notifier.
pub(crate) type FetchHook<T> = Arc<dyn Fn(FetchContext<T>) -> BoxFuture<'static, Outcome<T>> + Send + Sync>;

pub(crate) fn hook_from_fetcher<T: Value>(fetcher: Arc<dyn Fetch<T>>) -> FetchHook<T> {
    Arc::new(move |ctx| {
        let fetcher = Arc::clone(&fetcher);
        let span = debug_span!("fetch", fetcher = fetcher.name(), generation = ctx.generation());
        async move { Outcome::from(fetcher.fetch(ctx).await) }
            .instrument(span)
            .boxed()
    })
}

/// Handle given to a running fetch.
///
/// Lets the fetch detect that it was superseded, cancelled or that its notifier
/// was disposed, so it can stop at its own suspension points.
pub struct FetchContext<T> {
    generation: u64,
    token: CancellationToken,
    notifier: Weak<Shared<T>>,
}

impl<T> Clone for FetchContext<T> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            token: self.token.clone(),
            notifier: Weak::clone(&self.notifier),
        }
    }
}

impl<T: Value> FetchContext<T> {
    pub(crate) fn new(generation: u64, token: CancellationToken, notifier: Weak<Shared<T>>) -> Self {
        Self {
            generation,
            token,
            notifier,
        }
    }

    /// Generation this fetch was started with.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// `true` while this fetch is still the latest one of a live notifier.
    pub fn is_active(&self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        match self.notifier.upgrade() {
            Some(shared) => shared.is_current(self.generation),
            None => false,
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        !self.is_active()
    }

    /// Completes once this fetch is superseded, cancelled or its notifier disposed.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Cancellation token of this fetch (child of the notifier's token).
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Data held by the notifier right now (the previous value while loading).
    pub fn previous_data(&self) -> Option<T> {
        self.notifier.upgrade()?.current().into_data()
    }
}

/// Handle to a spawned fetch.
///
/// Awaiting it yields the fetch's settled output, or `Err(Cancelled)` /
/// `Err(Disposed)` if the result was discarded. Dropping it does **not** cancel
/// the fetch.
#[must_use = "the fetch runs regardless; await the task to observe its outcome"]
pub struct FetchTask<R> {
    join: JoinHandle<Result<R, NotifierError>>,
}

impl<R> FetchTask<R> {
    pub(crate) fn new(join: JoinHandle<Result<R, NotifierError>>) -> Self {
        Self { join }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl<R> Future for FetchTask<R> {
    type Output = Result<R, NotifierError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.join).poll(cx).map(|joined| match joined {
            Ok(out) => out,
            Err(_join_err) => Err(NotifierError::Cancelled),
        })
    }
}

impl<R> std::fmt::Debug for FetchTask<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchTask")
            .field("finished", &self.join.is_finished())
            .finish()
    }
}

/// Runs `fut`, turning a panic into a failed outcome.
pub(crate) async fn run_guarded<T>(fut: BoxFuture<'static, Outcome<T>>) -> Outcome<T> {
    match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic_err) => {
            let info = panic_message(panic_err.as_ref());
            tracing::error!(panic = %info, "fetch panicked");
            Outcome::Failed(NotifierError::failed(format!("fetch panicked: {info}")), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_failed_keeps_current_data() {
        let current = AsyncResult::ready(1u8).to_loading();
        let next = Outcome::Failed(NotifierError::failed("x"), None).resolve(&current);
        assert!(next.is_error());
        assert_eq!(next.data(), Some(&1));
    }

    #[test]
    fn test_outcome_failed_with_data_overrides_current() {
        let current = AsyncResult::ready(1u8);
        let next = Outcome::Failed(NotifierError::Cancelled, Some(9)).resolve(&current);
        assert!(next.is_cancelled());
        assert_eq!(next.data(), Some(&9));
    }

    #[test]
    fn test_fetch_fn_reports_its_name() {
        let named = FetchFn::new("profile", |_ctx: FetchContext<u8>| async { Ok::<_, NotifierError>(1) });
        assert_eq!(Fetch::<u8>::name(&named), "profile");
    }

    #[tokio::test]
    async fn test_hook_from_fetcher_runs_named_fetch() {
        let fetcher = FetchFn::arc("profile", |_ctx: FetchContext<u8>| async { Ok::<_, NotifierError>(4) });
        let hook = hook_from_fetcher::<u8>(fetcher);
        let ctx = FetchContext::new(3, CancellationToken::new(), Weak::new());
        match hook(ctx).await {
            Outcome::Data(data) => assert_eq!(data, 4),
            _ => panic!("expected data"),
        }
    }

    #[tokio::test]
    async fn test_run_guarded_converts_panic() {
        let fut = async {
            if true {
                panic!("kaboom");
            }
            Outcome::Data(0u8)
        };
        let outcome = run_guarded(fut.boxed()).await;
        match outcome {
            Outcome::Failed(err, None) => assert!(err.to_string().contains("kaboom")),
            _ => panic!("expected failure"),
        }
    }
}
