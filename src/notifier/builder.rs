use std::future::Future;
use std::sync::Arc;

use crate::error::{BoxError, NotifierError};
use crate::result::{AsyncResult, Value};

use super::config::NotifierConfig;
use super::core::{Hooks, Notifier};
use super::fetch::{hook_from_fetcher, Fetch, FetchContext, FetchFn, FetchHook};

/// Builder for a [`Notifier`] with a fetch function and lifecycle hooks.
///
/// ```rust
/// use std::time::Duration;
/// use fetchcell::{Notifier, NotifierConfig};
///
/// let prices = Notifier::builder(NotifierConfig::default().with_expiration(Duration::from_secs(30)))
///     .initial_data(vec![1.0_f64])
///     .on_fetch(|_ctx| async { Ok::<_, std::io::Error>(vec![1.5_f64]) })
///     .error_fallback(|_err| Vec::new())
///     .build();
/// assert!(prices.value().is_data());
/// ```
pub struct NotifierBuilder<T: Value> {
    cfg: NotifierConfig,
    initial: AsyncResult<T>,
    fetch: Option<FetchHook<T>>,
    reset: Option<Arc<dyn Fn() + Send + Sync>>,
    fallback: Option<Arc<dyn Fn(&NotifierError) -> T + Send + Sync>>,
}

impl<T: Value> NotifierBuilder<T> {
    pub fn new(cfg: NotifierConfig) -> Self {
        Self {
            cfg,
            initial: AsyncResult::initial(),
            fetch: None,
            reset: None,
            fallback: None,
        }
    }

    /// Starts as `Data(data)`.
    pub fn initial_data(mut self, data: T) -> Self {
        self.initial = AsyncResult::ready(data);
        self
    }

    pub fn initial_result(mut self, initial: AsyncResult<T>) -> Self {
        self.initial = initial;
        self
    }

    /// Fetch function as a closure; errors are converted with [`NotifierError::failed`].
    pub fn on_fetch<F, Fut, E>(self, f: F) -> Self
    where
        F: Fn(FetchContext<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.fetcher(FetchFn::arc("on_fetch", f))
    }

    /// Fetch function as a [`Fetch`] implementation.
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetch<T>>) -> Self {
        self.fetch = Some(hook_from_fetcher(fetcher));
        self
    }

    pub(crate) fn fetch_hook(mut self, hook: FetchHook<T>) -> Self {
        self.fetch = Some(hook);
        self
    }

    /// Called after cancel, auto-reset and dispose.
    pub fn on_reset(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.reset = Some(Arc::new(f));
        self
    }

    /// Maps every error write to `Data(f(error))`.
    ///
    /// Runs inside the write, so it must not call back into the notifier.
    pub fn error_fallback(mut self, f: impl Fn(&NotifierError) -> T + Send + Sync + 'static) -> Self {
        self.fallback = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Notifier<T> {
        let hooks = Hooks {
            fetch: self.fetch,
            reset: self.reset,
            fallback: self.fallback,
        };
        Notifier::from_parts(self.cfg, hooks, self.initial)
    }
}
