//! # Notifier: a listenable, self-refreshing slot holding one [`AsyncResult`].
//!
//! ## State machine
//! ```text
//!            ┌──────────── to_initial() / auto-reset ─────────────┐
//!            ▼                                                    │
//!        Initial ──refresh()──► Loading ──fetch ok──► Data ───────┤
//!                                  │  ▲                 │         │
//!                                  │  └──refresh()──────┘         │
//!                                  └──fetch err / cancel──► Error ┘
//! ```
//!
//! ## Rules
//! - **On-demand refresh**: the first listener schedules `refresh(false, false)` on the next tick
//! - **Refresh need**: Initial → yes; Loading → no; Data → if stale; Error(Cancelled) → yes;
//!   other Error → only with `refresh_on_error`; `force` always refreshes
//! - **Loading is always announced**: a starting refresh notifies even if the value looks unchanged
//! - **Superseded results are dropped**: see [`fetch`](super::fetch)
//! - **Dispose is terminal**: writes, refreshes and listener registration fail with `Disposed`
//! - **Error fallback**: with a fallback configured, `Error` is never stored
//!
//! User callbacks (listeners, fetches) never run under the state lock. The
//! error fallback is the exception: it runs inside the write and must not
//! touch the notifier.

use std::future::Future;
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BoxError, NotifierError};
use crate::result::{AsyncResult, Value};

use super::builder::NotifierBuilder;
use super::config::NotifierConfig;
use super::fetch::{run_guarded, FetchContext, FetchHook, FetchTask, Outcome};
use super::listeners::{deliver, ListenerId, ListenerSet, Subscription};
use super::stream::StreamSlot;

pub(crate) type ResetHook = Arc<dyn Fn() + Send + Sync>;
pub(crate) type FallbackHook<T> = Arc<dyn Fn(&NotifierError) -> T + Send + Sync>;

/// User-supplied callbacks, fixed at construction.
pub(crate) struct Hooks<T> {
    pub(crate) fetch: Option<FetchHook<T>>,
    pub(crate) reset: Option<ResetHook>,
    pub(crate) fallback: Option<FallbackHook<T>>,
}

/// Mutable part of a notifier, guarded by one lock.
pub(crate) struct State<T> {
    pub(crate) value: AsyncResult<T>,
    pub(crate) active: bool,
    /// Bumped by every refresh start, cancel, reset, dispose and upstream write.
    pub(crate) generation: u64,
    /// Bumped by every stored write.
    pub(crate) revision: u64,
    pub(crate) fetch_token: Option<CancellationToken>,
    /// Identity of the currently bound stream.
    pub(crate) stream_seq: u64,
    pub(crate) stream: Option<StreamSlot>,
    pub(crate) listeners: ListenerSet<T>,
    /// Upstream subscriptions owned by derived notifiers.
    pub(crate) attachments: Vec<Subscription>,
}

pub(crate) struct Shared<T> {
    pub(crate) cfg: NotifierConfig,
    pub(crate) hooks: Hooks<T>,
    /// Parent of every fetch token; cancelled on dispose.
    pub(crate) root: CancellationToken,
    pub(crate) state: Mutex<State<T>>,
}

impl<T: Value> Shared<T> {
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        let st = self.state.lock();
        st.active && st.generation == generation
    }

    pub(crate) fn current(&self) -> AsyncResult<T> {
        self.state.lock().value.clone()
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let st = self.state.get_mut();
        if let Some(stream) = st.stream.take() {
            stream.abort();
        }
        self.root.cancel();
    }
}

/// A fetch run claimed under the state lock, not yet spawned.
struct Ticket<T> {
    ctx: FetchContext<T>,
    revision: u64,
    /// Listeners have a queued `Loading` to receive.
    drain: bool,
}

#[inline]
pub(crate) fn ensure_active<T>(st: &State<T>) -> Result<(), NotifierError> {
    if st.active {
        Ok(())
    } else {
        Err(NotifierError::Disposed)
    }
}

/// Shared handle to a reactive async value.
///
/// Cloning is cheap and yields a handle to the **same** notifier.
///
/// ## Example
/// ```rust
/// use fetchcell::{Notifier, NotifierConfig};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() -> Result<(), fetchcell::NotifierError> {
///     let user = Notifier::builder(NotifierConfig::default())
///         .on_fetch(|_ctx| async { Ok::<_, fetchcell::NotifierError>("alice".to_string()) })
///         .build();
///
///     let name = user.refresh_and_await(false, false).await?;
///     assert_eq!(name, "alice");
///     assert!(user.is_fresh());
///     Ok(())
/// }
/// ```
pub struct Notifier<T> {
    pub(crate) shared: Arc<Shared<T>>,
}

impl<T> Clone for Notifier<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Non-owning handle, see [`Notifier::downgrade`].
pub struct WeakNotifier<T> {
    shared: Weak<Shared<T>>,
}

impl<T> Clone for WeakNotifier<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<T> WeakNotifier<T> {
    pub fn upgrade(&self) -> Option<Notifier<T>> {
        self.shared.upgrade().map(|shared| Notifier { shared })
    }
}

impl<T: Value> Notifier<T> {
    /// Creates a notifier without a fetch function.
    ///
    /// `Some(data)` starts as `Data`, `None` as `Initial`.
    pub fn new(initial: Option<T>) -> Self {
        let initial = match initial {
            Some(data) => AsyncResult::ready(data),
            None => AsyncResult::initial(),
        };
        Self::from_result(initial)
    }

    /// Creates a notifier holding `initial`, without a fetch function.
    pub fn from_result(initial: AsyncResult<T>) -> Self {
        Self::builder(NotifierConfig::default())
            .initial_result(initial)
            .build()
    }

    pub fn builder(cfg: NotifierConfig) -> NotifierBuilder<T> {
        NotifierBuilder::new(cfg)
    }

    pub(crate) fn from_parts(cfg: NotifierConfig, hooks: Hooks<T>, initial: AsyncResult<T>) -> Self {
        let initial = match (&hooks.fallback, initial) {
            (Some(fallback), AsyncResult::Error { error, .. }) => AsyncResult::ready(fallback(&error)),
            (_, initial) => initial,
        };
        Self {
            shared: Arc::new(Shared {
                cfg,
                hooks,
                root: CancellationToken::new(),
                state: Mutex::new(State {
                    value: initial,
                    active: true,
                    generation: 0,
                    revision: 0,
                    fetch_token: None,
                    stream_seq: 0,
                    stream: None,
                    listeners: ListenerSet::new(),
                    attachments: Vec::new(),
                }),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakNotifier<T> {
        WeakNotifier {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.shared.cfg
    }

    // ---------------------------
    // Reads
    // ---------------------------

    /// Snapshot of the current result.
    pub fn value(&self) -> AsyncResult<T> {
        self.shared.current()
    }

    /// Current data regardless of variant, `Err(NoData)` if there is none.
    pub fn data(&self) -> Result<T, NotifierError> {
        self.data_or_none().ok_or(NotifierError::NoData)
    }

    pub fn data_or(&self, fallback: T) -> T {
        self.data_or_none().unwrap_or(fallback)
    }

    pub fn data_or_none(&self) -> Option<T> {
        self.shared.state.lock().value.data().cloned()
    }

    pub fn is_active(&self) -> bool {
        self.shared.state.lock().active
    }

    /// `Data` that has not expired (and was not invalidated).
    pub fn is_fresh(&self) -> bool {
        self.fresh(&self.shared.state.lock().value)
    }

    pub fn is_stale(&self) -> bool {
        !self.is_fresh()
    }

    pub fn has_listeners(&self) -> bool {
        !self.shared.state.lock().listeners.is_empty()
    }

    pub fn listener_count(&self) -> usize {
        self.shared.state.lock().listeners.len()
    }

    fn fresh(&self, value: &AsyncResult<T>) -> bool {
        if !value.is_data() || value.last_update().is_epoch() {
            return false;
        }
        match self.shared.cfg.expires_after() {
            Some(expiration) => !value.last_update().is_older_than(expiration),
            None => true,
        }
    }

    fn needs_refresh(&self, value: &AsyncResult<T>) -> bool {
        match value {
            AsyncResult::Initial { .. } => true,
            AsyncResult::Loading { .. } => false,
            AsyncResult::Data { .. } => !self.fresh(value),
            AsyncResult::Error {
                error: NotifierError::Cancelled,
                ..
            } => true,
            AsyncResult::Error { .. } => self.shared.cfg.refresh_on_error,
        }
    }

    // ---------------------------
    // Writes
    // ---------------------------

    pub fn set_data(&self, data: T) -> Result<(), NotifierError> {
        self.commit(AsyncResult::ready(data))
    }

    pub fn set_value(&self, value: AsyncResult<T>) -> Result<(), NotifierError> {
        self.commit(value)
    }

    /// Writes `Data` from `explicit` or the current data, `Error(NoData)` if neither exists.
    pub fn to_data(&self, explicit: Option<T>) -> Result<(), NotifierError> {
        self.update(|value| value.to_data(explicit))
    }

    pub fn to_loading(&self) -> Result<(), NotifierError> {
        self.update(AsyncResult::to_loading)
    }

    pub fn to_initial(&self) -> Result<(), NotifierError> {
        self.update(AsyncResult::to_initial)
    }

    pub fn to_error(&self, error: NotifierError) -> Result<(), NotifierError> {
        self.update(|value| value.to_error(error))
    }

    pub fn to_cancelled(&self) -> Result<(), NotifierError> {
        self.update(AsyncResult::to_cancelled)
    }

    /// Restamps the current result with now, re-arming expiration.
    pub fn touch(&self) -> Result<(), NotifierError> {
        self.update(AsyncResult::to_fresh)
    }

    /// Marks the current result stale so the next refresh fetches.
    pub fn invalidate(&self) -> Result<(), NotifierError> {
        self.update(AsyncResult::to_stale)
    }

    fn commit(&self, next: AsyncResult<T>) -> Result<(), NotifierError> {
        self.update(move |_| next)
    }

    fn update(&self, f: impl FnOnce(&AsyncResult<T>) -> AsyncResult<T>) -> Result<(), NotifierError> {
        let drain = {
            let mut st = self.shared.state.lock();
            ensure_active(&st)?;
            let next = f(&st.value);
            self.write_locked(&mut st, next, false)
        };
        if drain {
            self.drain();
        }
        Ok(())
    }

    /// Stores `next` and queues it for listeners; `true` means the caller must drain.
    pub(crate) fn write_locked(&self, st: &mut State<T>, next: AsyncResult<T>, force: bool) -> bool {
        let next = match (&self.shared.hooks.fallback, next) {
            (Some(fallback), AsyncResult::Error { error, .. }) => AsyncResult::ready(fallback(&error)),
            (_, next) => next,
        };
        if !force && st.value == next {
            return false;
        }
        st.value = next.clone();
        st.revision += 1;
        st.listeners.enqueue(next)
    }

    /// Delivers queued results until the queue is empty.
    pub(crate) fn drain(&self) {
        loop {
            let delivery = self.shared.state.lock().listeners.next_delivery();
            match delivery {
                Some((result, callbacks)) => deliver(&result, &callbacks),
                None => break,
            }
        }
    }

    /// Invalidates any in-flight fetch or stream.
    pub(crate) fn invalidate_inflight(st: &mut State<T>) {
        st.generation += 1;
        st.stream_seq += 1;
        if let Some(token) = st.fetch_token.take() {
            token.cancel();
        }
        if let Some(stream) = st.stream.take() {
            stream.abort();
        }
    }

    /// Writes upstream state of a derived notifier, superseding in-flight work.
    pub(crate) fn supersede(&self, outcome: Outcome<T>) {
        let drain = {
            let mut st = self.shared.state.lock();
            if !st.active {
                return;
            }
            if let (Outcome::Data(next), AsyncResult::Data { data, .. }) = (&outcome, &st.value) {
                if next == data {
                    return;
                }
            }
            Self::invalidate_inflight(&mut st);
            let next = outcome.resolve(&st.value);
            self.write_locked(&mut st, next, false)
        };
        if drain {
            self.drain();
        }
    }

    /// Ties upstream subscriptions to this notifier's lifetime.
    pub(crate) fn attach(&self, subscriptions: Vec<Subscription>) -> Result<(), NotifierError> {
        let mut st = self.shared.state.lock();
        ensure_active(&st)?;
        st.attachments.extend(subscriptions);
        Ok(())
    }

    fn run_reset_hook(&self) {
        if let Some(reset) = &self.shared.hooks.reset {
            reset();
        }
    }

    // ---------------------------
    // Listeners
    // ---------------------------

    /// Registers a callback for every result transition.
    ///
    /// The first listener schedules an on-demand refresh on the next tick.
    pub fn add_listener(
        &self,
        listener: impl Fn(&AsyncResult<T>) + Send + Sync + 'static,
    ) -> Result<ListenerId, NotifierError> {
        let (id, first) = {
            let mut st = self.shared.state.lock();
            ensure_active(&st)?;
            let first = st.listeners.is_empty();
            (st.listeners.insert(Arc::new(listener)), first)
        };
        if first {
            self.schedule_refresh();
        }
        Ok(id)
    }

    /// Removes a listener; returns `false` if it was not registered.
    ///
    /// Removing the last listener resets the notifier when
    /// `auto_reset_when_unobserved` is set.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let (removed, reset) = {
            let mut st = self.shared.state.lock();
            let Some(removed) = st.listeners.remove(id) else {
                return false;
            };
            let reset = st.active && st.listeners.is_empty() && self.shared.cfg.auto_reset_when_unobserved;
            (removed, reset)
        };
        drop(removed);
        if reset {
            self.auto_reset();
        }
        true
    }

    /// Like [`add_listener`](Self::add_listener), removed when the [`Subscription`] drops.
    pub fn listen(
        &self,
        listener: impl Fn(&AsyncResult<T>) + Send + Sync + 'static,
    ) -> Result<Subscription, NotifierError> {
        let id = self.add_listener(listener)?;
        let weak = self.downgrade();
        Ok(Subscription::new(move || {
            if let Some(notifier) = weak.upgrade() {
                notifier.remove_listener(id);
            }
        }))
    }

    fn schedule_refresh(&self) {
        if self.shared.hooks.fetch.is_none() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            debug!("no tokio runtime; on-demand refresh skipped");
            return;
        };
        let weak = self.downgrade();
        runtime.spawn(async move {
            let Some(notifier) = weak.upgrade() else {
                return;
            };
            if !notifier.has_listeners() {
                return;
            }
            if let Err(err) = notifier.refresh(false, false) {
                debug!(error = %err, "on-demand refresh skipped");
            }
        });
    }

    fn auto_reset(&self) {
        {
            let mut st = self.shared.state.lock();
            if !st.active || !st.listeners.is_empty() {
                return;
            }
            Self::invalidate_inflight(&mut st);
            // nobody is listening, so there is nothing to drain
            let _ = self.write_locked(&mut st, AsyncResult::initial(), false);
        }
        self.run_reset_hook();
        debug!("last listener removed; notifier reset");
    }

    // ---------------------------
    // Refresh control
    // ---------------------------

    /// Refreshes through the fetch function if needed (or if `force`).
    ///
    /// Returns the spawned fetch, or `None` if the refresh was skipped. A
    /// skipped refresh with `always_touch` restamps the current result instead.
    /// Fetch errors are written into the result, they are not returned here.
    pub fn refresh(
        &self,
        force: bool,
        always_touch: bool,
    ) -> Result<Option<FetchTask<AsyncResult<T>>>, NotifierError> {
        let started = {
            let mut st = self.shared.state.lock();
            ensure_active(&st)?;
            match &self.shared.hooks.fetch {
                Some(fetch) if force || self.needs_refresh(&st.value) => {
                    let runtime = Handle::try_current().map_err(|_| NotifierError::NoRuntime)?;
                    let fetch = Arc::clone(fetch);
                    Some((runtime, fetch, self.begin_fetch(&mut st)))
                }
                _ => None,
            }
        };
        match started {
            Some((runtime, fetch, ticket)) => Ok(Some(self.spawn_fetch(&runtime, ticket, move |ctx| fetch(ctx), Ok))),
            None => {
                if always_touch {
                    self.touch()?;
                }
                Ok(None)
            }
        }
    }

    /// Refreshes and waits for the settled data.
    ///
    /// If no refresh was started, waits for the one in flight (if any) or
    /// settles the current result.
    pub async fn refresh_and_await(&self, force: bool, always_touch: bool) -> Result<T, NotifierError> {
        match self.refresh(force, always_touch)? {
            Some(task) => task.await?.into_result(),
            None => {
                let current = self.value();
                if current.is_loading_data() {
                    self.future().await
                } else {
                    current.into_result()
                }
            }
        }
    }

    /// Cancels the in-flight refresh, leaving `Error(Cancelled)` with the prior data.
    ///
    /// Acts only while loading unless `always`. Returns whether it acted.
    pub fn cancel(&self, always: bool) -> Result<bool, NotifierError> {
        let drain = {
            let mut st = self.shared.state.lock();
            ensure_active(&st)?;
            if !(always || st.value.is_loading()) {
                return Ok(false);
            }
            Self::invalidate_inflight(&mut st);
            let next = st.value.to_cancelled();
            self.write_locked(&mut st, next, false)
        };
        if drain {
            self.drain();
        }
        self.run_reset_hook();
        debug!("notifier cancelled");
        Ok(true)
    }

    /// Terminal: drops listeners and upstream subscriptions, discards in-flight results.
    pub fn dispose(&self) {
        let (listeners, attachments) = {
            let mut st = self.shared.state.lock();
            if !st.active {
                return;
            }
            st.active = false;
            Self::invalidate_inflight(&mut st);
            (
                std::mem::replace(&mut st.listeners, ListenerSet::new()),
                std::mem::take(&mut st.attachments),
            )
        };
        self.shared.root.cancel();
        drop(listeners);
        drop(attachments);
        self.run_reset_hook();
        debug!("notifier disposed");
    }

    // ---------------------------
    // Async helpers
    // ---------------------------

    /// Runs a one-shot async computation under the fetch protocol and stores its data.
    ///
    /// The task resolves with the data, the error written into the result, or
    /// `Cancelled` / `Disposed` if it was superseded.
    pub fn set_data_async<F, E>(&self, fut: F) -> Result<FetchTask<T>, NotifierError>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let fut = async move { Outcome::from(fut.await.map_err(NotifierError::failed)) }.boxed();
        self.launch(move |_ctx| fut, AsyncResult::into_result)
    }

    /// Runs a one-shot async computation under the fetch protocol and stores its result verbatim.
    pub fn set_result_async<F>(&self, fut: F) -> Result<FetchTask<AsyncResult<T>>, NotifierError>
    where
        F: Future<Output = AsyncResult<T>> + Send + 'static,
    {
        let fut = async move { Outcome::Replace(fut.await) }.boxed();
        self.launch(move |_ctx| fut, Ok)
    }

    /// Resolves with the next settled value: `Ok` on `Data`, `Err` on `Error`.
    ///
    /// Resolves immediately if the current result is already settled. Waiting
    /// counts as a listener, so it triggers the on-demand refresh.
    pub async fn future(&self) -> Result<T, NotifierError> {
        let current = self.value();
        if !current.is_loading() {
            return current.into_result();
        }

        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let subscription = self.listen(move |result| {
            if result.is_loading() {
                return;
            }
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(result.clone().into_result());
            }
        })?;

        let current = self.value();
        let settled = if current.is_loading() {
            rx.await.unwrap_or(Err(NotifierError::Disposed))
        } else {
            current.into_result()
        };
        drop(subscription);
        settled
    }

    /// Starts one run of the fetch protocol.
    ///
    /// Bumps the generation, writes a fresh `Loading` and spawns `start(ctx)`.
    /// On completion the outcome is written only if the generation still matches.
    pub(crate) fn launch<R, M>(
        &self,
        start: impl FnOnce(FetchContext<T>) -> BoxFuture<'static, Outcome<T>>,
        finish: M,
    ) -> Result<FetchTask<R>, NotifierError>
    where
        R: Send + 'static,
        M: FnOnce(AsyncResult<T>) -> Result<R, NotifierError> + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| NotifierError::NoRuntime)?;
        let ticket = {
            let mut st = self.shared.state.lock();
            ensure_active(&st)?;
            self.begin_fetch(&mut st)
        };
        Ok(self.spawn_fetch(&runtime, ticket, start, finish))
    }

    /// Claims a new generation and writes `Loading`; the caller holds the lock.
    fn begin_fetch(&self, st: &mut State<T>) -> Ticket<T> {
        st.generation += 1;
        if let Some(previous) = st.fetch_token.take() {
            previous.cancel();
        }
        let token = self.shared.root.child_token();
        st.fetch_token = Some(token.clone());
        let loading = st.value.to_loading();
        let drain = self.write_locked(st, loading, true);
        Ticket {
            ctx: FetchContext::new(st.generation, token, Arc::downgrade(&self.shared)),
            revision: st.revision,
            drain,
        }
    }

    fn spawn_fetch<R, M>(
        &self,
        runtime: &Handle,
        ticket: Ticket<T>,
        start: impl FnOnce(FetchContext<T>) -> BoxFuture<'static, Outcome<T>>,
        finish: M,
    ) -> FetchTask<R>
    where
        R: Send + 'static,
        M: FnOnce(AsyncResult<T>) -> Result<R, NotifierError> + Send + 'static,
    {
        let Ticket { ctx, revision, drain } = ticket;
        if drain {
            self.drain();
        }

        let generation = ctx.generation();
        debug!(generation, "refresh started");
        let fut = start(ctx);
        let notifier = self.clone();
        let join = runtime.spawn(async move {
            let outcome = run_guarded(fut).await;
            notifier.complete(generation, revision, outcome).and_then(finish)
        });
        FetchTask::new(join)
    }

    fn complete(
        &self,
        generation: u64,
        revision: u64,
        outcome: Outcome<T>,
    ) -> Result<AsyncResult<T>, NotifierError> {
        let (written, drain) = {
            let mut st = self.shared.state.lock();
            if !st.active {
                debug!(generation, "fetch finished after dispose; result dropped");
                return Err(NotifierError::Disposed);
            }
            if st.generation != generation {
                debug!(generation, current = st.generation, "fetch superseded; result dropped");
                return Err(NotifierError::Cancelled);
            }
            if st.revision != revision {
                warn!(generation, "result changed while a fetch was in flight; overwriting");
            }
            st.fetch_token = None;
            let next = outcome.resolve(&st.value);
            let drain = self.write_locked(&mut st, next, false);
            (st.value.clone(), drain)
        };
        if drain {
            self.drain();
        }
        Ok(written)
    }
}

impl<T: Value + std::fmt::Debug> std::fmt::Debug for Notifier<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.shared.state.lock();
        f.debug_struct("Notifier")
            .field("value", &st.value)
            .field("active", &st.active)
            .field("generation", &st.generation)
            .field("listeners", &st.listeners.len())
            .finish()
    }
}
