//! # Keyed store: a cache of notifiers by key with idle eviction.
//!
//! ## Architecture
//! ```text
//! get_or_create(key) ──► hit: cached notifier
//!                    └─► miss: factory(key) ─► listen (store listener) ─► insert ─► EntryCreated
//!
//! notifier transition ──► store listener ──► last_update = now ──► on_result callbacks(key, result)
//!
//! sweeper (every sweep_interval, while listeners && entries):
//!   for each entry: stale && !mid-fetch && only the store listens
//!     ─► remove ─► drop store listener ─► teardown(key, notifier) ─► dispose ─► EntryEvicted
//!   ─► SweepCompleted
//! ```
//!
//! ## Rules
//! - The store **owns** what it creates: remove, clear and eviction dispose the notifier
//! - Teardown runs **exactly once** per entry, whichever path drops it
//! - The store lock is never held while notifier callbacks or user hooks run

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant};
use tracing::debug;

use crate::error::NotifierError;
use crate::notifier::{call_isolated, FetchTask, Notifier, Subscription};
use crate::result::{AsyncResult, Timestamp, Value};

use super::bus::Bus;
use super::config::StoreConfig;
use super::event::{StoreEvent, StoreEventKind};

type Factory<K, T> = Box<dyn Fn(&K) -> Notifier<T> + Send + Sync>;
type Teardown<K, T> = Box<dyn Fn(&K, &Notifier<T>) + Send + Sync>;
type ResultListener<K, T> = Arc<dyn Fn(&K, &AsyncResult<T>) + Send + Sync>;

/// Cached notifier plus the store's own listener on it.
struct Entry<T> {
    notifier: Notifier<T>,
    subscription: Subscription,
}

struct StoreState<K, T> {
    entries: HashMap<K, Entry<T>>,
    next_listener: u64,
    listeners: Vec<(u64, ResultListener<K, T>)>,
    last_update: Timestamp,
    sweeper: Option<AbortHandle>,
}

struct Inner<K, T> {
    cfg: StoreConfig,
    factory: Factory<K, T>,
    teardown: Option<Teardown<K, T>>,
    bus: Bus,
    state: Mutex<StoreState<K, T>>,
}

/// Cache of notifiers created on demand per key.
///
/// Cloning is cheap and yields a handle to the same store.
///
/// ## Example
/// ```rust
/// use fetchcell::{KeyedStore, Notifier, NotifierConfig, StoreConfig};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() -> Result<(), fetchcell::NotifierError> {
///     let users = KeyedStore::new(StoreConfig::default(), |id: &u32| {
///         let id = *id;
///         Notifier::builder(NotifierConfig::default())
///             .on_fetch(move |_ctx| async move { Ok::<_, fetchcell::NotifierError>(format!("user-{id}")) })
///             .build()
///     });
///
///     let user = users.get_or_create(7)?;
///     assert_eq!(user.refresh_and_await(false, false).await?, "user-7");
///     assert!(users.contains(&7));
///     Ok(())
/// }
/// ```
pub struct KeyedStore<K, T> {
    inner: Arc<Inner<K, T>>,
}

impl<K, T> Clone for KeyedStore<K, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, T> KeyedStore<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: Value,
{
    pub fn new(cfg: StoreConfig, factory: impl Fn(&K) -> Notifier<T> + Send + Sync + 'static) -> Self {
        Self::build(cfg, Box::new(factory), None)
    }

    /// Like [`new`](Self::new), with a hook run once for every entry the store drops.
    pub fn with_teardown(
        cfg: StoreConfig,
        factory: impl Fn(&K) -> Notifier<T> + Send + Sync + 'static,
        teardown: impl Fn(&K, &Notifier<T>) + Send + Sync + 'static,
    ) -> Self {
        Self::build(cfg, Box::new(factory), Some(Box::new(teardown)))
    }

    fn build(cfg: StoreConfig, factory: Factory<K, T>, teardown: Option<Teardown<K, T>>) -> Self {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        Self {
            inner: Arc::new(Inner {
                cfg,
                factory,
                teardown,
                bus,
                state: Mutex::new(StoreState {
                    entries: HashMap::new(),
                    next_listener: 0,
                    listeners: Vec::new(),
                    last_update: Timestamp::EPOCH,
                    sweeper: None,
                }),
            }),
        }
    }

    /// Returns the notifier for `key`, creating it with the factory on a miss.
    ///
    /// A new entry gets the store's listener, which counts as its first
    /// listener and so starts its on-demand refresh.
    pub fn get_or_create(&self, key: K) -> Result<Notifier<T>, NotifierError> {
        if let Some(existing) = self.get(&key) {
            return Ok(existing);
        }

        let notifier = (self.inner.factory)(&key);
        let weak = Arc::downgrade(&self.inner);
        let listener_key = key.clone();
        let subscription = notifier.listen(move |result: &AsyncResult<T>| {
            if let Some(inner) = weak.upgrade() {
                inner.publish_result(&listener_key, result);
            }
        })?;

        let raced = {
            let mut st = self.inner.state.lock();
            match st.entries.get(&key) {
                Some(existing) => Some(existing.notifier.clone()),
                None => {
                    st.entries.insert(
                        key.clone(),
                        Entry {
                            notifier: notifier.clone(),
                            subscription,
                        },
                    );
                    None
                }
            }
        };
        if let Some(existing) = raced {
            // another caller created the entry first
            notifier.dispose();
            return Ok(existing);
        }

        debug!(key = ?key, "store entry created");
        self.inner
            .bus
            .publish(StoreEvent::new(StoreEventKind::EntryCreated).with_key(format!("{key:?}")));
        Inner::ensure_sweeper(&self.inner);
        Ok(notifier)
    }

    pub fn get(&self, key: &K) -> Option<Notifier<T>> {
        self.inner.state.lock().entries.get(key).map(|e| e.notifier.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.state.lock().entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.state.lock().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().entries.is_empty()
    }

    /// When any entry last published a result.
    pub fn last_update(&self) -> Timestamp {
        self.inner.state.lock().last_update
    }

    /// Forced refresh of an existing entry; `Ok(None)` if the key is not cached
    /// or the notifier has no fetch function.
    pub fn refresh(&self, key: &K) -> Result<Option<FetchTask<AsyncResult<T>>>, NotifierError> {
        match self.get(key) {
            Some(notifier) => notifier.refresh(true, false),
            None => Ok(None),
        }
    }

    /// Marks one entry stale; returns `false` if the key is not cached.
    pub fn invalidate(&self, key: &K) -> bool {
        match self.get(key) {
            Some(notifier) => notifier.invalidate().is_ok(),
            None => false,
        }
    }

    pub fn invalidate_all(&self) {
        for notifier in self.notifiers() {
            let _ = notifier.invalidate();
        }
    }

    /// Cancels the in-flight refresh of one entry.
    pub fn cancel(&self, key: &K) -> Result<bool, NotifierError> {
        match self.get(key) {
            Some(notifier) => notifier.cancel(false),
            None => Ok(false),
        }
    }

    /// Drops one entry: teardown, then dispose. Returns `false` if not cached.
    pub fn remove(&self, key: &K) -> bool {
        let removed = self.inner.state.lock().entries.remove(key);
        match removed {
            Some(entry) => {
                self.inner.release(key, entry);
                debug!(key = ?key, "store entry removed");
                self.inner
                    .bus
                    .publish(StoreEvent::new(StoreEventKind::EntryRemoved).with_key(format!("{key:?}")));
                true
            }
            None => false,
        }
    }

    /// Drops every entry, stale or not, running the teardown for each.
    pub fn clear(&self) {
        let entries: Vec<(K, Entry<T>)> = {
            let mut st = self.inner.state.lock();
            st.entries.drain().collect()
        };
        let count = entries.len();
        for (key, entry) in entries {
            self.inner.release(&key, entry);
        }
        debug!(count, "store cleared");
        self.inner
            .bus
            .publish(StoreEvent::new(StoreEventKind::StoreCleared).with_count(count));
    }

    /// Registers a callback for every result transition of every entry.
    pub fn on_result(&self, callback: impl Fn(&K, &AsyncResult<T>) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut st = self.inner.state.lock();
            st.next_listener += 1;
            let id = st.next_listener;
            st.listeners.push((id, Arc::new(callback)));
            id
        };
        Inner::ensure_sweeper(&self.inner);

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.state.lock().listeners.retain(|(entry, _)| *entry != id);
            }
        })
    }

    /// Subscribes to lifecycle events sent from now on.
    pub fn events(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.bus.subscribe()
    }

    /// Runs one eviction pass now; returns the number of evicted entries.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    fn notifiers(&self) -> Vec<Notifier<T>> {
        self.inner
            .state
            .lock()
            .entries
            .values()
            .map(|e| e.notifier.clone())
            .collect()
    }
}

impl<K, T> Inner<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: Value,
{
    fn publish_result(&self, key: &K, result: &AsyncResult<T>) {
        let listeners: Vec<ResultListener<K, T>> = {
            let mut st = self.state.lock();
            st.last_update = Timestamp::now();
            st.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in listeners {
            call_isolated("store result listener", || listener(key, result));
        }
    }

    /// Drops the store listener, runs the teardown and disposes the notifier.
    fn release(&self, key: &K, entry: Entry<T>) {
        let Entry {
            notifier,
            subscription,
        } = entry;
        drop(subscription);
        if let Some(teardown) = &self.teardown {
            call_isolated("store teardown", || teardown(key, &notifier));
        }
        notifier.dispose();
    }

    /// An entry is idle when it is stale, not mid-fetch and observed only by the store.
    fn is_idle(entry: &Entry<T>) -> bool {
        entry.notifier.is_stale()
            && !entry.notifier.value().is_loading_data()
            && entry.notifier.listener_count() <= 1
    }

    fn sweep(&self) -> usize {
        let evicted: Vec<(K, Entry<T>)> = {
            let mut st = self.state.lock();
            let idle: Vec<K> = st
                .entries
                .iter()
                .filter(|(_, entry)| Self::is_idle(entry))
                .map(|(key, _)| key.clone())
                .collect();
            idle.into_iter()
                .filter_map(|key| st.entries.remove(&key).map(|entry| (key, entry)))
                .collect()
        };

        let count = evicted.len();
        for (key, entry) in evicted {
            self.release(&key, entry);
            debug!(key = ?key, "idle store entry evicted");
            self.bus
                .publish(StoreEvent::new(StoreEventKind::EntryEvicted).with_key(format!("{key:?}")));
        }
        self.bus
            .publish(StoreEvent::new(StoreEventKind::SweepCompleted).with_count(count));
        count
    }

    /// `true` while the periodic sweep has something to do.
    fn wants_sweep(st: &StoreState<K, T>) -> bool {
        !st.listeners.is_empty() && !st.entries.is_empty()
    }

    /// Starts the periodic sweep if it is enabled, needed and not running.
    fn ensure_sweeper(this: &Arc<Self>) {
        let Some(period) = this.cfg.sweep_period() else {
            return;
        };
        let mut st = this.state.lock();
        if st.sweeper.is_some() || !Self::wants_sweep(&st) {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            debug!("no tokio runtime; store sweep not started");
            return;
        };
        let Some(first) = Instant::now().checked_add(period) else {
            debug!(period_s = period.as_secs(), "sweep interval out of range; store sweep not started");
            return;
        };

        let weak: Weak<Self> = Arc::downgrade(this);
        let sweeper = runtime.spawn(async move {
            let mut ticker = interval_at(first, period);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.sweep();

                let mut st = inner.state.lock();
                if !Self::wants_sweep(&st) {
                    st.sweeper = None;
                    debug!("store sweep stopped");
                    break;
                }
            }
        });
        st.sweeper = Some(sweeper.abort_handle());
        debug!(period_ms = period.as_millis() as u64, "store sweep started");
    }
}

impl<K, T> Drop for Inner<K, T> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.state.get_mut().sweeper.take() {
            sweeper.abort();
        }
    }
}
