//! # Combine: one notifier derived from several sources.
//!
//! ```text
//!  source A ──listen──┐
//!  source B ──listen──┼──► evaluate() ──► supersede(outcome) ──► derived
//!  source N ──listen──┘        ▲
//!                 refresh(..) ─┘ (the derived notifier's fetch)
//! ```
//!
//! `evaluate` snapshots every source, folds the states (see
//! [`aggregate`](super::dependency::aggregate)) and calls the user function only
//! when every source has data.

use std::sync::Arc;

use futures::FutureExt;

use crate::error::NotifierError;
use crate::notifier::{FetchContext, Notifier, Outcome};
use crate::result::{AsyncResult, Value};

use super::dependency::{aggregate, Aggregate, Dependencies, SourceState};
use super::ComposeOptions;

pub(crate) type Evaluate<U> = Arc<dyn Fn() -> Option<Outcome<U>> + Send + Sync>;

/// Turns source states into what the derived notifier should write.
///
/// `combined` is called only if every source has data.
pub(crate) fn resolve<U>(
    states: &[SourceState],
    ignore_loading: bool,
    combined: impl FnOnce() -> Option<U>,
) -> Option<Outcome<U>> {
    match aggregate(states, ignore_loading) {
        Aggregate::Failed { error, complete } => {
            let data = if complete { combined() } else { None };
            Some(Outcome::Failed(error, data))
        }
        Aggregate::Loading => Some(Outcome::Loading),
        Aggregate::Ready => combined().map(Outcome::Data),
        Aggregate::Pending => None,
    }
}

/// Builds a derived notifier driven by `evaluate`.
///
/// The result is evaluated at creation, on every source transition (through
/// the callbacks `watch` registers) and on every refresh.
pub(crate) fn derive<U: Value>(
    evaluate: Evaluate<U>,
    opts: ComposeOptions,
    watch: impl FnOnce(&mut Dependencies, Arc<dyn Fn() + Send + Sync>) -> Result<(), NotifierError>,
) -> Result<Notifier<U>, NotifierError> {
    let initial = match evaluate() {
        Some(outcome) => outcome.resolve(&AsyncResult::initial()),
        None => AsyncResult::initial(),
    };

    let on_fetch = Arc::clone(&evaluate);
    let target = Notifier::builder(opts.config)
        .initial_result(initial)
        .fetch_hook(Arc::new(move |_ctx: FetchContext<U>| {
            let outcome = on_fetch().unwrap_or(Outcome::Loading);
            futures::future::ready(outcome).boxed()
        }))
        .build();

    let weak = target.downgrade();
    let on_change: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
        let Some(target) = weak.upgrade() else {
            return;
        };
        if let Some(outcome) = evaluate() {
            target.supersede(outcome);
        }
    });

    let mut deps = Dependencies::new();
    watch(&mut deps, on_change)?;
    deps.attach_to(&target)?;
    Ok(target)
}

impl<A: Value> Notifier<A> {
    /// Derives a notifier from `self` and `other` combined by `f`.
    ///
    /// ```rust
    /// use fetchcell::Notifier;
    ///
    /// let x = Notifier::new(Some("X".to_string()));
    /// let y = Notifier::new(Some("Y".to_string()));
    /// let xy = x.combine_latest(&y, |a, b| format!("{a}{b}")).unwrap();
    /// assert_eq!(xy.data().unwrap(), "XY");
    /// ```
    pub fn combine_latest<B, U, F>(&self, other: &Notifier<B>, f: F) -> Result<Notifier<U>, NotifierError>
    where
        B: Value,
        U: Value,
        F: Fn(&A, &B) -> U + Send + Sync + 'static,
    {
        self.combine_latest_with(other, f, ComposeOptions::default())
    }

    pub fn combine_latest_with<B, U, F>(
        &self,
        other: &Notifier<B>,
        f: F,
        opts: ComposeOptions,
    ) -> Result<Notifier<U>, NotifierError>
    where
        B: Value,
        U: Value,
        F: Fn(&A, &B) -> U + Send + Sync + 'static,
    {
        let ignore_loading = opts.ignore_loading;
        let (a, b) = (self.clone(), other.clone());
        let evaluate: Evaluate<U> = Arc::new(move || {
            let (left, right) = (a.value(), b.value());
            let states = [SourceState::of(&left), SourceState::of(&right)];
            resolve(&states, ignore_loading, || match (left.data(), right.data()) {
                (Some(l), Some(r)) => Some(f(l, r)),
                _ => None,
            })
        });

        let (a, b) = (self.clone(), other.clone());
        derive(evaluate, opts, move |deps, on_change| {
            deps.watch(&a, Arc::clone(&on_change))?;
            deps.watch(&b, on_change)
        })
    }
}

/// Derives a notifier from any number of same-typed sources.
///
/// `f` receives the data of every source, in source order.
pub fn combine_all<S, U, F>(sources: &[Notifier<S>], f: F, opts: ComposeOptions) -> Result<Notifier<U>, NotifierError>
where
    S: Value,
    U: Value,
    F: Fn(&[S]) -> U + Send + Sync + 'static,
{
    let ignore_loading = opts.ignore_loading;
    let snapshot_of: Arc<[Notifier<S>]> = sources.into();
    let evaluate: Evaluate<U> = Arc::new(move || {
        let snapshot: Vec<AsyncResult<S>> = snapshot_of.iter().map(Notifier::value).collect();
        let states: Vec<SourceState> = snapshot.iter().map(SourceState::of).collect();
        resolve(&states, ignore_loading, || {
            let data: Option<Vec<S>> = snapshot.iter().map(|r| r.data().cloned()).collect();
            data.map(|data| f(&data))
        })
    });

    let sources = sources.to_vec();
    derive(evaluate, opts, move |deps, on_change| {
        for source in &sources {
            deps.watch(source, Arc::clone(&on_change))?;
        }
        Ok(())
    })
}
