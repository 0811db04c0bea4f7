//! # Effects: one notifier derived from one source.
//!
//! | flavour          | on source data                         | superseded work      |
//! |------------------|----------------------------------------|----------------------|
//! | `effect`         | `Data(f(&data))`, synchronously        | n/a                  |
//! | `async_effect`   | `f(data)` as a forced refresh          | discarded by generation |
//! | `stream_effect`  | `f(data)` bound as the stream          | previous stream aborted |
//!
//! Source `Loading` and `Error` are written straight through (keeping the
//! effect's previous data) and supersede in-flight effect work. With
//! `ignore_loading`, a loading source leaves the effect untouched.

use std::future::Future;
use std::sync::Arc;

use futures::{FutureExt, Stream};
use tracing::warn;

use crate::error::{BoxError, NotifierError};
use crate::notifier::{FetchContext, Notifier, Outcome};
use crate::result::{AsyncResult, Value};

use super::combine::{derive, resolve, Evaluate};
use super::dependency::{aggregate, Aggregate, Dependencies, SourceState};
use super::ComposeOptions;

/// What one source transition asks of an async or stream effect.
enum Step<S> {
    Run(S),
    Write(Outcome<()>),
    Skip,
}

fn step<S: Clone>(source: &AsyncResult<S>, ignore_loading: bool) -> Step<S> {
    let state = SourceState::of(source);
    if ignore_loading && state.loading {
        return Step::Skip;
    }
    match aggregate(&[state], ignore_loading) {
        Aggregate::Ready => match source.data() {
            Some(data) => Step::Run(data.clone()),
            None => Step::Skip,
        },
        Aggregate::Failed { error, .. } => Step::Write(Outcome::Failed(error, None)),
        Aggregate::Loading => Step::Write(Outcome::Loading),
        Aggregate::Pending => Step::Skip,
    }
}

/// Re-types a data-less outcome for the effect's value type.
fn retype<U>(outcome: Outcome<()>) -> Outcome<U> {
    match outcome {
        Outcome::Failed(error, _) => Outcome::Failed(error, None),
        _ => Outcome::Loading,
    }
}

impl<S: Value> Notifier<S> {
    /// Derives a notifier holding `f(&data)` of this one.
    pub fn effect<U, F>(&self, f: F) -> Result<Notifier<U>, NotifierError>
    where
        U: Value,
        F: Fn(&S) -> U + Send + Sync + 'static,
    {
        self.effect_with(f, ComposeOptions::default())
    }

    pub fn effect_with<U, F>(&self, f: F, opts: ComposeOptions) -> Result<Notifier<U>, NotifierError>
    where
        U: Value,
        F: Fn(&S) -> U + Send + Sync + 'static,
    {
        let ignore_loading = opts.ignore_loading;
        let source = self.clone();
        let evaluate: Evaluate<U> = Arc::new(move || {
            let current = source.value();
            let state = SourceState::of(&current);
            if ignore_loading && state.loading {
                return None;
            }
            match resolve(&[state], ignore_loading, || current.data().map(&f))? {
                Outcome::Failed(error, _) => Some(Outcome::Failed(error, None)),
                outcome => Some(outcome),
            }
        });

        let source = self.clone();
        derive(evaluate, opts, move |deps, on_change| deps.watch(&source, on_change))
    }

    /// Derives a notifier whose data is produced by the async `f(data)`.
    ///
    /// Every source data transition starts a forced refresh of the effect, so a
    /// slow run for older data can never overwrite a newer one.
    pub fn async_effect<U, F, Fut, E>(&self, f: F) -> Result<Notifier<U>, NotifierError>
    where
        U: Value,
        F: Fn(S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<U, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.async_effect_with(f, ComposeOptions::default())
    }

    pub fn async_effect_with<U, F, Fut, E>(&self, f: F, opts: ComposeOptions) -> Result<Notifier<U>, NotifierError>
    where
        U: Value,
        F: Fn(S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<U, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let ignore_loading = opts.ignore_loading;
        let source = self.clone();
        let target = Notifier::builder(opts.config)
            .fetch_hook(Arc::new(move |_ctx: FetchContext<U>| match step(&source.value(), ignore_loading) {
                Step::Run(data) => {
                    let fut = f(data);
                    async move { Outcome::from(fut.await.map_err(NotifierError::failed)) }.boxed()
                }
                Step::Write(outcome) => futures::future::ready(retype(outcome)).boxed(),
                Step::Skip => futures::future::ready(Outcome::Loading).boxed(),
            }))
            .build();

        let weak = target.downgrade();
        let source = self.clone();
        let on_change: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
            let Some(target) = weak.upgrade() else {
                return;
            };
            match step(&source.value(), ignore_loading) {
                Step::Run(_) => {
                    if let Err(err) = target.refresh(true, false) {
                        warn!(error = %err, "async effect could not start");
                    }
                }
                Step::Write(outcome) => target.supersede(retype(outcome)),
                Step::Skip => {}
            }
        });

        let mut deps = Dependencies::new();
        deps.watch(self, on_change)?;
        deps.attach_to(&target)?;
        Ok(target)
    }

    /// Derives a notifier following the stream `f(data)`.
    ///
    /// Each source data transition replaces the stream; the previous one is
    /// dropped before the new one is polled.
    pub fn stream_effect<U, F, St, E>(&self, f: F) -> Result<Notifier<U>, NotifierError>
    where
        U: Value,
        F: Fn(S) -> St + Send + Sync + 'static,
        St: Stream<Item = Result<U, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.stream_effect_with(f, ComposeOptions::default())
    }

    pub fn stream_effect_with<U, F, St, E>(&self, f: F, opts: ComposeOptions) -> Result<Notifier<U>, NotifierError>
    where
        U: Value,
        F: Fn(S) -> St + Send + Sync + 'static,
        St: Stream<Item = Result<U, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let ignore_loading = opts.ignore_loading;
        let target = Notifier::builder(opts.config).build();
        let apply = {
            let weak = target.downgrade();
            let source = self.clone();
            move || -> Result<(), NotifierError> {
                let Some(target) = weak.upgrade() else {
                    return Ok(());
                };
                match step(&source.value(), ignore_loading) {
                    Step::Run(data) => target.bind_stream(f(data)),
                    Step::Write(outcome) => {
                        target.supersede(retype(outcome));
                        Ok(())
                    }
                    Step::Skip => Ok(()),
                }
            }
        };
        apply()?;

        let on_change: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
            if let Err(err) = apply() {
                warn!(error = %err, "stream effect could not bind");
            }
        });

        let mut deps = Dependencies::new();
        deps.watch(self, on_change)?;
        deps.attach_to(&target)?;
        Ok(target)
    }
}
