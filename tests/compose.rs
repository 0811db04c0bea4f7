use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fetchcell::{combine_all, AsyncResult, ComposeOptions, Notifier, NotifierConfig, NotifierError};
use futures::{Stream, StreamExt};
use tokio::sync::Notify;

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Sets its flag when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Stream that never yields and flags `dropped` once it is dropped.
fn held_open(dropped: &Arc<AtomicBool>) -> impl Stream<Item = Result<u32, NotifierError>> + Send + 'static {
    let flag = DropFlag(Arc::clone(dropped));
    futures::stream::pending::<Result<u32, NotifierError>>().map(move |item| {
        let _ = &flag;
        item
    })
}

fn fetched(value: &'static str) -> Notifier<String> {
    Notifier::builder(NotifierConfig::default())
        .on_fetch(move |_ctx| async move { Ok::<_, NotifierError>(value.to_string()) })
        .build()
}

#[tokio::test]
async fn combine_latest_concatenates() -> anyhow::Result<()> {
    let x = Notifier::new(Some("X".to_string()));
    let y = Notifier::new(Some("Y".to_string()));
    let xy = x.combine_latest(&y, |a, b| format!("{a}{b}"))?;

    assert_eq!(xy.refresh_and_await(true, false).await?, "XY");
    assert!(xy.value().is_data());

    y.set_data("Z".to_string())?;
    assert_eq!(xy.data()?, "XZ");
    Ok(())
}

#[tokio::test]
async fn combine_starts_source_fetches() -> anyhow::Result<()> {
    let x = fetched("X");
    let y = fetched("Y");
    let xy = x.combine_latest(&y, |a, b| format!("{a}{b}"))?;
    assert!(xy.value().is_loading());

    assert_eq!(xy.future().await?, "XY");
    assert!(x.value().is_data());
    assert!(y.value().is_data());
    Ok(())
}

#[test]
fn combine_all_prefers_first_error() -> anyhow::Result<()> {
    let sources = vec![
        Notifier::<u32>::from_result(AsyncResult::failed(NotifierError::failed("e1"))),
        Notifier::from_result(AsyncResult::initial().to_loading()),
        Notifier::new(Some(2)),
    ];
    let total = combine_all(&sources, |xs| xs.iter().sum::<u32>(), ComposeOptions::default())?;

    let value = total.value();
    assert!(value.is_error());
    assert_eq!(value.error().map(ToString::to_string).as_deref(), Some("e1"));
    assert!(!value.has_data());

    sources[0].set_data(1)?;
    assert!(total.value().is_loading());

    sources[1].set_data(3)?;
    assert_eq!(total.data()?, 6);
    Ok(())
}

#[test]
fn combine_ignoring_loading_keeps_last_value() -> anyhow::Result<()> {
    let a = Notifier::new(Some(1u32));
    let b = Notifier::new(Some(2u32));
    let opts = ComposeOptions::default().with_ignore_loading(true);
    let sum = a.combine_latest_with(&b, |x, y| x + y, opts)?;

    a.to_loading()?;
    assert!(sum.value().is_data());
    assert_eq!(sum.data()?, 3);

    b.set_data(5)?;
    assert_eq!(sum.data()?, 6);
    Ok(())
}

#[test]
fn dropping_a_derived_notifier_releases_sources() -> anyhow::Result<()> {
    let source = Notifier::new(Some(1u8));
    let derived = source.effect(|x| u16::from(*x))?;
    assert_eq!(source.listener_count(), 1);

    drop(derived);
    assert_eq!(source.listener_count(), 0);

    let derived = source.effect(|x| u16::from(*x))?;
    derived.dispose();
    assert_eq!(source.listener_count(), 0);
    Ok(())
}

#[tokio::test]
async fn async_effect_discards_stale_work() -> anyhow::Result<()> {
    let source = Notifier::new(Some(1u32));
    let slow = Arc::new(Notify::new());
    let gate = Arc::clone(&slow);
    let tenfold = source.async_effect(move |x: u32| {
        let gate = Arc::clone(&gate);
        async move {
            if x == 1 {
                gate.notified().await;
            }
            Ok::<_, NotifierError>(x * 10)
        }
    })?;

    let stale = tenfold.refresh(false, false)?.expect("effect refresh");
    source.set_data(2)?;
    assert_eq!(tenfold.future().await?, 20);

    slow.notify_one();
    assert_eq!(stale.await.unwrap_err(), NotifierError::Cancelled);
    assert_eq!(tenfold.data()?, 20);
    Ok(())
}

#[tokio::test]
async fn async_effect_propagates_source_errors() -> anyhow::Result<()> {
    let source = Notifier::new(Some(2u32));
    let doubled = source.async_effect(|x: u32| async move { Ok::<_, NotifierError>(x * 2) })?;
    assert_eq!(doubled.refresh_and_await(false, false).await?, 4);

    source.to_error(NotifierError::failed("source down"))?;
    let value = doubled.value();
    assert!(value.is_error());
    assert_eq!(value.data(), Some(&4));
    Ok(())
}

#[tokio::test]
async fn stream_effect_rebinds_on_source_change() -> anyhow::Result<()> {
    let source = Notifier::new(Some(1u32));
    let counted = source.stream_effect(|x: u32| {
        futures::stream::iter(vec![Ok::<_, NotifierError>(x), Ok(x + 1)])
    })?;

    settle().await;
    assert_eq!(counted.data()?, 2);

    source.set_data(10)?;
    settle().await;
    assert_eq!(counted.data()?, 11);

    source.to_loading()?;
    let value = counted.value();
    assert!(value.is_loading_data());
    assert_eq!(value.data(), Some(&11));
    Ok(())
}

#[tokio::test]
async fn dropping_a_stream_effect_releases_its_stream() -> anyhow::Result<()> {
    let dropped = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&dropped);
    let source = Notifier::new(Some(1u32));
    let follower = source.stream_effect(move |_x: u32| held_open(&flag))?;

    settle().await;
    assert!(follower.value().is_loading());
    assert!(!dropped.load(Ordering::SeqCst));

    drop(follower);
    settle().await;
    assert!(dropped.load(Ordering::SeqCst));
    assert_eq!(source.listener_count(), 0);
    Ok(())
}
