use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fetchcell::{AsyncResult, Notifier, NotifierConfig, NotifierError};
use futures::{Stream, StreamExt};
use tokio::sync::Notify;

/// Notifier whose fetch counts calls and blocks until `gate` is notified.
fn gated(initial: Option<u32>, value: u32) -> (Notifier<u32>, Arc<AtomicUsize>, Arc<Notify>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Notify::new());
    let (c, g) = (Arc::clone(&calls), Arc::clone(&gate));
    let mut builder = Notifier::builder(NotifierConfig::default()).on_fetch(move |_ctx| {
        let (c, g) = (Arc::clone(&c), Arc::clone(&g));
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            g.notified().await;
            Ok::<_, NotifierError>(value)
        }
    });
    if let Some(data) = initial {
        builder = builder.initial_data(data);
    }
    (builder.build(), calls, gate)
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

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn refresh_while_loading_runs_fetch_once() -> anyhow::Result<()> {
    let (n, calls, gate) = gated(None, 7);

    let first = n.refresh(false, false)?.expect("refresh should start");
    assert!(n.value().is_loading_data());
    assert!(n.refresh(false, false)?.is_none());
    assert!(n.refresh(false, false)?.is_none());

    gate.notify_one();
    let settled = first.await?;
    assert_eq!(settled.data(), Some(&7));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(n.is_fresh());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_refreshes_start_one_fetch() -> anyhow::Result<()> {
    let (n, calls, gate) = gated(None, 3);
    let runtime = tokio::runtime::Handle::current();
    let barrier = Arc::new(std::sync::Barrier::new(8));

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let (n, runtime, barrier) = (n.clone(), runtime.clone(), Arc::clone(&barrier));
            std::thread::spawn(move || {
                let _entered = runtime.enter();
                barrier.wait();
                n.refresh(false, false)
            })
        })
        .collect();

    let mut started = Vec::new();
    for thread in threads {
        if let Some(task) = thread.join().expect("refresh thread")? {
            started.push(task);
        }
    }
    assert_eq!(started.len(), 1);

    gate.notify_one();
    for task in started {
        assert_eq!(task.await?.data(), Some(&3));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn cancel_discards_late_result() -> anyhow::Result<()> {
    let (n, _calls, gate) = gated(Some(1), 2);

    let task = n.refresh(true, false)?.expect("forced refresh");
    assert!(n.cancel(false)?);
    gate.notify_one();

    assert_eq!(task.await.unwrap_err(), NotifierError::Cancelled);
    let value = n.value();
    assert!(value.is_cancelled());
    assert_eq!(value.data(), Some(&1));

    // a cancelled notifier refreshes again without force
    let again = n.refresh(false, false)?.expect("refresh after cancel");
    gate.notify_one();
    assert_eq!(again.await?.data(), Some(&2));
    Ok(())
}

#[tokio::test]
async fn cancel_is_a_no_op_unless_loading() -> anyhow::Result<()> {
    let resets = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&resets);
    let n = Notifier::builder(NotifierConfig::default())
        .initial_data(3u8)
        .on_reset(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    assert!(!n.cancel(false)?);
    assert!(n.value().is_data());

    assert!(n.cancel(true)?);
    assert!(n.value().is_cancelled());
    assert_eq!(n.data()?, 3);
    assert_eq!(resets.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn superseded_fetch_sees_inactive_context() -> anyhow::Result<()> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let n = Notifier::builder(NotifierConfig::default())
        .on_fetch(move |ctx| {
            let sink = Arc::clone(&sink);
            async move {
                if ctx.generation() == 1 {
                    ctx.cancelled().await;
                    sink.lock().unwrap().push(ctx.is_active());
                    return Err(NotifierError::Cancelled);
                }
                Ok(5u32)
            }
        })
        .build();

    let first = n.refresh(false, false)?.expect("first refresh");
    let second = n.refresh(true, false)?.expect("second refresh");

    assert_eq!(second.await?.data(), Some(&5));
    assert_eq!(first.await.unwrap_err(), NotifierError::Cancelled);
    assert_eq!(*seen.lock().unwrap(), vec![false]);
    assert_eq!(n.data()?, 5);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn data_expires_and_refreshes() -> anyhow::Result<()> {
    let cfg = NotifierConfig::default().with_expiration(Duration::from_millis(100));
    let n = Notifier::builder(cfg)
        .on_fetch(|_ctx| async { Ok::<_, NotifierError>(1u8) })
        .build();

    n.refresh_and_await(false, false).await?;
    assert!(n.is_fresh());
    assert!(n.refresh(false, false)?.is_none());

    n.invalidate()?;
    assert!(n.is_stale());
    n.refresh_and_await(false, false).await?;
    assert!(n.is_fresh());

    tokio::time::advance(Duration::from_millis(100)).await;
    assert!(n.is_stale());
    let task = n.refresh(false, false)?.expect("stale data refreshes");
    task.await?;
    assert!(n.is_fresh());
    Ok(())
}

#[tokio::test]
async fn skipped_refresh_touches_when_asked() -> anyhow::Result<()> {
    let n = Notifier::new(Some(1u8));
    n.invalidate()?;
    assert!(n.is_stale());

    assert!(n.refresh(false, false)?.is_none());
    assert!(n.is_stale());
    assert!(n.refresh(true, true)?.is_none());
    assert!(n.is_fresh());
    Ok(())
}

#[tokio::test]
async fn errors_keep_data_and_retry_only_when_configured() -> anyhow::Result<()> {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let n = Notifier::builder(NotifierConfig::default())
        .initial_data(9u32)
        .on_fetch(move |_ctx| {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err::<u32, _>(std::io::Error::new(std::io::ErrorKind::Other, "down")) }
        })
        .build();

    n.invalidate()?;
    let result = n.refresh(false, false)?.expect("stale").await?;
    assert!(result.is_error());
    assert_eq!(result.data(), Some(&9));
    assert_eq!(result.error().map(ToString::to_string).as_deref(), Some("down"));

    assert!(n.refresh(false, false)?.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let retrying = Notifier::builder(NotifierConfig::default().with_refresh_on_error(true))
        .initial_result(AsyncResult::failed(NotifierError::failed("old")))
        .on_fetch(|_ctx| async { Ok::<_, NotifierError>(1u32) })
        .build();
    assert_eq!(retrying.refresh_and_await(false, false).await?, 1);
    Ok(())
}

#[tokio::test]
async fn dispose_mid_fetch_drops_outcome() -> anyhow::Result<()> {
    let (n, _calls, gate) = gated(None, 1);
    let task = n.refresh(false, false)?.expect("refresh");

    n.dispose();
    gate.notify_one();

    assert_eq!(task.await.unwrap_err(), NotifierError::Disposed);
    assert!(!n.is_active());
    assert_eq!(n.set_data(3).unwrap_err(), NotifierError::Disposed);
    assert_eq!(n.add_listener(|_| {}).unwrap_err(), NotifierError::Disposed);
    assert_eq!(n.refresh(true, false).unwrap_err(), NotifierError::Disposed);
    Ok(())
}

#[tokio::test]
async fn first_listener_triggers_refresh() -> anyhow::Result<()> {
    let n = Notifier::builder(NotifierConfig::default())
        .on_fetch(|_ctx| async { Ok::<_, NotifierError>("loaded".to_string()) })
        .build();
    assert!(n.value().is_initial());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = n.listen(move |r| sink.lock().unwrap().push(r.clone()))?;

    assert_eq!(n.future().await?, "loaded");
    let seen = seen.lock().unwrap();
    assert!(seen[0].is_loading_data());
    assert_eq!(seen.last().and_then(AsyncResult::data).map(String::as_str), Some("loaded"));
    Ok(())
}

#[tokio::test]
async fn listeners_attached_together_share_one_deferred_refresh() -> anyhow::Result<()> {
    let (n, calls, gate) = gated(None, 5);
    let _a = n.listen(|_| {})?;
    let _b = n.listen(|_| {})?;
    let _c = n.listen(|_| {})?;

    assert!(n.value().is_initial());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    settle().await;
    assert!(n.value().is_loading_data());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    gate.notify_one();
    assert_eq!(n.future().await?, 5);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn future_reports_fetch_error() {
    let n = Notifier::builder(NotifierConfig::default())
        .on_fetch(|_ctx| async { Err::<u8, _>("backend unavailable") })
        .build();

    let err = n.future().await.unwrap_err();
    assert_eq!(err.as_label(), "failed");
    assert_eq!(err.to_string(), "backend unavailable");
}

#[tokio::test]
async fn error_fallback_hides_errors() -> anyhow::Result<()> {
    let n = Notifier::builder(NotifierConfig::default())
        .on_fetch(|_ctx| async { Err::<u32, _>("no route") })
        .error_fallback(|_err| 0)
        .build();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = n.listen(move |r| sink.lock().unwrap().push(r.clone()))?;

    assert_eq!(n.refresh_and_await(true, false).await?, 0);
    n.to_error(NotifierError::failed("manual"))?;
    assert!(n.value().is_data());
    settle().await;
    assert!(seen.lock().unwrap().iter().all(|r| !r.is_error()));
    Ok(())
}

#[test]
fn last_listener_resets_when_configured() -> anyhow::Result<()> {
    let resets = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&resets);
    let n = Notifier::builder(NotifierConfig::default().with_auto_reset(true))
        .initial_data(5u8)
        .on_reset(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    let first = n.listen(|_| {})?;
    let second = n.listen(|_| {})?;
    drop(first);
    assert_eq!(n.data()?, 5);

    drop(second);
    assert!(n.value().is_initial());
    assert_eq!(n.data_or_none(), None);
    assert_eq!(resets.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn writes_from_listeners_are_queued_in_order() -> anyhow::Result<()> {
    let n = Notifier::new(Some(0u32));
    let log = Arc::new(Mutex::new(Vec::new()));

    let (sink, writer) = (Arc::clone(&log), n.clone());
    n.add_listener(move |r| {
        let v = *r.data().unwrap();
        sink.lock().unwrap().push(("a", v));
        if v == 1 {
            writer.set_data(2).unwrap();
        }
    })?;
    let sink = Arc::clone(&log);
    n.add_listener(move |r| sink.lock().unwrap().push(("b", *r.data().unwrap())))?;

    n.set_data(1)?;
    assert_eq!(*log.lock().unwrap(), vec![("a", 1), ("b", 1), ("a", 2), ("b", 2)]);
    Ok(())
}

#[test]
fn panicking_listener_does_not_block_others() -> anyhow::Result<()> {
    let n = Notifier::new(Some(0u8));
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    n.add_listener(|_| panic!("listener bug"))?;
    n.add_listener(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })?;

    n.set_data(1)?;
    n.set_data(2)?;
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn equal_writes_do_not_notify() -> anyhow::Result<()> {
    let n = Notifier::new(Some(1u8));
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let id = n.add_listener(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })?;

    n.to_loading()?;
    n.to_loading()?;
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    assert!(n.remove_listener(id));
    assert!(!n.remove_listener(id));
    assert!(!n.has_listeners());
    Ok(())
}

#[test]
fn async_operations_need_a_runtime() {
    let n = Notifier::builder(NotifierConfig::default())
        .on_fetch(|_ctx| async { Ok::<_, NotifierError>(1u8) })
        .build();
    assert_eq!(n.refresh(true, false).unwrap_err(), NotifierError::NoRuntime);
    assert_eq!(
        n.bind_stream(futures::stream::empty::<Result<u8, NotifierError>>()).unwrap_err(),
        NotifierError::NoRuntime
    );
    assert!(n.value().is_initial());
}

#[tokio::test]
async fn async_setters_follow_fetch_protocol() -> anyhow::Result<()> {
    let n = Notifier::<u32>::new(None);

    let task = n.set_data_async(async { Ok::<_, NotifierError>(4) })?;
    assert_eq!(task.await?, 4);

    let failing = n.set_result_async(async { AsyncResult::failed(NotifierError::failed("x")) })?;
    let written = failing.await?;
    assert!(written.is_error());
    assert_eq!(n.value(), written);

    // a write during the computation is overwritten (and logged)
    let gate = Arc::new(Notify::new());
    let g = Arc::clone(&gate);
    let task = n.set_data_async(async move {
        g.notified().await;
        Ok::<_, NotifierError>(8)
    })?;
    n.set_data(1)?;
    gate.notify_one();
    assert_eq!(task.await?, 8);
    assert_eq!(n.data()?, 8);
    Ok(())
}

#[tokio::test]
async fn binding_a_stream_replaces_the_previous_one() -> anyhow::Result<()> {
    let n = Notifier::<u32>::new(None);
    let (tx1, rx1) = futures::channel::mpsc::unbounded::<Result<u32, NotifierError>>();
    let (tx2, rx2) = futures::channel::mpsc::unbounded::<Result<u32, NotifierError>>();

    n.bind_stream(rx1)?;
    assert!(n.value().is_loading_data());
    tx1.unbounded_send(Ok(1)).expect("send");
    assert_eq!(n.future().await?, 1);

    n.bind_stream(rx2)?;
    let _ = tx1.unbounded_send(Ok(99));
    tx2.unbounded_send(Ok(2)).expect("send");
    assert_eq!(n.future().await?, 2);

    settle().await;
    assert_eq!(n.data()?, 2);

    tx2.unbounded_send(Err(NotifierError::failed("stream broke"))).expect("send");
    settle().await;
    let value = n.value();
    assert!(value.is_error());
    assert_eq!(value.data(), Some(&2));

    assert!(n.unbind_stream());
    assert!(!n.unbind_stream());
    Ok(())
}

#[tokio::test]
async fn dropping_the_last_handle_releases_the_stream() -> anyhow::Result<()> {
    let dropped = Arc::new(AtomicBool::new(false));
    let n = Notifier::<u32>::new(None);
    n.bind_stream(held_open(&dropped))?;
    settle().await;
    assert!(!dropped.load(Ordering::SeqCst));

    let other = n.clone();
    drop(n);
    settle().await;
    assert!(!dropped.load(Ordering::SeqCst));

    drop(other);
    settle().await;
    assert!(dropped.load(Ordering::SeqCst));
    Ok(())
}
