/// Lifecycle of the temporary object factory: grace-window eviction,
/// resurrection, and the build-after-destroy chain.
use futures::FutureExt;
use polite_crawler::TemporaryFactory;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

fn init_test_logging() {
    let _ = polite_crawler::init_logging_with("warn");
}

fn slow_destroy_factory(
    destroy_ms: u64,
    destroys: Arc<AtomicUsize>,
) -> TemporaryFactory<String, u32> {
    TemporaryFactory::new(Arc::new(move |_key: String, _value: Arc<u32>| {
        let destroys = Arc::clone(&destroys);
        async move {
            tokio::time::sleep(Duration::from_millis(destroy_ms)).await;
            destroys.fetch_add(1, Ordering::SeqCst);
        }
        .boxed()
    }))
}

#[tokio::test(start_paused = true)]
async fn get_during_destroy_waits_and_builds_anew() {
    init_test_logging();

    let destroys = Arc::new(AtomicUsize::new(0));
    let factory = slow_destroy_factory(1000, Arc::clone(&destroys));
    let started = Instant::now();

    // Build instantly with a 100ms grace window, then request destruction.
    let first = factory
        .get(Duration::from_millis(100), "k".to_string(), || async {
            Ok(Arc::new(1u32))
        })
        .await
        .unwrap();
    factory.destroy(&"k".to_string()).await.unwrap();

    // 800ms in, the grace window has elapsed and the destroy is running.
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(factory.has(&"k".to_string()).await);

    let second = factory
        .get(Duration::from_millis(1000), "k".to_string(), || async {
            Ok(Arc::new(2u32))
        })
        .await
        .unwrap();

    let elapsed = started.elapsed().as_millis() as u64;
    assert!(
        (1050..=1250).contains(&elapsed),
        "second get resolved at {elapsed}ms, expected ~1100ms"
    );
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(*second, 2);
    assert_eq!(destroys.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn eviction_fires_only_after_the_grace_window() {
    let destroys = Arc::new(AtomicUsize::new(0));
    let factory = slow_destroy_factory(0, Arc::clone(&destroys));

    factory
        .get(Duration::from_millis(300), "k".to_string(), || async {
            Ok(Arc::new(1u32))
        })
        .await
        .unwrap();
    let signal = factory.destroy(&"k".to_string()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(factory.has(&"k".to_string()).await);
    assert_eq!(destroys.load(Ordering::SeqCst), 0);

    signal.await;
    assert!(!factory.has(&"k".to_string()).await);
    assert_eq!(destroys.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn repeated_destroy_returns_the_same_signal() {
    let destroys = Arc::new(AtomicUsize::new(0));
    let factory = slow_destroy_factory(0, Arc::clone(&destroys));

    factory
        .get(Duration::from_millis(100), "k".to_string(), || async {
            Ok(Arc::new(1u32))
        })
        .await
        .unwrap();

    let first = factory.destroy(&"k".to_string()).await.unwrap();
    let second = factory.destroy(&"k".to_string()).await.unwrap();
    tokio::join!(first, second);

    assert_eq!(destroys.load(Ordering::SeqCst), 1);
    assert!(!factory.has(&"k".to_string()).await);
}

#[tokio::test(start_paused = true)]
async fn resurrection_cancels_a_pending_eviction() {
    let destroys = Arc::new(AtomicUsize::new(0));
    let factory = slow_destroy_factory(0, Arc::clone(&destroys));

    let first = factory
        .get(Duration::from_millis(500), "k".to_string(), || async {
            Ok(Arc::new(1u32))
        })
        .await
        .unwrap();
    factory.destroy(&"k".to_string()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let second = factory
        .get(Duration::from_millis(500), "k".to_string(), || async {
            Ok(Arc::new(2u32))
        })
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    // Long after the original grace target, the entry is still alive.
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(factory.has(&"k".to_string()).await);
    assert_eq!(destroys.load(Ordering::SeqCst), 0);
}
