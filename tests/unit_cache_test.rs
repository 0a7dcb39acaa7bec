// tests/unit_cache_test.rs

use auroralink::core::cache::{SlidingExpirationCache, SlidingExpirationCacheWithCleanupTask};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::test]
async fn compute_if_absent_returns_existing_value() {
    let cache: SlidingExpirationCache<String, u32> =
        SlidingExpirationCache::new(Duration::from_secs(60));
    let first = cache.compute_if_absent("k".to_string(), || 1, Duration::from_secs(60));
    let second = cache.compute_if_absent("k".to_string(), || 2, Duration::from_secs(60));
    assert_eq!(first, 1);
    assert_eq!(second, 1);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn factory_runs_once_across_concurrent_callers() {
    let cache: Arc<SlidingExpirationCache<String, u32>> =
        Arc::new(SlidingExpirationCache::new(Duration::from_secs(60)));
    let calls = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..64 {
        let cache = Arc::clone(&cache);
        let calls = Arc::clone(&calls);
        tasks.push(tokio::spawn(async move {
            cache.compute_if_absent(
                "shared".to_string(),
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    7
                },
                Duration::from_secs(60),
            )
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), 7);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn expired_entries_miss_and_get_refreshes_the_deadline() {
    let cache: SlidingExpirationCache<String, u32> =
        SlidingExpirationCache::new(Duration::from_secs(60));
    cache.put("short".to_string(), 1, Duration::from_millis(30));
    cache.put("long".to_string(), 2, Duration::from_millis(120));

    // Keep "long" alive by touching it; "short" is left to expire.
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(
            cache.get(&"long".to_string(), Some(Duration::from_millis(120))),
            Some(2)
        );
    }
    assert_eq!(cache.get(&"short".to_string(), None), None);
}

#[tokio::test]
async fn should_dispose_gates_removal() {
    let disposed = Arc::new(AtomicUsize::new(0));
    let disposed_clone = Arc::clone(&disposed);
    let cache: SlidingExpirationCache<String, u32> = SlidingExpirationCache::with_callbacks(
        Duration::from_secs(3600),
        // Only even values may be disposed.
        Some(Arc::new(|value: &u32| value % 2 == 0)),
        Some(Arc::new(move |_value: u32| {
            disposed_clone.fetch_add(1, Ordering::SeqCst);
        })),
    );
    cache.put("odd".to_string(), 1, Duration::from_millis(10));
    cache.put("even".to_string(), 2, Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(30)).await;

    cache.remove_expired();
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
    assert_eq!(cache.len(), 1, "the gated entry is retained");
}

#[tokio::test]
async fn clear_disposes_everything_in_insertion_order() {
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let order_clone = Arc::clone(&order);
    let cache: SlidingExpirationCache<String, u32> = SlidingExpirationCache::with_callbacks(
        Duration::from_secs(3600),
        None,
        Some(Arc::new(move |value: u32| {
            order_clone.lock().push(value);
        })),
    );
    for value in [10, 20, 30] {
        cache.put(format!("k{value}"), value, Duration::from_secs(60));
    }
    cache.clear();
    assert_eq!(*order.lock(), vec![10, 20, 30]);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn background_cleanup_task_reaps_expired_entries() {
    let disposed = Arc::new(AtomicUsize::new(0));
    let disposed_clone = Arc::clone(&disposed);
    let cache: SlidingExpirationCacheWithCleanupTask<String, u32> =
        SlidingExpirationCacheWithCleanupTask::new(
            Duration::from_millis(20),
            None,
            Some(Arc::new(move |_value: u32| {
                disposed_clone.fetch_add(1, Ordering::SeqCst);
            })),
        );
    cache.put("a".to_string(), 1, Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(cache.len(), 0);
    assert_eq!(disposed.load(Ordering::SeqCst), 1);

    // Shutdown is deterministic: the task is awaited, the rest disposed.
    cache.put("b".to_string(), 2, Duration::from_secs(60));
    cache.clear().await;
    assert_eq!(disposed.load(Ordering::SeqCst), 2);
    assert!(cache.is_empty());
}
