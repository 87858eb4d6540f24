//! End-to-end delivery scenarios: priority ordering, overflow, retry timing,
//! pause/clear, cache invalidation on delivered writes.

mod common;

use std::future::Future;
use std::time::{Duration, Instant};

use serde_json::json;

use common::MockBackend;
use gridsink::{GridsinkConfig, GridsinkCore, Operation, OperationKind, Priority};

/// Millisecond-scale settings so scenarios finish quickly; the shape of the
/// policy (backoff doubling, delay bounds) is unchanged.
fn fast_config() -> GridsinkConfig {
    let mut config = GridsinkConfig::default();
    config.queue.max_queue_size = 100;
    config.queue.max_retries = 3;
    config.queue.base_retry_delay_ms = 60;
    config.queue.base_delay_ms = 5;
    config.queue.max_delay_ms = 40;
    config.queue.unhealthy_pause_ms = 20;
    config.health.check_interval_ms = 3_600_000; // keep the periodic check out of the way
    config.health.recovery_base_wait_ms = 5;
    config.rate_limiter.base_interval_ms = 1;
    config.rate_limiter.max_interval_ms = 50;
    config.cache.sweep_interval_ms = 3_600_000;
    config
}

async fn wait_until<F, Fut>(deadline: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition().await
}

#[tokio::test]
async fn test_priorities_deliver_high_normal_low() -> Result<(), Box<dyn std::error::Error>> {
    gridsink::logging::init_structured_logging();
    let backend = MockBackend::succeeding();
    let core = GridsinkCore::new(fast_config(), backend.clone())?;

    // Pause so all three are buffered before the loop pops anything.
    core.pause();
    core.enqueue(
        Operation::new(OperationKind::AppendRow, json!("low")).with_priority(Priority::Low),
    )
    .await;
    core.enqueue(
        Operation::new(OperationKind::AppendRow, json!("high")).with_priority(Priority::High),
    )
    .await;
    core.enqueue(Operation::new(OperationKind::AppendRow, json!("normal")))
        .await;
    core.resume();

    assert!(wait_until(Duration::from_secs(2), || async { backend.call_count().await == 3 }).await);
    assert_eq!(
        backend.payloads_in_order().await,
        vec![json!("high"), json!("normal"), json!("low")]
    );

    let stats = core.queue_status().await.stats;
    assert_eq!(stats.delivered, 3);
    assert_eq!(stats.dropped, 0);

    core.shutdown(Duration::from_secs(2)).await?;
    Ok(())
}

#[tokio::test]
async fn test_always_failing_item_gets_four_attempts_then_drops(
) -> Result<(), Box<dyn std::error::Error>> {
    gridsink::logging::init_structured_logging();
    let backend = MockBackend::failing("internal upstream error");
    let core = GridsinkCore::new(fast_config(), backend.clone())?;

    core.enqueue(Operation::new(OperationKind::UpdateCell, json!({"cell": "B2"})))
        .await;

    // max_retries = 3: one initial attempt plus three retries.
    assert!(
        wait_until(Duration::from_secs(3), || async {
            core.queue_status().await.stats.dropped == 1
        })
        .await
    );
    assert_eq!(backend.call_count().await, 4);

    let status = core.queue_status().await;
    assert_eq!(status.len, 0);
    assert_eq!(status.stats.retried, 3);
    assert_eq!(status.stats.delivered, 0);

    // Retry gaps double: ~60ms, ~120ms, ~240ms.
    let calls = backend.calls().await;
    let gaps: Vec<u64> = calls
        .windows(2)
        .map(|pair| (pair[1].at - pair[0].at).as_millis() as u64)
        .collect();
    assert!(gaps[0] >= 50 && gaps[0] < 120, "first gap {gaps:?}");
    assert!(gaps[1] >= 110 && gaps[1] < 230, "second gap {gaps:?}");
    assert!(gaps[2] >= 230 && gaps[2] < 460, "third gap {gaps:?}");

    // Fire-and-forget: failures show up in metrics, not at the producer.
    let health = core.health_status().await;
    assert_eq!(health.metrics.failed_operations, 4);

    core.shutdown(Duration::from_secs(2)).await?;
    Ok(())
}

#[tokio::test]
async fn test_overflow_keeps_newest_and_counts_evictions() -> Result<(), Box<dyn std::error::Error>>
{
    gridsink::logging::init_structured_logging();
    let mut config = fast_config();
    config.queue.max_queue_size = 3;
    let backend = MockBackend::succeeding();
    let core = GridsinkCore::new(config, backend.clone())?;

    core.pause();
    for n in 0..5 {
        core.enqueue(Operation::new(OperationKind::AppendRow, json!({ "n": n })))
            .await;
    }

    let status = core.queue_status().await;
    assert_eq!(status.len, 3);
    assert_eq!(status.stats.evicted, 2);
    assert_eq!(status.stats.enqueued, 5);

    core.resume();
    assert!(wait_until(Duration::from_secs(2), || async { backend.call_count().await == 3 }).await);
    // The two oldest were evicted; the three newest delivered in order.
    assert_eq!(
        backend.payloads_in_order().await,
        vec![json!({"n": 2}), json!({"n": 3}), json!({"n": 4})]
    );

    core.shutdown(Duration::from_secs(2)).await?;
    Ok(())
}

#[tokio::test]
async fn test_pause_holds_buffer_and_resume_drains_it() -> Result<(), Box<dyn std::error::Error>> {
    gridsink::logging::init_structured_logging();
    let backend = MockBackend::succeeding();
    let core = GridsinkCore::new(fast_config(), backend.clone())?;

    core.pause();
    core.enqueue(Operation::new(OperationKind::AppendRow, json!({"row": 1})))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.call_count().await, 0);
    assert!(core.queue_status().await.is_paused);

    core.resume();
    assert!(wait_until(Duration::from_secs(2), || async { backend.call_count().await == 1 }).await);

    core.shutdown(Duration::from_secs(2)).await?;
    Ok(())
}

#[tokio::test]
async fn test_clear_drops_pending_without_delivering() -> Result<(), Box<dyn std::error::Error>> {
    gridsink::logging::init_structured_logging();
    let backend = MockBackend::succeeding();
    let core = GridsinkCore::new(fast_config(), backend.clone())?;

    core.pause();
    for _ in 0..3 {
        core.enqueue(Operation::new(OperationKind::DeleteRow, json!({})))
            .await;
    }
    assert_eq!(core.clear_queue().await, 3);
    assert_eq!(core.queue_status().await.len, 0);

    core.resume();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.call_count().await, 0);

    core.shutdown(Duration::from_secs(2)).await?;
    Ok(())
}

#[tokio::test]
async fn test_delivered_write_invalidates_its_cache_keys() -> Result<(), Box<dyn std::error::Error>>
{
    gridsink::logging::init_structured_logging();
    let backend = MockBackend::succeeding();
    let core = GridsinkCore::new(fast_config(), backend.clone())?;

    core.cache_set("sheet:rows", json!([1, 2]));
    core.cache_set("sheet:meta", json!({"cols": 4}));

    core.enqueue(
        Operation::new(OperationKind::AppendRow, json!({"row": 3})).invalidating(["sheet:rows"]),
    )
    .await;

    assert!(wait_until(Duration::from_secs(2), || async { backend.call_count().await == 1 }).await);
    assert!(
        wait_until(Duration::from_secs(1), || async {
            core.cache_get("sheet:rows").is_none()
        })
        .await
    );
    // Unrelated keys survive the write.
    assert_eq!(core.cache_get("sheet:meta"), Some(json!({"cols": 4})));

    core.shutdown(Duration::from_secs(2)).await?;
    Ok(())
}

#[tokio::test]
async fn test_transient_failure_recovers_and_delay_stays_bounded(
) -> Result<(), Box<dyn std::error::Error>> {
    gridsink::logging::init_structured_logging();
    let backend = MockBackend::failing_times(2, "request timed out").await;
    let core = GridsinkCore::new(fast_config(), backend.clone())?;

    core.enqueue(Operation::new(OperationKind::UpdateRow, json!({"row": 7})))
        .await;

    assert!(
        wait_until(Duration::from_secs(3), || async {
            core.queue_status().await.stats.delivered == 1
        })
        .await
    );
    assert_eq!(backend.call_count().await, 3);

    let status = core.queue_status().await;
    assert_eq!(status.stats.retried, 2);
    assert_eq!(status.stats.dropped, 0);
    // Two failures then a success: delay grew, then shrank, inside bounds.
    assert!(status.current_delay_ms >= 5 && status.current_delay_ms <= 40);

    core.shutdown(Duration::from_secs(2)).await?;
    Ok(())
}

#[tokio::test]
async fn test_status_preview_is_capped_and_in_processing_order(
) -> Result<(), Box<dyn std::error::Error>> {
    gridsink::logging::init_structured_logging();
    let mut config = fast_config();
    config.queue.status_preview = 3;
    let backend = MockBackend::succeeding();
    let core = GridsinkCore::new(config, backend.clone())?;

    core.pause();
    for _ in 0..4 {
        core.enqueue(Operation::new(OperationKind::AppendRow, json!({})))
            .await;
    }
    core.enqueue(Operation::new(OperationKind::ReadRange, json!({})).with_priority(Priority::High))
        .await;

    let status = core.queue_status().await;
    assert_eq!(status.len, 5);
    assert_eq!(status.next_items.len(), 3);
    assert_eq!(status.next_items[0].kind, OperationKind::ReadRange);

    core.shutdown(Duration::from_secs(2)).await?;
    Ok(())
}
