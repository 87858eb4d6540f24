//! # Operation Queue
//!
//! Bounded, priority-ordered buffer of pending backend operations plus the
//! delivery loop that drains it. Producers enqueue fire-and-forget: retries,
//! backoff, and terminal drops are handled internally and surface only
//! through metrics and status snapshots.
//!
//! The loop interleaves four concerns per item: health gating (suspend while
//! the monitor is not healthy), rate limiting (minimum spacing before the
//! outbound call), retry scheduling (exponential backoff with a bounded
//! budget), and adaptive pacing (an inter-operation delay that grows under
//! failure and decays under success).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::BackendWriter;
use crate::cache::ResponseCache;
use crate::config::QueueConfig;
use crate::health::HealthMonitor;
use crate::rate_limiter::RateLimiter;

/// Delivery priority. High drains before normal, normal before low; ties
/// preserve prior relative order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

/// Categories of operations issued against the tabular store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    AppendRow,
    UpdateRow,
    UpdateCell,
    DeleteRow,
    ReadRange,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::AppendRow => "append_row",
            OperationKind::UpdateRow => "update_row",
            OperationKind::UpdateCell => "update_cell",
            OperationKind::DeleteRow => "delete_row",
            OperationKind::ReadRange => "read_range",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Producer-facing description of one pending backend call.
#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OperationKind,
    pub payload: Value,
    pub priority: Priority,
    /// Cache keys for the logical resource this write targets; deleted after
    /// the backend accepts the write. Leave empty for operations that touch
    /// nothing cached.
    pub invalidates: Vec<String>,
}

impl Operation {
    pub fn new(kind: OperationKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            priority: Priority::default(),
            invalidates: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn invalidating<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.invalidates = keys.into_iter().map(Into::into).collect();
        self
    }
}

/// A buffered operation, owned by the queue until delivered or dropped.
#[derive(Debug, Clone)]
struct QueuedOperation {
    id: Uuid,
    kind: OperationKind,
    payload: Value,
    priority: Priority,
    retry_count: u32,
    enqueued_at: DateTime<Utc>,
    retry_not_before: Option<Instant>,
    invalidates: Vec<String>,
    /// Monotonic arrival sequence; stable tiebreak within a priority class.
    seq: u64,
}

/// Lifetime counters for the queue.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub retried: u64,
    pub dropped: u64,
    pub evicted: u64,
}

/// Preview of an upcoming item in processing order.
#[derive(Debug, Clone, Serialize)]
pub struct QueueItemPreview {
    pub id: Uuid,
    pub kind: OperationKind,
    pub priority: Priority,
    pub retry_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// Snapshot returned by [`OperationQueue::status`].
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub is_processing: bool,
    pub is_paused: bool,
    pub len: usize,
    pub current_delay_ms: u64,
    pub stats: QueueStats,
    pub next_items: Vec<QueueItemPreview>,
}

/// Inter-operation pacing delay: grows multiplicatively on failure, decays on
/// success, never leaves `[base, max]`.
#[derive(Debug)]
pub(crate) struct AdaptiveDelay {
    current_ms: f64,
    base_ms: f64,
    max_ms: f64,
    multiplier: f64,
}

impl AdaptiveDelay {
    pub(crate) fn new(config: &QueueConfig) -> Self {
        Self {
            current_ms: config.base_delay_ms as f64,
            base_ms: config.base_delay_ms as f64,
            max_ms: config.max_delay_ms as f64,
            multiplier: config.delay_multiplier,
        }
    }

    pub(crate) fn grow(&mut self) {
        self.current_ms = (self.current_ms * self.multiplier).min(self.max_ms);
    }

    pub(crate) fn shrink(&mut self) {
        self.current_ms = (self.current_ms / self.multiplier).max(self.base_ms);
    }

    pub(crate) fn current(&self) -> Duration {
        Duration::from_millis(self.current_ms as u64)
    }
}

#[derive(Debug)]
struct QueueState {
    items: Vec<QueuedOperation>,
    delay: AdaptiveDelay,
    stats: QueueStats,
    next_seq: u64,
}

impl QueueState {
    /// Stable-sort by priority rank; vector order (arrival / re-insertion
    /// order) breaks ties.
    fn sort_for_processing(&mut self) {
        self.items.sort_by_key(|item| item.priority.rank());
    }

    /// Pick the overflow victim: the oldest item whose priority does not beat
    /// the incoming one, or the oldest overall when everything queued ranks
    /// higher. The incoming item is never the victim.
    fn eviction_victim(&self, incoming: Priority) -> Option<usize> {
        let eligible = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.priority.rank() >= incoming.rank())
            .min_by_key(|(_, item)| item.seq)
            .map(|(index, _)| index);
        eligible.or_else(|| {
            self.items
                .iter()
                .enumerate()
                .min_by_key(|(_, item)| item.seq)
                .map(|(index, _)| index)
        })
    }
}

/// Bounded priority buffer of pending operations.
///
/// `enqueue` is infallible by design: at capacity the oldest queued item is
/// evicted to make room, and delivery failures never propagate back to the
/// producer.
#[derive(Debug)]
pub struct OperationQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    paused: AtomicBool,
    processing: AtomicBool,
    wake: Notify,
}

impl OperationQueue {
    pub fn new(config: QueueConfig) -> Self {
        let delay = AdaptiveDelay::new(&config);
        Self {
            config,
            state: Mutex::new(QueueState {
                items: Vec::new(),
                delay,
                stats: QueueStats::default(),
                next_seq: 0,
            }),
            paused: AtomicBool::new(false),
            processing: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    /// Buffer an operation for asynchronous delivery and wake the loop.
    pub async fn enqueue(&self, operation: Operation) -> Uuid {
        let id = Uuid::new_v4();
        {
            let mut state = self.state.lock().await;
            if state.items.len() >= self.config.max_queue_size {
                if let Some(victim) = state.eviction_victim(operation.priority) {
                    let evicted = state.items.remove(victim);
                    state.stats.evicted += 1;
                    warn!(
                        id = %evicted.id,
                        kind = evicted.kind.as_str(),
                        max_queue_size = self.config.max_queue_size,
                        "queue full, evicted oldest operation"
                    );
                }
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.items.push(QueuedOperation {
                id,
                kind: operation.kind,
                payload: operation.payload,
                priority: operation.priority,
                retry_count: 0,
                enqueued_at: Utc::now(),
                retry_not_before: None,
                invalidates: operation.invalidates,
                seq,
            });
            state.stats.enqueued += 1;
            debug!(
                id = %id,
                kind = operation.kind.as_str(),
                priority = ?operation.priority,
                len = state.items.len(),
                "operation enqueued"
            );
        }
        self.wake.notify_one();
        id
    }

    pub async fn status(&self) -> QueueStatus {
        let mut state = self.state.lock().await;
        state.sort_for_processing();
        let next_items = state
            .items
            .iter()
            .take(self.config.status_preview)
            .map(|item| QueueItemPreview {
                id: item.id,
                kind: item.kind,
                priority: item.priority,
                retry_count: item.retry_count,
                enqueued_at: item.enqueued_at,
            })
            .collect();
        QueueStatus {
            is_processing: self.processing.load(Ordering::Acquire),
            is_paused: self.paused.load(Ordering::Acquire),
            len: state.items.len(),
            current_delay_ms: state.delay.current().as_millis() as u64,
            stats: state.stats,
            next_items,
        }
    }

    /// Drop all pending items. Does not cancel an in-flight delivery.
    pub async fn clear(&self) -> usize {
        let mut state = self.state.lock().await;
        let dropped = state.items.len();
        state.items.clear();
        if dropped > 0 {
            info!(dropped, "queue cleared");
        }
        dropped
    }

    /// Gate the delivery loop without discarding the buffer.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        info!("queue paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        info!("queue resumed");
        self.wake.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.items.is_empty()
    }

    pub async fn stats(&self) -> QueueStats {
        self.state.lock().await.stats
    }

    /// Remove and return the head item in processing order.
    async fn pop_next(&self) -> Option<QueuedOperation> {
        let mut state = self.state.lock().await;
        if state.items.is_empty() {
            return None;
        }
        state.sort_for_processing();
        Some(state.items.remove(0))
    }

    /// Put a failed item back for a later retry.
    async fn requeue(&self, item: QueuedOperation) {
        let mut state = self.state.lock().await;
        state.stats.retried += 1;
        state.items.push(item);
        drop(state);
        self.wake.notify_one();
    }

    /// Return an item untouched (shutdown interrupted its wait).
    async fn restore(&self, item: QueuedOperation) {
        self.state.lock().await.items.push(item);
    }

    async fn record_delivered(&self) -> Duration {
        let mut state = self.state.lock().await;
        state.stats.delivered += 1;
        state.delay.shrink();
        state.delay.current()
    }

    async fn grow_delay(&self) -> Duration {
        let mut state = self.state.lock().await;
        state.delay.grow();
        state.delay.current()
    }

    async fn record_dropped(&self) {
        self.state.lock().await.stats.dropped += 1;
    }

    fn set_processing(&self, value: bool) {
        self.processing.store(value, Ordering::Release);
    }
}

/// The task that drains an [`OperationQueue`] against a backend.
///
/// Owned and spawned by [`GridsinkCore`](crate::core::GridsinkCore); the
/// `running` flag and `shutdown` notify are shared with the core so shutdown
/// interrupts any wait the loop is parked in.
pub struct DeliveryLoop {
    queue: Arc<OperationQueue>,
    monitor: Arc<HealthMonitor>,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    backend: Arc<dyn BackendWriter>,
    config: QueueConfig,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl DeliveryLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<OperationQueue>,
        monitor: Arc<HealthMonitor>,
        limiter: Arc<RateLimiter>,
        cache: Arc<ResponseCache>,
        backend: Arc<dyn BackendWriter>,
        config: QueueConfig,
        running: Arc<AtomicBool>,
        shutdown: Arc<Notify>,
    ) -> Self {
        Self {
            queue,
            monitor,
            limiter,
            cache,
            backend,
            config,
            running,
            shutdown,
        }
    }

    /// Run until the shared running flag clears.
    pub async fn run(&self) {
        info!(backend = self.backend.name(), "delivery loop started");

        while self.running.load(Ordering::Acquire) {
            if self.queue.is_paused() || !self.monitor.is_healthy().await {
                debug!("delivery suspended (paused or unhealthy)");
                if self.wait_or_shutdown(self.config.unhealthy_pause()).await {
                    break;
                }
                continue;
            }

            let Some(mut item) = self.queue.pop_next().await else {
                // Idle until the next enqueue. The coarse tick guards against
                // a wakeup lost between the running check and this wait.
                tokio::select! {
                    _ = self.queue.wake.notified() => {}
                    _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                    _ = self.shutdown.notified() => break,
                }
                continue;
            };

            if let Some(due) = item.retry_not_before {
                let now = Instant::now();
                if due > now {
                    if self.wait_or_shutdown(due - now).await {
                        self.queue.restore(item).await;
                        break;
                    }
                }
            }

            self.limiter.wait_turn().await;

            self.queue.set_processing(true);
            let result = self.backend.perform(item.kind, &item.payload).await;
            self.queue.set_processing(false);

            let pace = match result {
                Ok(_) => {
                    if !item.invalidates.is_empty() {
                        self.cache.invalidate(&item.invalidates);
                    }
                    self.monitor.record_success(item.kind.as_str()).await;
                    self.limiter.record_success();
                    debug!(id = %item.id, kind = item.kind.as_str(), "operation delivered");
                    self.queue.record_delivered().await
                }
                Err(err) => {
                    warn!(
                        id = %item.id,
                        kind = item.kind.as_str(),
                        error_kind = %err.kind(),
                        error = %err,
                        retry_count = item.retry_count,
                        "backend call failed"
                    );
                    self.monitor.record_error(item.kind.as_str(), &err).await;
                    self.limiter.record_failure(err.kind());
                    let pace = self.queue.grow_delay().await;

                    if item.retry_count < self.config.max_retries {
                        item.retry_count += 1;
                        let backoff = Duration::from_millis(
                            self.config
                                .base_retry_delay_ms
                                .saturating_mul(1u64 << (item.retry_count - 1)),
                        );
                        item.retry_not_before = Some(Instant::now() + backoff);
                        debug!(
                            id = %item.id,
                            retry_count = item.retry_count,
                            backoff_ms = backoff.as_millis() as u64,
                            "operation rescheduled"
                        );
                        self.queue.requeue(item).await;
                    } else {
                        self.queue.record_dropped().await;
                        error!(
                            id = %item.id,
                            kind = item.kind.as_str(),
                            retries = item.retry_count,
                            "operation dropped after exhausting retries"
                        );
                    }
                    pace
                }
            };

            if self.wait_or_shutdown(pace).await {
                break;
            }
        }

        self.running.store(false, Ordering::Release);
        info!("delivery loop stopped");
    }

    /// Sleep unless shutdown fires first; returns whether to stop.
    async fn wait_or_shutdown(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.shutdown.notified() => true,
        }
    }
}
