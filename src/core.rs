//! # Composition Root
//!
//! `GridsinkCore` is the explicitly constructed, dependency-injected owner of
//! the queue, health monitor, rate limiter, and cache. It spawns the three
//! background tasks (delivery loop, periodic health check, cache sweep) and
//! exposes the component contracts as a facade for producers and diagnostics.
//!
//! There are no module-scope singletons: embedding code constructs one core
//! per backend and passes the handle to its collaborators.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::BackendWriter;
use crate::cache::ResponseCache;
use crate::config::GridsinkConfig;
use crate::error::{GridsinkError, Result};
use crate::health::{HealthMonitor, HealthStatus};
use crate::queue::{DeliveryLoop, Operation, OperationQueue, QueueStatus};
use crate::rate_limiter::RateLimiter;

/// Owner of the delivery core's components and background tasks.
pub struct GridsinkCore {
    config: GridsinkConfig,
    backend: Arc<dyn BackendWriter>,
    queue: Arc<OperationQueue>,
    monitor: Arc<HealthMonitor>,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl GridsinkCore {
    /// Validate the configuration, build the components, and spawn the
    /// delivery loop, health-check task, and cache sweep task.
    pub fn new(config: GridsinkConfig, backend: Arc<dyn BackendWriter>) -> Result<Arc<Self>> {
        config.validate()?;

        let queue = Arc::new(OperationQueue::new(config.queue.clone()));
        let monitor = Arc::new(HealthMonitor::new(config.health.clone()));
        let limiter = Arc::new(RateLimiter::new(config.rate_limiter.clone()));
        let cache = Arc::new(ResponseCache::new(&config.cache));
        let running = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(Notify::new());

        info!(backend = backend.name(), "initializing gridsink core");

        let delivery = DeliveryLoop::new(
            Arc::clone(&queue),
            Arc::clone(&monitor),
            Arc::clone(&limiter),
            Arc::clone(&cache),
            Arc::clone(&backend),
            config.queue.clone(),
            Arc::clone(&running),
            Arc::clone(&shutdown),
        );
        let delivery_handle = tokio::spawn(async move { delivery.run().await });

        let health_handle = tokio::spawn(Self::health_check_task(
            Arc::clone(&monitor),
            Arc::clone(&backend),
            config.health.check_interval(),
            Arc::clone(&running),
            Arc::clone(&shutdown),
        ));

        let sweep_handle = tokio::spawn(Self::cache_sweep_task(
            Arc::clone(&cache),
            config.cache.sweep_interval(),
            Arc::clone(&running),
            Arc::clone(&shutdown),
        ));

        Ok(Arc::new(Self {
            config,
            backend,
            queue,
            monitor,
            limiter,
            cache,
            running,
            shutdown,
            task_handles: Mutex::new(vec![delivery_handle, health_handle, sweep_handle]),
        }))
    }

    async fn health_check_task(
        monitor: Arc<HealthMonitor>,
        backend: Arc<dyn BackendWriter>,
        interval: Duration,
        running: Arc<AtomicBool>,
        shutdown: Arc<Notify>,
    ) {
        while running.load(Ordering::Acquire) {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    monitor.perform_health_check(backend.as_ref()).await;
                }
                _ = shutdown.notified() => break,
            }
        }
        debug!("health check task stopped");
    }

    async fn cache_sweep_task(
        cache: Arc<ResponseCache>,
        interval: Duration,
        running: Arc<AtomicBool>,
        shutdown: Arc<Notify>,
    ) {
        while running.load(Ordering::Acquire) {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    cache.sweep();
                }
                _ = shutdown.notified() => break,
            }
        }
        debug!("cache sweep task stopped");
    }

    /// Stop all background tasks, waiting up to `timeout` for them to finish.
    /// An in-flight backend call is allowed to complete.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        info!("shutting down gridsink core");
        self.running.store(false, Ordering::Release);
        self.shutdown.notify_waiters();

        let handles: Vec<JoinHandle<()>> = self.task_handles.lock().await.drain(..).collect();
        tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .map_err(|_| {
                GridsinkError::Timeout("background tasks did not stop within timeout".to_string())
            })?;
        Ok(())
    }

    // --- queue facade ---

    /// Buffer an operation for asynchronous delivery. Fire-and-forget: the
    /// returned id is for correlation in status previews and logs only.
    pub async fn enqueue(&self, operation: Operation) -> Uuid {
        self.queue.enqueue(operation).await
    }

    pub async fn queue_status(&self) -> QueueStatus {
        self.queue.status().await
    }

    pub async fn clear_queue(&self) -> usize {
        self.queue.clear().await
    }

    pub fn pause(&self) {
        self.queue.pause();
    }

    pub fn resume(&self) {
        self.queue.resume();
    }

    // --- health facade ---

    pub async fn health_status(&self) -> HealthStatus {
        self.monitor.health_status().await
    }

    pub async fn health_report(&self) -> String {
        self.monitor.health_report().await
    }

    /// Immediate out-of-band health check.
    pub async fn force_health_check(&self) -> bool {
        self.monitor.perform_health_check(self.backend.as_ref()).await
    }

    /// Re-enter the recovery cycle from sticky-unhealthy. The delivery loop
    /// picks the health flag up on its next suspension re-check.
    pub async fn reinitialize_backend(&self) -> bool {
        self.monitor.reinitialize(self.backend.as_ref()).await
    }

    // --- cache facade ---

    pub fn cache_get(&self, key: &str) -> Option<Value> {
        self.cache.get(key)
    }

    pub fn cache_get_or_refresh(&self, key: &str, force_refresh: bool) -> Option<Value> {
        self.cache.get_or_refresh(key, force_refresh)
    }

    pub fn cache_set(&self, key: impl Into<String>, data: Value) {
        self.cache.set(key, data);
    }

    pub fn cache_invalidate(&self, keys: &[String]) -> usize {
        self.cache.invalidate(keys)
    }

    // --- diagnostics ---

    pub fn config(&self) -> &GridsinkConfig {
        &self.config
    }

    /// Current rate limiter spacing, for diagnostics surfaces.
    pub fn current_rate_interval(&self) -> Duration {
        self.limiter.current_interval()
    }
}
