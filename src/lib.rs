//! # Gridsink
//!
//! Resilience layer that buffers write/read operations against a remote
//! tabular data store (a hosted spreadsheet service) and delivers them
//! asynchronously, absorbing quota limits, transient network failures, and
//! outages.
//!
//! ## Architecture
//!
//! Three cooperating components drain a write-behind buffer:
//!
//! - [`queue::OperationQueue`] — bounded, priority-ordered buffer with a
//!   delivery loop that retries failures with exponential backoff and paces
//!   itself with an adaptive inter-operation delay
//! - [`health::HealthMonitor`] — periodic liveness checks, failure
//!   classification, bounded recovery, circuit-breaking health flag
//! - [`rate_limiter::RateLimiter`] — adaptive minimum spacing between
//!   outbound calls
//!
//! plus [`cache::ResponseCache`], a short-TTL memoization of read results
//! invalidated by writes.
//!
//! The actual remote store access lives behind the
//! [`backend::BackendWriter`] trait; the surrounding integration layer
//! supplies an adapter that translates its transport failures into the
//! closed [`classification::ErrorKind`] set at the boundary.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gridsink::{GridsinkConfig, GridsinkCore, Operation, OperationKind, Priority};
//! # use gridsink::{BackendError, BackendWriter};
//! # use async_trait::async_trait;
//! # struct MyAdapter;
//! # #[async_trait]
//! # impl BackendWriter for MyAdapter {
//! #     async fn perform(&self, _: OperationKind, _: &serde_json::Value) -> Result<bool, BackendError> { Ok(true) }
//! #     async fn is_active(&self) -> bool { true }
//! #     async fn initialize(&self) -> Result<bool, BackendError> { Ok(true) }
//! #     fn name(&self) -> &str { "my_adapter" }
//! # }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! gridsink::logging::init_structured_logging();
//!
//! let backend = Arc::new(MyAdapter);
//! let core = GridsinkCore::new(GridsinkConfig::load()?, backend)?;
//!
//! core.enqueue(
//!     Operation::new(OperationKind::AppendRow, serde_json::json!({"name": "ada"}))
//!         .with_priority(Priority::High)
//!         .invalidating(["sheet:rows"]),
//! )
//! .await;
//! # Ok(())
//! # }
//! ```
//!
//! Delivery is fire-and-forget by design: failures are retried internally
//! and permanent drops are reported only through
//! [`GridsinkCore::queue_status`](crate::core::GridsinkCore::queue_status) and
//! [`GridsinkCore::health_status`](crate::core::GridsinkCore::health_status), never
//! thrown back at the producer.

pub mod backend;
pub mod cache;
pub mod classification;
pub mod config;
pub mod core;
pub mod error;
pub mod health;
pub mod logging;
pub mod queue;
pub mod rate_limiter;

pub use backend::{BackendError, BackendWriter};
pub use cache::ResponseCache;
pub use classification::{classify, ErrorKind};
pub use config::{CacheConfig, GridsinkConfig, HealthConfig, QueueConfig, RateLimiterConfig};
pub use core::GridsinkCore;
pub use error::{GridsinkError, Result};
pub use health::{FailureView, HealthMetrics, HealthMonitor, HealthState, HealthStatus};
pub use queue::{
    DeliveryLoop, Operation, OperationKind, OperationQueue, Priority, QueueItemPreview,
    QueueStats, QueueStatus,
};
pub use rate_limiter::RateLimiter;
