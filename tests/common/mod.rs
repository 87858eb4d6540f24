//! Shared test support: a scriptable mock backend that records every call.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use gridsink::{BackendError, BackendWriter, OperationKind};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub kind: OperationKind,
    pub payload: Value,
    pub at: Instant,
}

/// Mock backend with scripted outcomes.
///
/// Scripted outcomes are consumed front-to-back, one per `perform` call;
/// once the script is exhausted the default outcome applies.
pub struct MockBackend {
    scripted: Mutex<VecDeque<Result<bool, BackendError>>>,
    default_outcome: Mutex<Result<bool, BackendError>>,
    calls: Mutex<Vec<RecordedCall>>,
    active: AtomicBool,
    init_failures_remaining: AtomicU32,
    init_calls: AtomicU32,
}

impl MockBackend {
    fn with_default(default_outcome: Result<bool, BackendError>) -> Arc<Self> {
        Arc::new(Self {
            scripted: Mutex::new(VecDeque::new()),
            default_outcome: Mutex::new(default_outcome),
            calls: Mutex::new(Vec::new()),
            active: AtomicBool::new(true),
            init_failures_remaining: AtomicU32::new(0),
            init_calls: AtomicU32::new(0),
        })
    }

    /// Every call succeeds.
    pub fn succeeding() -> Arc<Self> {
        Self::with_default(Ok(true))
    }

    /// Every call fails with the given message (classified on construction).
    pub fn failing(message: &str) -> Arc<Self> {
        Self::with_default(Err(BackendError::from_message(message)))
    }

    /// The first `n` calls fail with the given message, then calls succeed.
    pub async fn failing_times(n: usize, message: &str) -> Arc<Self> {
        let backend = Self::succeeding();
        {
            let mut scripted = backend.scripted.lock().await;
            for _ in 0..n {
                scripted.push_back(Err(BackendError::from_message(message)));
            }
        }
        backend
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Make the next `n` initialize calls fail before succeeding.
    pub fn set_init_failures(&self, n: u32) {
        self.init_failures_remaining.store(n, Ordering::Release);
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    pub async fn payloads_in_order(&self) -> Vec<Value> {
        self.calls
            .lock()
            .await
            .iter()
            .map(|call| call.payload.clone())
            .collect()
    }

    pub fn init_call_count(&self) -> u32 {
        self.init_calls.load(Ordering::Acquire)
    }
}

#[async_trait]
impl BackendWriter for MockBackend {
    async fn perform(&self, kind: OperationKind, payload: &Value) -> Result<bool, BackendError> {
        self.calls.lock().await.push(RecordedCall {
            kind,
            payload: payload.clone(),
            at: Instant::now(),
        });
        if let Some(outcome) = self.scripted.lock().await.pop_front() {
            return outcome;
        }
        self.default_outcome.lock().await.clone()
    }

    async fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    async fn initialize(&self) -> Result<bool, BackendError> {
        self.init_calls.fetch_add(1, Ordering::AcqRel);
        let remaining = self.init_failures_remaining.load(Ordering::Acquire);
        if remaining > 0 {
            self.init_failures_remaining
                .store(remaining - 1, Ordering::Release);
            return Err(BackendError::from_message(
                "connection reset during initialize",
            ));
        }
        self.active.store(true, Ordering::Release);
        Ok(true)
    }

    fn name(&self) -> &str {
        "mock_backend"
    }
}
