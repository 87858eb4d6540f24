//! # Health Monitor
//!
//! Tracks delivery outcomes, classifies failures into per-kind counters,
//! keeps a bounded ring of recent failures, and drives the recovery state
//! machine: `Healthy ⇄ Recovering → { Healthy | Unhealthy }`. `Unhealthy` is
//! sticky; only an external [`reinitialize`](HealthMonitor::reinitialize)
//! call re-enters the recovery cycle.
//!
//! The operation queue consults [`is_healthy`](HealthMonitor::is_healthy) to
//! suspend draining while the system is marked unhealthy (circuit breaking).

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendError, BackendWriter};
use crate::classification::ErrorKind;
use crate::config::HealthConfig;

/// Current position in the recovery state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Backend probes pass and recent failures are under the threshold.
    Healthy,
    /// A check failed; recovery attempts are in progress.
    Recovering,
    /// Recovery attempts exhausted. Sticky until reinitialized externally.
    Unhealthy,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Recovering => write!(f, "recovering"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Monotonically accumulating delivery counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub quota_errors: u64,
    pub timeout_errors: u64,
    pub connectivity_errors: u64,
    pub auth_errors: u64,
    pub last_error: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
}

/// One entry in the bounded failure ring.
#[derive(Debug, Clone)]
struct FailureRecord {
    operation: String,
    message: String,
    kind: ErrorKind,
    at: Instant,
    wall_at: DateTime<Utc>,
}

/// Failure as exposed in status snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct FailureView {
    pub operation: String,
    pub message: String,
    pub kind: ErrorKind,
    pub at: DateTime<Utc>,
}

/// Snapshot returned by [`HealthMonitor::health_status`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub state: HealthState,
    pub is_healthy: bool,
    pub success_rate: f64,
    pub recent_failures: usize,
    pub recovery_attempts: u32,
    pub metrics: HealthMetrics,
    /// Most recent failures, newest last, at most five.
    pub last_failures: Vec<FailureView>,
}

#[derive(Debug)]
struct MonitorState {
    state: HealthState,
    metrics: HealthMetrics,
    failures: VecDeque<FailureRecord>,
    recovery_attempts: u32,
}

/// Periodic liveness checking, failure accounting, and bounded recovery.
#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthConfig,
    state: Mutex<MonitorState>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MonitorState {
                state: HealthState::Healthy,
                metrics: HealthMetrics::default(),
                failures: VecDeque::new(),
                recovery_attempts: 0,
            }),
        }
    }

    pub async fn is_healthy(&self) -> bool {
        self.state.lock().await.state == HealthState::Healthy
    }

    pub async fn state(&self) -> HealthState {
        self.state.lock().await.state
    }

    /// Record a delivered operation.
    pub async fn record_success(&self, operation: &str) {
        let mut state = self.state.lock().await;
        state.metrics.total_operations += 1;
        state.metrics.successful_operations += 1;
        state.metrics.last_success = Some(Utc::now());
        debug!(operation, "operation delivered");
    }

    /// Record a failed delivery attempt, classifying it into the per-kind
    /// counters and appending to the bounded failure ring.
    pub async fn record_error(&self, operation: &str, error: &BackendError) {
        let mut state = self.state.lock().await;
        state.metrics.total_operations += 1;
        state.metrics.failed_operations += 1;
        state.metrics.last_error = Some(Utc::now());
        match error.kind() {
            ErrorKind::Quota => state.metrics.quota_errors += 1,
            ErrorKind::Timeout => state.metrics.timeout_errors += 1,
            ErrorKind::Connectivity => state.metrics.connectivity_errors += 1,
            ErrorKind::Authentication => {
                state.metrics.auth_errors += 1;
                // A credential problem will not clear on its own.
                error!(operation, error = %error, "authentication failure; check backend credentials");
            }
            ErrorKind::RateLimited | ErrorKind::Unknown => {}
        }
        state.failures.push_back(FailureRecord {
            operation: operation.to_string(),
            message: error.message().to_string(),
            kind: error.kind(),
            at: Instant::now(),
            wall_at: Utc::now(),
        });
        while state.failures.len() > self.config.failure_ring_capacity {
            state.failures.pop_front();
        }
    }

    /// Count of ring failures inside the trailing window.
    pub async fn recent_failures(&self) -> usize {
        let window = self.config.failure_window();
        let state = self.state.lock().await;
        state
            .failures
            .iter()
            .filter(|record| record.at.elapsed() < window)
            .count()
    }

    /// Probe the backend and evaluate recent failures. Triggers recovery when
    /// the probe fails or the recent-failure count exceeds the threshold.
    ///
    /// Returns whether the monitor is healthy afterwards. A sticky-unhealthy
    /// monitor returns `false` without probing.
    pub async fn perform_health_check(&self, backend: &dyn BackendWriter) -> bool {
        {
            let state = self.state.lock().await;
            if state.state == HealthState::Unhealthy {
                debug!("health check skipped: monitor is sticky-unhealthy");
                return false;
            }
        }

        let active = backend.is_active().await;
        let recent = self.recent_failures().await;

        if !active || recent > self.config.failure_threshold {
            warn!(
                backend = backend.name(),
                active,
                recent_failures = recent,
                threshold = self.config.failure_threshold,
                "health check failed, starting recovery"
            );
            self.attempt_recovery(backend).await
        } else {
            let mut state = self.state.lock().await;
            state.recovery_attempts = 0;
            if state.state != HealthState::Healthy {
                info!("health check passed, marking healthy");
            }
            state.state = HealthState::Healthy;
            true
        }
    }

    /// Run bounded recovery: attempt n waits `recovery_base_wait * n`, then
    /// re-initializes the backend. Success clears the failure ring and marks
    /// healthy; exhausting the budget marks sticky-unhealthy.
    pub async fn attempt_recovery(&self, backend: &dyn BackendWriter) -> bool {
        {
            let mut state = self.state.lock().await;
            state.state = HealthState::Recovering;
        }

        loop {
            let attempt = {
                let mut state = self.state.lock().await;
                if state.recovery_attempts >= self.config.max_recovery_attempts {
                    state.state = HealthState::Unhealthy;
                    error!(
                        attempts = state.recovery_attempts,
                        "recovery attempts exhausted, marking unhealthy until reinitialized"
                    );
                    return false;
                }
                state.recovery_attempts += 1;
                state.recovery_attempts
            };

            let wait = self.config.recovery_base_wait() * attempt;
            info!(
                attempt,
                max_attempts = self.config.max_recovery_attempts,
                wait_ms = wait.as_millis() as u64,
                "attempting backend recovery"
            );
            tokio::time::sleep(wait).await;

            match backend.initialize().await {
                Ok(true) => {
                    let mut state = self.state.lock().await;
                    state.failures.clear();
                    state.recovery_attempts = 0;
                    state.state = HealthState::Healthy;
                    info!(attempt, "backend recovery succeeded");
                    return true;
                }
                Ok(false) => {
                    warn!(attempt, "backend initialize declined");
                }
                Err(err) => {
                    warn!(attempt, error = %err, "backend recovery attempt failed");
                }
            }
        }
    }

    /// External re-entry point out of sticky `Unhealthy`: reset the attempt
    /// counter and run a fresh recovery cycle.
    pub async fn reinitialize(&self, backend: &dyn BackendWriter) -> bool {
        {
            let mut state = self.state.lock().await;
            state.recovery_attempts = 0;
        }
        info!(backend = backend.name(), "external reinitialization requested");
        self.attempt_recovery(backend).await
    }

    pub async fn health_status(&self) -> HealthStatus {
        let state = self.state.lock().await;
        let metrics = state.metrics.clone();
        let success_rate = if metrics.total_operations == 0 {
            1.0
        } else {
            metrics.successful_operations as f64 / metrics.total_operations as f64
        };
        let window = self.config.failure_window();
        let recent_failures = state
            .failures
            .iter()
            .filter(|record| record.at.elapsed() < window)
            .count();
        let last_failures = state
            .failures
            .iter()
            .rev()
            .take(5)
            .rev()
            .map(|record| FailureView {
                operation: record.operation.clone(),
                message: record.message.clone(),
                kind: record.kind,
                at: record.wall_at,
            })
            .collect();
        HealthStatus {
            state: state.state,
            is_healthy: state.state == HealthState::Healthy,
            success_rate,
            recent_failures,
            recovery_attempts: state.recovery_attempts,
            metrics,
            last_failures,
        }
    }

    /// Human-readable multi-line report for diagnostics surfaces.
    pub async fn health_report(&self) -> String {
        let status = self.health_status().await;
        let mut report = String::new();
        let _ = writeln!(report, "state: {}", status.state);
        let _ = writeln!(
            report,
            "success rate: {:.1}% ({}/{} operations)",
            status.success_rate * 100.0,
            status.metrics.successful_operations,
            status.metrics.total_operations
        );
        let _ = writeln!(
            report,
            "errors: {} quota, {} timeout, {} connectivity, {} auth",
            status.metrics.quota_errors,
            status.metrics.timeout_errors,
            status.metrics.connectivity_errors,
            status.metrics.auth_errors
        );
        let _ = writeln!(
            report,
            "recent failures (window): {}",
            status.recent_failures
        );
        if let Some(last_success) = status.metrics.last_success {
            let _ = writeln!(report, "last success: {}", last_success.to_rfc3339());
        }
        if let Some(last_error) = status.metrics.last_error {
            let _ = writeln!(report, "last error: {}", last_error.to_rfc3339());
        }
        if !status.last_failures.is_empty() {
            let _ = writeln!(report, "last failures:");
            for failure in &status.last_failures {
                let _ = writeln!(
                    report,
                    "  [{}] {} {}: {}",
                    failure.at.to_rfc3339(),
                    failure.kind,
                    failure.operation,
                    failure.message
                );
            }
        }
        report
    }
}
