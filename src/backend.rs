//! # Backend Writer Boundary
//!
//! The abstracted capability that actually performs reads and writes against
//! the remote tabular store. The surrounding integration layer (credential
//! discovery, spreadsheet schema handling) supplies an implementation; the
//! core only ever sees this trait plus pre-classified [`BackendError`]s.

use async_trait::async_trait;
use serde_json::Value;

use crate::classification::{classify, ErrorKind};
use crate::queue::OperationKind;

/// A backend failure carrying its classified kind.
///
/// Adapters should translate their transport library's failures into this
/// type at the boundary, either with an explicit kind or through
/// [`BackendError::from_message`], which applies the centralized substring
/// classifier. Business logic never pattern-matches message text.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct BackendError {
    kind: ErrorKind,
    message: String,
}

impl BackendError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build an error by classifying the transport message text.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: classify(&message),
            message,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Async capability for delivering operations to the remote tabular store.
///
/// Implementations are expected to be cheap to probe: `is_active` is called
/// on every periodic health check and must not itself issue remote traffic
/// beyond a lightweight liveness signal.
#[async_trait]
pub trait BackendWriter: Send + Sync {
    /// Perform one operation against the remote store.
    ///
    /// Returns whether the store acknowledged the operation. Failures must
    /// carry a classified kind; the queue converts them into retry
    /// scheduling, never into errors visible to producers.
    async fn perform(&self, kind: OperationKind, payload: &Value) -> Result<bool, BackendError>;

    /// Liveness probe used by health checks.
    async fn is_active(&self) -> bool;

    /// Re-establish the backend connection; used by recovery.
    async fn initialize(&self) -> Result<bool, BackendError>;

    /// Short identifier for logs.
    fn name(&self) -> &str;
}
