use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::ExecuteAction;

/// Failures raised by the transport collaborator. Not recoverable locally.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransportError {
    #[error("network: {0}")]
    Network(String),
    #[error("decoding: {0}")]
    Decoding(String),
    #[error("status {code}: {message}")]
    Status { code: u16, message: String },
}

/// Errors crossing the synchronization layer.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum BerthError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("{action} rejected for container {container_id}: {reason}")]
    ActionRejected { action: ExecuteAction, container_id: String, reason: String },
    #[error("no endpoint selected")]
    NoEndpointSelected,
    /// The selected endpoint changed while a listing was in flight.
    #[error("selection changed during fetch")]
    StaleSelection,
    #[error("cancelled")]
    Cancelled,
}

impl BerthError {
    /// Control signals that are dropped instead of reported.
    pub fn is_silent(&self) -> bool {
        matches!(self, BerthError::StaleSelection | BerthError::Cancelled)
    }

    /// Whether the server could not be reached at all.
    pub fn is_network(&self) -> bool {
        matches!(self, BerthError::Transport(TransportError::Network(_)))
    }
}

pub type BerthResult<T> = Result<T, BerthError>;

/// Receives failures meant for the user (toasts, banners, logs).
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &BerthError, context: &str);
}

/// Reporter that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, error: &BerthError, context: &str) {
        warn!(error = %error, context, "operation failed");
    }
}
