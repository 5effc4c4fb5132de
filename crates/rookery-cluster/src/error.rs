//! Connector error types

use crate::member::MemberId;
use thiserror::Error;

/// Result type for connector operations
pub type Result<T> = std::result::Result<T, ConnectorError>;

/// Connector errors
#[derive(Debug, Error)]
pub enum ConnectorError {
    // ==================== Configuration Errors ====================
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ==================== Substrate Errors ====================
    #[error("substrate unavailable: {0}")]
    SubstrateUnavailable(String),

    #[error("conflicting write for member record: {member_id}")]
    Conflict { member_id: MemberId },

    // ==================== Lifecycle Errors ====================
    #[error("connector is shutting down")]
    ShuttingDown,

    #[error("channel closed")]
    ChannelClosed,

    // ==================== State Machine Errors ====================
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
}

impl ConnectorError {
    /// Check if this error is retriable.
    ///
    /// Retriable failures leave the desired state intact; the next
    /// reconciliation cycle (or the next membership event) realigns.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ConnectorError::SubstrateUnavailable(_) | ConnectorError::Conflict { .. }
        )
    }

    /// Check if this error indicates a programming bug upstream
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, ConnectorError::InvalidTransition(_))
    }
}

// Conversion from channel errors
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ConnectorError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ConnectorError::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for ConnectorError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        ConnectorError::ShuttingDown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_errors() {
        assert!(ConnectorError::SubstrateUnavailable("api down".into()).is_retriable());
        assert!(ConnectorError::Conflict {
            member_id: "node-1".into()
        }
        .is_retriable());
        assert!(!ConnectorError::ShuttingDown.is_retriable());
        assert!(!ConnectorError::InvalidTransition("bad revision".into()).is_retriable());
    }

    #[test]
    fn test_invariant_violations() {
        assert!(ConnectorError::InvalidTransition("rev went backwards".into())
            .is_invariant_violation());
        assert!(!ConnectorError::ShuttingDown.is_invariant_violation());
    }
}
