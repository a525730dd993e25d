//! Error types for the topology tracker.

use crate::subscriptions::SubscriptionId;
use thiserror::Error;

/// Main error type for tracker operations.
///
/// Ingestion and store mutation are total over well-formed input; errors only
/// arise around configuration, subscriber management, sink publication and the
/// sweeper thread.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Node id is empty")]
    EmptyNodeId,

    #[error("Invalid node id: {0}")]
    InvalidNodeId(String),

    #[error("Subscription not found: {0:?}")]
    SubscriptionNotFound(SubscriptionId),

    #[error("Subscription dropped: {0:?}")]
    SubscriptionDropped(SubscriptionId),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Sweeper thread panicked")]
    SweeperPanicked,
}

impl From<hex::FromHexError> for TrackerError {
    fn from(e: hex::FromHexError) -> Self {
        TrackerError::InvalidNodeId(e.to_string())
    }
}

/// Result type for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;
