//! Event fabric error types.

/// Unified error type for the event crate.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The deriver's forwarding channel closed before the event was queued.
    #[error("event channel closed: {context}")]
    ChannelClosed { context: String },

    /// An event payload could not be serialized.
    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the event crate.
pub type Result<T> = std::result::Result<T, EventError>;
