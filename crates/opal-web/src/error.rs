//! Web server error types.

/// Unified error type for the web crate.
#[derive(Debug, thiserror::Error)]
pub enum WebError {
    /// The TCP listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server failed while serving.
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Convenience alias used throughout the web crate.
pub type Result<T> = std::result::Result<T, WebError>;
