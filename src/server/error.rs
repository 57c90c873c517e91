//! Errors raised by [`TopicServer`](super::TopicServer) operations.

use std::io;

use thiserror::Error;

/// Errors that may occur while binding or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or configuring the listener failed.
    #[error("bind error: {0}")]
    Bind(#[source] io::Error),

    /// The pipeline task ended abnormally.
    #[error("pipeline task failed: {0}")]
    Pipeline(#[from] tokio::task::JoinError),
}
