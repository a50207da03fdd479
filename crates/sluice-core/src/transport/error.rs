//! Transport error types.

use crate::Error;

/// Errors raised by transport nodes, dispatchers and operators.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// An error captured by a node, prefixed with where in the query the
    /// node came from.
    #[error("{context}: {source}")]
    Runtime {
        /// `runtime error`, followed by the node's source location if known.
        context: String,
        /// The captured error.
        source: Box<Error>,
    },

    /// An operator rejected a message.
    #[error("{0}")]
    Operator(String),

    /// Scheduled work or a downstream operator panicked on a worker thread.
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),

    /// A worker thread could not be started.
    #[error("failed to spawn worker {index}: {message}")]
    SpawnFailed {
        /// Worker index.
        index: usize,
        /// OS error message.
        message: String,
    },

    /// Configuration rejected by validation.
    #[error("invalid transport config: {0}")]
    InvalidConfig(String),
}
