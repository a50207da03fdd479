//! # Sluice Core
//!
//! Message transport and scheduling between the operators of a streaming
//! dataflow graph.
//!
//! This crate provides:
//! - **Tables**: refcounted, keyed columnar buffers on Arrow arrays
//! - **Messages**: the closed set of data and control messages sent along an edge
//! - **Transport nodes**: per-edge FIFO queues drained by a shared worker pool
//! - **Adapters**: dispatch of messages onto operator logic, coalescing partial views per key
//!
//! ## Design Principles
//!
//! 1. **No thread per edge** - drains are short units of work on a shared pool
//! 2. **One drain per node** - delivery to an operator is serialised and in order
//! 3. **First error wins** - a failing node forwards exactly one `Finish` downstream
//! 4. **Zero-copy sharing** - buffers are shared by reference and copied only on fan-out
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sluice_core::{Allocator, NodeInfo, PoolDispatcher, TransportConfig, TransportNode};
//!
//! let config = TransportConfig::default();
//! let dispatcher = Arc::new(PoolDispatcher::start(&config)?);
//! let node = TransportNode::new(dispatcher, my_operator, NodeInfo::new("sum0"), &Allocator::new(), &config);
//!
//! node.process(src, table)?;
//! node.finish(src, None);
//! node.finished().wait();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::sync::Arc;

use arrow_schema::ArrowError;

pub mod memory;
pub mod table;
pub mod time;
pub mod transport;

// Re-export key types
pub use memory::Allocator;
pub use table::{GroupKey, Table, TableBuffer, TableError, View};
pub use time::Time;
pub use transport::{
    DatasetId, Dispatcher, Message, MessageKind, NodeInfo, PoolDispatcher, Transformation,
    Transport, TransportConfig, TransportError, TransportNode,
};

/// Result type for sluice-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for sluice-core
///
/// Errors are cheap to clone: a node hands the one error it captured to
/// every caller it rejects and to the `Finish` message it forwards.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Table construction or coalescing errors
    #[error("Table error: {0}")]
    Table(#[from] TableError),

    /// Transport, scheduling and operator errors
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Arrow compute errors
    #[error("Arrow error: {0}")]
    Arrow(Arc<ArrowError>),
}

impl Error {
    /// Creates an operator error with the given message.
    #[must_use]
    pub fn operator(msg: impl Into<String>) -> Self {
        Self::Transport(TransportError::Operator(msg.into()))
    }

    /// Returns the innermost error, skipping provenance wrappers.
    #[must_use]
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::Transport(TransportError::Runtime { source, .. }) => source.root_cause(),
            other => other,
        }
    }
}

impl From<ArrowError> for Error {
    fn from(e: ArrowError) -> Self {
        Self::Arrow(Arc::new(e))
    }
}
