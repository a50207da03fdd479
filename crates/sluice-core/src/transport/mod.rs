//! # Transport
//!
//! Moves data and control messages between operator nodes.
//!
//! ## Data flow
//!
//! ```text
//! producer ──push──▶ MessageQueue ──drain──▶ TransformationAdapter ──▶ Transformation
//!                         │                        │
//!                   TransportNode             BuilderCache
//!                 (one drain at a time,     (partial views per key)
//!                  on the Dispatcher)
//! ```
//!
//! - [`Message`]: the eight message kinds and their ack/dup contracts.
//! - [`MessageQueue`]: unbounded multi-producer FIFO with non-blocking pop.
//! - [`TransportNode`]: idle/running/finished scheduler over a shared
//!   [`Dispatcher`], with first-error-wins capture.
//! - [`TransformationAdapter`]: maps messages onto [`Transformation`] calls.
//! - [`PoolDispatcher`]: fixed pool of named worker threads.
//!
//! A `TransportNode` is itself a `Transformation` (and a `Transport`), so the
//! output of one operator can feed straight into the next node.

mod adapter;
mod config;
mod dispatcher;
mod error;
mod message;
mod metrics;
mod node;
mod provenance;
mod queue;


pub use adapter::{Transformation, TransformationAdapter, Transport};
pub use config::{
    TransportConfig, TransportConfigBuilder, DEFAULT_QUEUE_CAPACITY, DEFAULT_THROUGHPUT,
    MAX_QUEUE_CAPACITY, MAX_WORKERS,
};
pub use dispatcher::{Dispatcher, PoolDispatcher, Work};
pub use error::TransportError;
pub use message::{DatasetId, Message, MessageKind};
pub use metrics::{MetricsSnapshot, TransportMetrics};
pub use node::{FinishedSignal, NodeState, TransportNode};
pub use provenance::{CallStack, NodeInfo, Position, SourceLocation, StackEntry};
pub use queue::MessageQueue;
