//! Operator interfaces and the message-to-operator adapter.

use tracing::warn;

use crate::memory::Allocator;
use crate::table::{BuilderCache, GroupKey, Table};
use crate::time::Time;
use crate::Result;

use super::message::{DatasetId, Message};

/// Operator logic fed by a transport node.
///
/// Calls for one node are never concurrent and arrive in the order their
/// messages were pushed.
pub trait Transformation: Send {
    /// Withdraws the rows previously emitted for `key`.
    ///
    /// # Errors
    ///
    /// An error finishes the node.
    fn retract_table(&mut self, src: DatasetId, key: GroupKey) -> Result<()>;

    /// Processes a table. Ownership of the table moves to the operator,
    /// which must call [`Table::done`] (or drop it) when finished reading.
    ///
    /// # Errors
    ///
    /// An error finishes the node.
    fn process(&mut self, src: DatasetId, table: Table) -> Result<()>;

    /// Advances the watermark.
    ///
    /// # Errors
    ///
    /// An error finishes the node.
    fn update_watermark(&mut self, src: DatasetId, time: Time) -> Result<()>;

    /// Advances processing time.
    ///
    /// # Errors
    ///
    /// An error finishes the node.
    fn update_processing_time(&mut self, src: DatasetId, time: Time) -> Result<()>;

    /// Signals that `src` will send nothing more. `err` is the upstream
    /// failure, if there was one.
    ///
    /// # Errors
    ///
    /// An error is recorded on the node but does not produce another
    /// `Finish`.
    fn finish(&mut self, src: DatasetId, err: Option<crate::Error>) -> Result<()>;

    /// Name of the operation, used in spans and logs.
    fn operation_type(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Raw message consumer.
///
/// Implemented by [`TransformationAdapter`] and by anything that wants the
/// messages themselves instead of the per-kind calls.
pub trait Transport: Send {
    /// Consumes one message.
    ///
    /// # Errors
    ///
    /// An error finishes the node feeding this transport.
    fn process_message(&mut self, m: Message) -> Result<()>;

    /// Name of the operation, used in spans and logs.
    fn operation_type(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Translates messages into [`Transformation`] calls.
///
/// Partial views are appended to a per-key builder and only reach the
/// operator as a table when their key is flushed or the edge finishes.
pub struct TransformationAdapter<T> {
    t: T,
    cache: BuilderCache,
}

impl<T: Transformation> TransformationAdapter<T> {
    /// Wraps `t`. Buffers built for it are accounted in `allocator`.
    #[must_use]
    pub fn new(t: T, allocator: &Allocator) -> Self {
        Self {
            t,
            cache: BuilderCache::new(allocator),
        }
    }

    /// The wrapped operator.
    #[must_use]
    pub fn transformation(&self) -> &T {
        &self.t
    }

    /// Builders waiting to be flushed.
    #[must_use]
    pub fn cache(&self) -> &BuilderCache {
        &self.cache
    }

    /// Unwraps the operator, dropping anything still buffered.
    pub fn into_inner(self) -> T {
        self.t
    }

    /// Emits every buffered builder in key order. On error the builders not
    /// yet emitted are dropped.
    fn flush_all(&mut self, src: DatasetId) -> Result<()> {
        for (_, mut builder) in self.cache.drain() {
            let table = builder.table()?;
            self.t.process(src, table)?;
        }
        Ok(())
    }
}

impl<T: Transformation> Transport for TransformationAdapter<T> {
    fn process_message(&mut self, m: Message) -> Result<()> {
        match m {
            Message::RetractTable { src, key } => self.t.retract_table(src, key),
            Message::Process { src, table } => self.t.process(src, table),
            Message::UpdateWatermark { src, time } => self.t.update_watermark(src, time),
            Message::UpdateProcessingTime { src, time } => {
                self.t.update_processing_time(src, time)
            }
            Message::Finish { src, err } => match self.flush_all(src) {
                Ok(()) => self.t.finish(src, err),
                Err(flush_err) => {
                    // The operator still sees exactly one finish.
                    let cause = err.unwrap_or_else(|| flush_err.clone());
                    if let Err(e) = self.t.finish(src, Some(cause)) {
                        warn!(error = %e, "finish failed after a failed flush");
                    }
                    Err(flush_err)
                }
            },
            Message::ProcessView { view, .. } => {
                // The view's reference moves into the builder.
                self.cache.append_buffer(view.into_buffer())?;
                Ok(())
            }
            Message::FlushKey { src, key } => {
                let table = self.cache.table(&key)?;
                self.cache.expire_table(&key);
                self.t.process(src, table)
            }
            m @ Message::WatermarkKey { .. } => {
                // Transformations have no per-key watermark hook.
                m.ack();
                Ok(())
            }
        }
    }

    fn operation_type(&self) -> String {
        self.t.operation_type()
    }
}

impl<T> std::fmt::Debug for TransformationAdapter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformationAdapter")
            .field("operation", &std::any::type_name::<T>())
            .field("cache", &self.cache)
            .finish()
    }
}
