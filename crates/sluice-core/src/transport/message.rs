//! Messages sent from one dataset to another.

use std::fmt;
use std::sync::Arc;

use tracing::Span;

use crate::table::{GroupKey, Table, View};
use crate::time::Time;
use crate::Error;

/// Identifier of the node that produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DatasetId(pub u64);

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Discriminant of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Rows previously emitted for a key must be withdrawn.
    RetractTable,
    /// A whole table is ready.
    Process,
    /// No row older than the watermark will arrive for any key.
    UpdateWatermark,
    /// The current processing time moved.
    UpdateProcessingTime,
    /// The upstream dataset is done, normally or with an error.
    Finish,
    /// A keyed partial view is ready.
    ProcessView,
    /// Whatever is buffered for a key should be emitted.
    FlushKey,
    /// No row older than the watermark will arrive for one key.
    WatermarkKey,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RetractTable => "RetractTableType",
            Self::Process => "ProcessType",
            Self::UpdateWatermark => "UpdateWatermarkType",
            Self::UpdateProcessingTime => "UpdateProcessingTimeType",
            Self::Finish => "FinishType",
            Self::ProcessView => "ProcessViewType",
            Self::FlushKey => "FlushKeyType",
            Self::WatermarkKey => "WatermarkKeyType",
        };
        f.write_str(name)
    }
}

/// A message sent along one edge of the graph.
///
/// Every message is consumed exactly once. Whoever consumes it either hands
/// its payload on or calls [`Message::ack`], which releases any buffer the
/// message holds.
#[derive(Debug)]
pub enum Message {
    /// Withdraw the rows emitted for `key`.
    RetractTable {
        /// Producer.
        src: DatasetId,
        /// Group to retract.
        key: GroupKey,
    },
    /// Process a complete table.
    Process {
        /// Producer.
        src: DatasetId,
        /// Table, owned by the message until delivered.
        table: Table,
    },
    /// Advance the edge-wide watermark.
    UpdateWatermark {
        /// Producer.
        src: DatasetId,
        /// New watermark.
        time: Time,
    },
    /// Advance processing time.
    UpdateProcessingTime {
        /// Producer.
        src: DatasetId,
        /// Current processing time.
        time: Time,
    },
    /// No more messages follow from `src`.
    Finish {
        /// Producer.
        src: DatasetId,
        /// Error that aborted the producer, if any.
        err: Option<Error>,
    },
    /// Buffer a partial view for its key.
    ProcessView {
        /// Producer.
        src: DatasetId,
        /// View, owned by the message until delivered.
        view: View,
    },
    /// Emit the rows buffered for `key`.
    FlushKey {
        /// Producer.
        src: DatasetId,
        /// Group to flush.
        key: GroupKey,
    },
    /// Advance the watermark of one key.
    WatermarkKey {
        /// Producer.
        src: DatasetId,
        /// Group whose watermark moved.
        key: GroupKey,
        /// Time column the watermark applies to.
        column: Arc<str>,
        /// New watermark.
        time: Time,
    },
}

impl Message {
    /// Discriminant of the message.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::RetractTable { .. } => MessageKind::RetractTable,
            Self::Process { .. } => MessageKind::Process,
            Self::UpdateWatermark { .. } => MessageKind::UpdateWatermark,
            Self::UpdateProcessingTime { .. } => MessageKind::UpdateProcessingTime,
            Self::Finish { .. } => MessageKind::Finish,
            Self::ProcessView { .. } => MessageKind::ProcessView,
            Self::FlushKey { .. } => MessageKind::FlushKey,
            Self::WatermarkKey { .. } => MessageKind::WatermarkKey,
        }
    }

    /// The dataset that produced the message.
    #[must_use]
    pub fn src(&self) -> DatasetId {
        match self {
            Self::RetractTable { src, .. }
            | Self::Process { src, .. }
            | Self::UpdateWatermark { src, .. }
            | Self::UpdateProcessingTime { src, .. }
            | Self::Finish { src, .. }
            | Self::ProcessView { src, .. }
            | Self::FlushKey { src, .. }
            | Self::WatermarkKey { src, .. } => *src,
        }
    }

    /// Returns true for [`Message::Finish`].
    #[must_use]
    pub fn is_finish(&self) -> bool {
        matches!(self, Self::Finish { .. })
    }

    /// Acknowledges receipt, releasing whatever the message retained.
    pub fn ack(self) {
        match self {
            Self::Process { table, .. } => table.done(),
            Self::ProcessView { view, .. } => view.release(),
            _ => {}
        }
    }

    /// Duplicates the message for another receiver.
    ///
    /// A `Process` duplicate owns a deep copy of the table, so either side
    /// can release or consume its table without affecting the other. A
    /// `ProcessView` duplicate takes another reference to the same
    /// immutable buffer. The remaining kinds own no buffers and are copied
    /// field by field.
    #[must_use]
    pub fn dup(&self) -> Message {
        match self {
            Self::RetractTable { src, key } => Self::RetractTable {
                src: *src,
                key: key.clone(),
            },
            Self::Process { src, table } => Self::Process {
                src: *src,
                table: table.copy(),
            },
            Self::UpdateWatermark { src, time } => Self::UpdateWatermark {
                src: *src,
                time: *time,
            },
            Self::UpdateProcessingTime { src, time } => Self::UpdateProcessingTime {
                src: *src,
                time: *time,
            },
            Self::Finish { src, err } => Self::Finish {
                src: *src,
                err: err.clone(),
            },
            Self::ProcessView { src, view } => Self::ProcessView {
                src: *src,
                view: view.retain(),
            },
            Self::FlushKey { src, key } => Self::FlushKey {
                src: *src,
                key: key.clone(),
            },
            Self::WatermarkKey {
                src,
                key,
                column,
                time,
            } => Self::WatermarkKey {
                src: *src,
                key: key.clone(),
                column: Arc::clone(column),
                time: *time,
            },
        }
    }

    /// Records the message payload on `span`.
    ///
    /// The span must declare `key`, `time` and `error` fields; fields the
    /// message has no value for are left empty.
    pub fn record_tags(&self, span: &Span) {
        match self {
            Self::RetractTable { key, .. } | Self::FlushKey { key, .. } => {
                span.record("key", tracing::field::display(key));
            }
            Self::Process { table, .. } => {
                span.record("key", tracing::field::display(table.key()));
            }
            Self::ProcessView { view, .. } => {
                span.record("key", tracing::field::display(view.key()));
            }
            Self::UpdateWatermark { time, .. } | Self::UpdateProcessingTime { time, .. } => {
                span.record("time", time.as_nanos());
            }
            Self::WatermarkKey { key, time, .. } => {
                span.record("key", tracing::field::display(key));
                span.record("time", time.as_nanos());
            }
            Self::Finish { err, .. } => {
                if let Some(err) = err {
                    span.record("error", tracing::field::display(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{ArrayRef, Int64Array};

    use crate::memory::Allocator;
    use crate::table::{ColumnMeta, ColumnType, TableBuffer};

    fn buffer(alloc: &Allocator) -> TableBuffer {
        TableBuffer::try_new(
            GroupKey::new([("host", "a")]),
            vec![ColumnMeta::new("_value", ColumnType::Int)],
            vec![Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef],
        )
        .unwrap()
        .accounted(alloc)
        .unwrap()
    }

    #[test]
    fn test_kind_display() {
        let m = Message::UpdateWatermark {
            src: DatasetId(1),
            time: Time(5),
        };
        assert_eq!(m.kind(), MessageKind::UpdateWatermark);
        assert_eq!(m.kind().to_string(), "UpdateWatermarkType");
        assert_eq!(MessageKind::WatermarkKey.to_string(), "WatermarkKeyType");
        assert_eq!(m.src(), DatasetId(1));
        assert!(!m.is_finish());
    }

    #[test]
    fn test_dataset_id_display() {
        assert_eq!(DatasetId(255).to_string(), "00000000000000ff");
    }

    #[test]
    fn test_process_dup_is_independent() {
        let alloc = Allocator::new();
        let m = Message::Process {
            src: DatasetId(7),
            table: Table::from_buffer(buffer(&alloc)),
        };
        let dup = m.dup();
        let (Message::Process { table: a, .. }, Message::Process { table: b, .. }) = (&m, &dup)
        else {
            panic!("expected process messages");
        };
        assert!(!a.buffers()[0].ptr_eq(&b.buffers()[0]));
        assert_eq!(a.buffers()[0].ref_count(), 1);
        assert_eq!(b.buffers()[0].ref_count(), 1);

        m.ack();
        let Message::Process { table, .. } = &dup else {
            unreachable!()
        };
        assert_eq!(table.num_rows(), 3);
        assert_eq!(dup.src(), DatasetId(7));
        dup.ack();
        assert_eq!(alloc.allocated(), 0);
    }

    #[test]
    fn test_process_view_dup_shares_buffer() {
        let alloc = Allocator::new();
        let m = Message::ProcessView {
            src: DatasetId(1),
            view: View::from_buffer(buffer(&alloc)),
        };
        let dup = m.dup();
        m.ack();
        assert!(alloc.allocated() > 0);
        dup.ack();
        assert_eq!(alloc.allocated(), 0);
    }

    #[test]
    fn test_control_dup_copies_fields() {
        let err = Error::operator("upstream failed");
        let m = Message::Finish {
            src: DatasetId(3),
            err: Some(err),
        };
        let dup = m.dup();
        assert!(dup.is_finish());
        let Message::Finish { err: Some(e), .. } = &dup else {
            panic!("expected finish with error");
        };
        assert_eq!(e.to_string(), "upstream failed");

        let m = Message::WatermarkKey {
            src: DatasetId(3),
            key: GroupKey::new([("host", "b")]),
            column: Arc::from("_time"),
            time: Time(10),
        };
        let Message::WatermarkKey { key, column, time, .. } = m.dup() else {
            panic!("expected watermark key");
        };
        assert_eq!(key, GroupKey::new([("host", "b")]));
        assert_eq!(&*column, "_time");
        assert_eq!(time, Time(10));
    }

    #[test]
    fn test_record_tags_without_subscriber() {
        let span = tracing::trace_span!(
            "test",
            key = tracing::field::Empty,
            time = tracing::field::Empty,
            error = tracing::field::Empty
        );
        let m = Message::RetractTable {
            src: DatasetId(1),
            key: GroupKey::new([("host", "a")]),
        };
        m.record_tags(&span);
        m.ack();
    }
}
