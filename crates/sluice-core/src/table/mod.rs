//! # Columnar Tables
//!
//! Keyed, columnar row data exchanged between operators.
//!
//! - [`TableBuffer`]: a refcounted handle onto one key, one schema and one
//!   Arrow array per column.
//! - [`View`]: a keyed slice carried by `ProcessView` messages.
//! - [`Table`]: the full group of rows for one key, made of one or more
//!   buffers that share a schema.
//! - [`BufferedBuilder`] / [`BuilderCache`]: coalesce partial views into
//!   tables, one builder per key.
//!
//! ## Ownership
//!
//! Handles are owned values. Cloning (or `retain`) takes another
//! reference; dropping (or `release`) gives one back. Backing memory is
//! freed when the final handle goes away. Buffers only grow while a single
//! handle exists.

mod buffer;
mod builder;
mod column;
mod error;
mod key;
mod view;

pub use buffer::{ColReader, TableBuffer, TableBufferBuilder};
pub use builder::{BufferedBuilder, BuilderCache};
pub use column::{ColumnMeta, ColumnType};
pub use error::TableError;
pub use key::{GroupKey, KeyValue};
pub use view::View;

use std::sync::Arc;

use arrow_array::{RecordBatch, RecordBatchOptions};
use arrow_schema::{ArrowError, Field, Schema, SchemaRef};

/// All rows for one group key.
///
/// A table owns its buffers. Ownership moves with the value: handing a
/// table to a consumer hands it the buffers, and [`Table::done`] releases
/// them. Dropping the table has the same effect.
#[derive(Debug)]
pub struct Table {
    key: GroupKey,
    columns: Vec<ColumnMeta>,
    buffers: Vec<TableBuffer>,
}

impl Table {
    /// Creates a table made of a single buffer.
    #[must_use]
    pub fn from_buffer(buf: TableBuffer) -> Self {
        Self {
            key: buf.key().clone(),
            columns: buf.cols().to_vec(),
            buffers: vec![buf],
        }
    }

    /// Creates a table from buffers that share `key` and `columns`.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::KeyMismatch`] if a buffer has another key, or
    /// [`TableError::ColumnTypeMismatch`] if a buffer's schema differs.
    pub fn from_buffers(
        key: GroupKey,
        columns: Vec<ColumnMeta>,
        buffers: Vec<TableBuffer>,
    ) -> Result<Self, TableError> {
        for buf in &buffers {
            if buf.key() != &key {
                return Err(TableError::KeyMismatch {
                    expected: key.to_string(),
                    actual: buf.key().to_string(),
                });
            }
            if buf.cols() != columns.as_slice() {
                let (label, expected) = columns
                    .iter()
                    .find(|c| buf.index(&c.label).map(|j| buf.col(j)) != Some(*c))
                    .or_else(|| columns.first())
                    .map_or((String::new(), ColumnType::String), |c| {
                        (c.label.to_string(), c.ty)
                    });
                return Err(TableError::ColumnTypeMismatch {
                    label,
                    expected,
                    actual: schema_string(buf.cols()),
                });
            }
        }
        Ok(Self {
            key,
            columns,
            buffers,
        })
    }

    /// Creates a single-buffer table over an Arrow record batch.
    ///
    /// # Errors
    ///
    /// See [`TableBuffer::from_record_batch`].
    pub fn from_record_batch(key: GroupKey, batch: &RecordBatch) -> Result<Self, TableError> {
        TableBuffer::from_record_batch(key, batch).map(Self::from_buffer)
    }

    /// Group key of every row.
    #[must_use]
    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    /// Column metadata.
    #[must_use]
    pub fn cols(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// Total number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.buffers.iter().map(TableBuffer::len).sum()
    }

    /// Returns true if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// The buffers making up the table, in arrival order.
    #[must_use]
    pub fn buffers(&self) -> &[TableBuffer] {
        &self.buffers
    }

    /// Iterates the buffers as views, each holding its own reference.
    pub fn views(&self) -> impl Iterator<Item = View> + '_ {
        self.buffers.iter().map(|b| View::from_buffer(b.retain()))
    }

    /// Memory held by every buffer of the table.
    #[must_use]
    pub fn memory_size(&self) -> usize {
        self.buffers.iter().map(TableBuffer::memory_size).sum()
    }

    /// Copies the table into buffers that share nothing with this one.
    #[must_use]
    pub fn copy(&self) -> Table {
        Table {
            key: self.key.clone(),
            columns: self.columns.clone(),
            buffers: self.buffers.iter().map(TableBuffer::deep_copy).collect(),
        }
    }

    /// Concatenates the table into one Arrow record batch.
    ///
    /// # Errors
    ///
    /// Returns an Arrow error if the buffers cannot be concatenated.
    pub fn to_record_batch(&self) -> Result<RecordBatch, ArrowError> {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|c| Field::new(c.label.as_ref(), c.ty.data_type(), true))
            .collect();
        let schema: SchemaRef = Arc::new(Schema::new(fields));
        if self.columns.is_empty() {
            let options = RecordBatchOptions::new().with_row_count(Some(self.num_rows()));
            return RecordBatch::try_new_with_options(schema, vec![], &options);
        }
        let batches = self
            .buffers
            .iter()
            .map(TableBuffer::to_record_batch)
            .collect::<Result<Vec<_>, _>>()?;
        arrow_select::concat::concat_batches(&schema, &batches)
    }

    /// Signals the consumer is finished with the table, releasing its buffers.
    pub fn done(self) {
        for buf in self.buffers {
            buf.release();
        }
    }
}

fn schema_string(columns: &[ColumnMeta]) -> String {
    let cols: Vec<String> = columns.iter().map(ToString::to_string).collect();
    format!("[{}]", cols.join(","))
}
