//! Views over table buffers.

use arrow_array::ArrayRef;

use super::buffer::{ColReader, TableBuffer, TableBufferBuilder};
use super::column::{ColumnMeta, ColumnType};
use super::error::TableError;
use super::key::GroupKey;

/// A keyed slice of rows, carried downstream by `ProcessView` messages.
///
/// A view is a thin owning wrapper over one [`TableBuffer`]. It does not
/// cover the whole group: several views with the same key may be emitted
/// and coalesced downstream.
#[derive(Debug, Clone)]
pub struct View {
    buf: TableBuffer,
}

impl View {
    /// Wraps an existing buffer.
    #[must_use]
    pub fn from_buffer(buf: TableBuffer) -> Self {
        Self { buf }
    }

    /// Builds a view that references every column of a column reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader's columns do not form a valid buffer.
    pub fn from_reader<R: ColReader + ?Sized>(cr: &R) -> Result<Self, TableError> {
        let values = (0..cr.cols().len()).map(|j| cr.column(j).clone()).collect();
        let buf = TableBuffer::try_new(cr.key().clone(), cr.cols().to_vec(), values)?;
        Ok(Self::from_buffer(buf))
    }

    /// Group key shared by every row in the view.
    #[must_use]
    pub fn key(&self) -> &GroupKey {
        self.buf.key()
    }

    /// The underlying buffer.
    #[must_use]
    pub fn buffer(&self) -> &TableBuffer {
        &self.buf
    }

    /// Unwraps the view into its buffer handle.
    #[must_use]
    pub fn into_buffer(self) -> TableBuffer {
        self.buf
    }

    /// Number of columns.
    #[must_use]
    pub fn ncols(&self) -> usize {
        self.buf.ncols()
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if the view has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Column metadata.
    #[must_use]
    pub fn cols(&self) -> &[ColumnMeta] {
        self.buf.cols()
    }

    /// Metadata of column `j`.
    ///
    /// # Panics
    ///
    /// Panics if `j` is out of range.
    #[must_use]
    pub fn col(&self, j: usize) -> &ColumnMeta {
        self.buf.col(j)
    }

    /// Index of the column labelled `label`, or `None` if absent.
    #[must_use]
    pub fn index(&self, label: &str) -> Option<usize> {
        self.buf.index(label)
    }

    /// Returns true if a column labelled `label` exists.
    #[must_use]
    pub fn has_col(&self, label: &str) -> bool {
        self.buf.has_col(label)
    }

    /// Owned reference to column `j`'s values; dropping it releases it.
    ///
    /// # Panics
    ///
    /// Panics if `j` is out of range.
    #[must_use]
    pub fn values(&self, j: usize) -> ArrayRef {
        self.buf.values(j)
    }

    /// Column `j`'s values, borrowed for no longer than the view.
    ///
    /// # Panics
    ///
    /// Panics if `j` is out of range.
    #[must_use]
    pub fn borrow(&self, j: usize) -> &ArrayRef {
        self.buf.borrow(j)
    }

    /// Takes another reference to the underlying buffer.
    #[must_use]
    pub fn retain(&self) -> Self {
        Self {
            buf: self.buf.retain(),
        }
    }

    /// Releases this reference to the underlying buffer.
    pub fn release(self) {
        self.buf.release();
    }

    /// Makes room for `n` more columns.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::SharedBuffer`] if the buffer is shared.
    pub fn reserve(&mut self, n: usize) -> Result<(), TableError> {
        self.buf.reserve(n)
    }

    /// Appends a column; without `values` it is null-filled.
    ///
    /// # Errors
    ///
    /// See [`TableBuffer::add_column`].
    pub fn add_column(
        &mut self,
        label: &str,
        ty: ColumnType,
        values: Option<ArrayRef>,
    ) -> Result<(), TableError> {
        self.buf.add_column(label, ty, values)
    }

    /// Copies the key and schema into a builder with empty value slots.
    #[must_use]
    pub fn copy_schema(&self) -> TableBufferBuilder {
        self.buf.copy_schema()
    }
}

impl ColReader for View {
    fn key(&self) -> &GroupKey {
        self.buf.key()
    }

    fn cols(&self) -> &[ColumnMeta] {
        self.buf.cols()
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    fn column(&self, j: usize) -> &ArrayRef {
        self.buf.borrow(j)
    }
}
