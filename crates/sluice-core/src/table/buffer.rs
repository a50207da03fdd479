//! Refcounted columnar buffers.
//!
//! A [`TableBuffer`] owns a group key, an ordered schema and one Arrow array
//! per column. Handles are reference counted: [`TableBuffer::retain`] hands
//! out another owning handle and [`TableBuffer::release`] consumes one. The
//! backing arrays and the bytes accounted in the [`Allocator`] are freed when
//! the last handle goes away. Because `release` takes the handle by value,
//! reading a buffer through a released handle does not compile.
//!
//! Growth operations ([`reserve`](TableBuffer::reserve),
//! [`add_column`](TableBuffer::add_column)) need the only handle. Once a
//! buffer is shared it is immutable and they return
//! [`TableError::SharedBuffer`].

use std::sync::Arc;

use arrow_array::{make_array, Array, ArrayRef, RecordBatch, RecordBatchOptions};
use arrow_data::transform::MutableArrayData;
use arrow_schema::{ArrowError, Field, Schema};

use crate::memory::{Allocator, Reservation};

use super::column::{position, ColumnMeta, ColumnType};
use super::error::TableError;
use super::key::GroupKey;

/// Read access to a set of named, typed columns sharing one group key.
pub trait ColReader {
    /// Group key shared by every row.
    fn key(&self) -> &GroupKey;

    /// Column metadata, in column order.
    fn cols(&self) -> &[ColumnMeta];

    /// Number of rows.
    fn len(&self) -> usize;

    /// Returns true if there are no rows.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values of column `j`.
    ///
    /// # Panics
    ///
    /// Panics if `j` is out of range.
    fn column(&self, j: usize) -> &ArrayRef;
}

struct Inner {
    key: GroupKey,
    columns: Vec<ColumnMeta>,
    values: Vec<ArrayRef>,
    reservation: Option<Reservation>,
}

/// Shared handle onto an immutable set of column arrays.
#[derive(Clone)]
pub struct TableBuffer {
    inner: Arc<Inner>,
}

impl TableBuffer {
    /// Creates a buffer after checking the schema against the arrays.
    ///
    /// # Errors
    ///
    /// Returns an error if the column and array counts differ, a label
    /// repeats, an array's type does not match its column, or the arrays
    /// have different lengths.
    pub fn try_new(
        key: GroupKey,
        columns: Vec<ColumnMeta>,
        values: Vec<ArrayRef>,
    ) -> Result<Self, TableError> {
        validate(&columns, &values)?;
        Ok(Self {
            inner: Arc::new(Inner {
                key,
                columns,
                values,
                reservation: None,
            }),
        })
    }

    /// Creates a buffer with no columns and no rows.
    #[must_use]
    pub fn empty(key: GroupKey) -> Self {
        Self {
            inner: Arc::new(Inner {
                key,
                columns: Vec::new(),
                values: Vec::new(),
                reservation: None,
            }),
        }
    }

    /// Creates a buffer over the columns of an Arrow record batch.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::UnsupportedType`] if a field has no
    /// [`ColumnType`] counterpart.
    pub fn from_record_batch(key: GroupKey, batch: &RecordBatch) -> Result<Self, TableError> {
        let schema = batch.schema();
        let mut columns = Vec::with_capacity(schema.fields().len());
        for field in schema.fields() {
            let ty = ColumnType::from_data_type(field.data_type()).ok_or_else(|| {
                TableError::UnsupportedType {
                    label: field.name().clone(),
                    data_type: field.data_type().to_string(),
                }
            })?;
            columns.push(ColumnMeta::new(field.name().as_str(), ty));
        }
        Self::try_new(key, columns, batch.columns().to_vec())
    }

    /// Accounts the buffer's current memory in `allocator`.
    ///
    /// Any previous accounting is returned to its allocator first.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::SharedBuffer`] if other handles exist.
    pub fn accounted(mut self, allocator: &Allocator) -> Result<Self, TableError> {
        let bytes = self.memory_size();
        let inner = Arc::get_mut(&mut self.inner).ok_or(TableError::SharedBuffer)?;
        inner.reservation = Some(allocator.reserve(bytes));
        Ok(self)
    }

    /// Group key shared by every row.
    #[must_use]
    pub fn key(&self) -> &GroupKey {
        &self.inner.key
    }

    /// Number of columns.
    #[must_use]
    pub fn ncols(&self) -> usize {
        self.inner.columns.len()
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.values.first().map_or(0, |v| v.len())
    }

    /// Returns true if the buffer holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Column metadata, in column order.
    #[must_use]
    pub fn cols(&self) -> &[ColumnMeta] {
        &self.inner.columns
    }

    /// Metadata of column `j`.
    ///
    /// # Panics
    ///
    /// Panics if `j` is out of range.
    #[must_use]
    pub fn col(&self, j: usize) -> &ColumnMeta {
        &self.inner.columns[j]
    }

    /// Index of the column labelled `label`.
    #[must_use]
    pub fn index(&self, label: &str) -> Option<usize> {
        position(&self.inner.columns, label)
    }

    /// Returns true if a column labelled `label` exists.
    #[must_use]
    pub fn has_col(&self, label: &str) -> bool {
        self.index(label).is_some()
    }

    /// Returns an owned reference to column `j`'s values.
    ///
    /// # Panics
    ///
    /// Panics if `j` is out of range.
    #[must_use]
    pub fn values(&self, j: usize) -> ArrayRef {
        Arc::clone(&self.inner.values[j])
    }

    /// Borrows column `j`'s values without taking a reference.
    ///
    /// # Panics
    ///
    /// Panics if `j` is out of range.
    #[must_use]
    pub fn borrow(&self, j: usize) -> &ArrayRef {
        &self.inner.values[j]
    }

    /// All value arrays, in column order.
    #[must_use]
    pub fn arrays(&self) -> &[ArrayRef] {
        &self.inner.values
    }

    /// Takes another reference to the buffer.
    #[must_use]
    pub fn retain(&self) -> Self {
        self.clone()
    }

    /// Gives up this reference. The last release frees the buffer.
    pub fn release(self) {
        drop(self);
    }

    /// Number of live handles onto this buffer.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Returns true if both handles refer to the same buffer.
    #[must_use]
    pub fn ptr_eq(&self, other: &TableBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Allocator the buffer is accounted in, if any.
    #[must_use]
    pub fn allocator(&self) -> Option<&Allocator> {
        self.inner.reservation.as_ref().map(Reservation::allocator)
    }

    /// Total memory held by the value arrays.
    #[must_use]
    pub fn memory_size(&self) -> usize {
        self.inner
            .values
            .iter()
            .map(|v| v.get_array_memory_size())
            .sum()
    }

    /// Makes room for `n` more columns without reallocating.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::SharedBuffer`] if other handles exist.
    pub fn reserve(&mut self, n: usize) -> Result<(), TableError> {
        let inner = Arc::get_mut(&mut self.inner).ok_or(TableError::SharedBuffer)?;
        inner.columns.reserve(n);
        inner.values.reserve(n);
        Ok(())
    }

    /// Appends a column.
    ///
    /// Without `values` the column is filled with nulls for every existing
    /// row (an empty array when the buffer has no rows yet).
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is shared, the label already exists,
    /// or the array's type or length does not fit the buffer.
    pub fn add_column(
        &mut self,
        label: &str,
        ty: ColumnType,
        values: Option<ArrayRef>,
    ) -> Result<(), TableError> {
        let len = self.len();
        let has_rows_defined = self.ncols() > 0;
        let inner = Arc::get_mut(&mut self.inner).ok_or(TableError::SharedBuffer)?;
        if position(&inner.columns, label).is_some() {
            return Err(TableError::DuplicateColumn(label.to_string()));
        }

        let values = values.unwrap_or_else(|| ty.null_array(len));
        check_type(label, ty, &values)?;
        if has_rows_defined && values.len() != len {
            return Err(TableError::ColumnLengthMismatch {
                label: label.to_string(),
                expected: len,
                actual: values.len(),
            });
        }

        if let Some(reservation) = inner.reservation.as_mut() {
            reservation.grow(values.get_array_memory_size());
        }
        inner.columns.push(ColumnMeta::new(label, ty));
        inner.values.push(values);
        Ok(())
    }

    /// Copies the key and schema into a builder whose value slots are empty.
    #[must_use]
    pub fn copy_schema(&self) -> TableBufferBuilder {
        TableBufferBuilder {
            key: self.inner.key.clone(),
            columns: self.inner.columns.clone(),
            values: vec![None; self.inner.columns.len()],
            allocator: self.allocator().cloned(),
        }
    }

    /// Copies every array into freshly allocated memory.
    ///
    /// The copy shares nothing with `self` and is accounted in the same
    /// allocator.
    #[must_use]
    pub fn deep_copy(&self) -> TableBuffer {
        let values: Vec<ArrayRef> = self.inner.values.iter().map(copy_array).collect();
        let reservation = self.allocator().map(|allocator| {
            allocator.reserve(values.iter().map(|v| v.get_array_memory_size()).sum())
        });
        TableBuffer {
            inner: Arc::new(Inner {
                key: self.inner.key.clone(),
                columns: self.inner.columns.clone(),
                values,
                reservation,
            }),
        }
    }

    /// Converts the buffer into an Arrow record batch. Every field is nullable.
    ///
    /// # Errors
    ///
    /// Returns an Arrow error if the batch cannot be assembled.
    pub fn to_record_batch(&self) -> Result<RecordBatch, ArrowError> {
        let fields: Vec<Field> = self
            .inner
            .columns
            .iter()
            .map(|c| Field::new(c.label.as_ref(), c.ty.data_type(), true))
            .collect();
        let options = RecordBatchOptions::new().with_row_count(Some(self.len()));
        RecordBatch::try_new_with_options(
            Arc::new(Schema::new(fields)),
            self.inner.values.clone(),
            &options,
        )
    }
}

impl ColReader for TableBuffer {
    fn key(&self) -> &GroupKey {
        TableBuffer::key(self)
    }

    fn cols(&self) -> &[ColumnMeta] {
        TableBuffer::cols(self)
    }

    fn len(&self) -> usize {
        TableBuffer::len(self)
    }

    fn column(&self, j: usize) -> &ArrayRef {
        self.borrow(j)
    }
}

impl std::fmt::Debug for TableBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableBuffer")
            .field("key", &self.inner.key)
            .field("columns", &self.inner.columns)
            .field("rows", &self.len())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

/// Schema-shaped buffer under construction, produced by
/// [`TableBuffer::copy_schema`].
#[derive(Debug)]
pub struct TableBufferBuilder {
    key: GroupKey,
    columns: Vec<ColumnMeta>,
    values: Vec<Option<ArrayRef>>,
    allocator: Option<Allocator>,
}

impl TableBufferBuilder {
    /// Group key of the buffer being built.
    #[must_use]
    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    /// Column metadata of the buffer being built.
    #[must_use]
    pub fn cols(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// Fills value slot `j`.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::ColumnTypeMismatch`] if the array's type does
    /// not match column `j`.
    ///
    /// # Panics
    ///
    /// Panics if `j` is out of range.
    pub fn set(&mut self, j: usize, values: ArrayRef) -> Result<(), TableError> {
        let col = &self.columns[j];
        check_type(&col.label, col.ty, &values)?;
        self.values[j] = Some(values);
        Ok(())
    }

    /// Returns true if slot `j` has been filled.
    #[must_use]
    pub fn is_set(&self, j: usize) -> bool {
        self.values.get(j).is_some_and(Option::is_some)
    }

    /// Finishes the buffer, accounting it in the source buffer's allocator.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::MissingValues`] for the first unfilled slot, or
    /// a length error if the arrays disagree on the row count.
    pub fn build(self) -> Result<TableBuffer, TableError> {
        let mut values = Vec::with_capacity(self.values.len());
        for (col, slot) in self.columns.iter().zip(self.values) {
            values.push(slot.ok_or_else(|| TableError::MissingValues(col.label.to_string()))?);
        }
        let buffer = TableBuffer::try_new(self.key, self.columns, values)?;
        match self.allocator {
            Some(allocator) => buffer.accounted(&allocator),
            None => Ok(buffer),
        }
    }
}

fn check_type(label: &str, ty: ColumnType, values: &ArrayRef) -> Result<(), TableError> {
    if values.data_type() != &ty.data_type() {
        return Err(TableError::ColumnTypeMismatch {
            label: label.to_string(),
            expected: ty,
            actual: values.data_type().to_string(),
        });
    }
    Ok(())
}

fn validate(columns: &[ColumnMeta], values: &[ArrayRef]) -> Result<(), TableError> {
    if columns.len() != values.len() {
        return Err(TableError::ColumnCountMismatch {
            columns: columns.len(),
            arrays: values.len(),
        });
    }
    let len = values.first().map_or(0, |v| v.len());
    for (j, (col, array)) in columns.iter().zip(values).enumerate() {
        if position(&columns[..j], &col.label).is_some() {
            return Err(TableError::DuplicateColumn(col.label.to_string()));
        }
        check_type(&col.label, col.ty, array)?;
        if array.len() != len {
            return Err(TableError::ColumnLengthMismatch {
                label: col.label.to_string(),
                expected: len,
                actual: array.len(),
            });
        }
    }
    Ok(())
}

/// Copies an array into new buffers.
fn copy_array(array: &ArrayRef) -> ArrayRef {
    let data = array.to_data();
    let mut copy = MutableArrayData::new(vec![&data], false, data.len());
    copy.extend(0, 0, data.len());
    make_array(copy.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{Float64Array, Int64Array, StringArray};

    fn sample(alloc: &Allocator) -> TableBuffer {
        TableBuffer::try_new(
            GroupKey::new([("host", "a")]),
            vec![
                ColumnMeta::new("host", ColumnType::String),
                ColumnMeta::new("_value", ColumnType::Float),
            ],
            vec![
                Arc::new(StringArray::from(vec!["a", "a", "a"])),
                Arc::new(Float64Array::from(vec![1.0, 2.0, 3.0])),
            ],
        )
        .unwrap()
        .accounted(alloc)
        .unwrap()
    }

    #[test]
    fn test_accessors() {
        let alloc = Allocator::new();
        let buf = sample(&alloc);
        assert_eq!(buf.ncols(), 2);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.col(1).label.as_ref(), "_value");
        assert_eq!(buf.index("_value"), Some(1));
        assert_eq!(buf.index("nope"), None);
        assert!(buf.has_col("host"));
        assert_eq!(buf.key(), &GroupKey::new([("host", "a")]));
    }

    #[test]
    fn test_retain_release_refcount() {
        let alloc = Allocator::new();
        let buf = sample(&alloc);
        assert_eq!(buf.ref_count(), 1);
        let other = buf.retain();
        assert_eq!(buf.ref_count(), 2);
        assert!(buf.ptr_eq(&other));
        other.release();
        assert_eq!(buf.ref_count(), 1);
        assert!(alloc.allocated() > 0);
        buf.release();
        assert_eq!(alloc.allocated(), 0);
        assert_eq!(alloc.live_reservations(), 0);
    }

    #[test]
    fn test_values_vs_borrow() {
        let buf = sample(&Allocator::new());
        let borrowed = Arc::strong_count(buf.borrow(1));
        let owned = buf.values(1);
        assert_eq!(Arc::strong_count(&owned), borrowed + 1);
        drop(owned);
        assert_eq!(Arc::strong_count(buf.borrow(1)), borrowed);
    }

    #[test]
    fn test_validation_errors() {
        let key = GroupKey::empty();
        let err = TableBuffer::try_new(
            key.clone(),
            vec![ColumnMeta::new("a", ColumnType::Int)],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, TableError::ColumnCountMismatch { .. }));

        let err = TableBuffer::try_new(
            key.clone(),
            vec![
                ColumnMeta::new("a", ColumnType::Int),
                ColumnMeta::new("a", ColumnType::Int),
            ],
            vec![
                Arc::new(Int64Array::from(vec![1])),
                Arc::new(Int64Array::from(vec![2])),
            ],
        )
        .unwrap_err();
        assert_eq!(err, TableError::DuplicateColumn("a".to_string()));

        let err = TableBuffer::try_new(
            key.clone(),
            vec![ColumnMeta::new("a", ColumnType::Float)],
            vec![Arc::new(Int64Array::from(vec![1]))],
        )
        .unwrap_err();
        assert!(matches!(err, TableError::ColumnTypeMismatch { .. }));

        let err = TableBuffer::try_new(
            key,
            vec![
                ColumnMeta::new("a", ColumnType::Int),
                ColumnMeta::new("b", ColumnType::Int),
            ],
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(Int64Array::from(vec![1])),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, TableError::ColumnLengthMismatch { .. }));
    }

    #[test]
    fn test_add_column_and_reserve() {
        let alloc = Allocator::new();
        let mut buf = sample(&alloc);
        let before = alloc.allocated();
        buf.reserve(2).unwrap();
        buf.add_column("n", ColumnType::Int, Some(Arc::new(Int64Array::from(vec![1, 2, 3]))))
            .unwrap();
        buf.add_column("missing", ColumnType::Bool, None).unwrap();
        assert_eq!(buf.ncols(), 4);
        assert_eq!(buf.borrow(3).len(), 3);
        assert_eq!(buf.borrow(3).null_count(), 3);
        assert!(alloc.allocated() > before);

        let err = buf.add_column("n", ColumnType::Int, None).unwrap_err();
        assert_eq!(err, TableError::DuplicateColumn("n".to_string()));

        let err = buf
            .add_column("short", ColumnType::Int, Some(Arc::new(Int64Array::from(vec![1]))))
            .unwrap_err();
        assert!(matches!(err, TableError::ColumnLengthMismatch { .. }));
    }

    #[test]
    fn test_growth_rejected_once_shared() {
        let mut buf = sample(&Allocator::new());
        let shared = buf.retain();
        assert_eq!(buf.reserve(1), Err(TableError::SharedBuffer));
        assert_eq!(
            buf.add_column("x", ColumnType::Int, None),
            Err(TableError::SharedBuffer)
        );
        drop(shared);
        assert!(buf.add_column("x", ColumnType::Int, None).is_ok());
    }

    #[test]
    fn test_add_column_to_empty_buffer() {
        let mut buf = TableBuffer::empty(GroupKey::empty());
        buf.add_column("a", ColumnType::String, None).unwrap();
        assert_eq!(buf.len(), 0);
        buf.add_column("b", ColumnType::Int, None).unwrap();
        assert_eq!(buf.ncols(), 2);
    }

    #[test]
    fn test_copy_schema() {
        let alloc = Allocator::new();
        let buf = sample(&alloc);
        let mut builder = buf.copy_schema();
        assert_eq!(builder.cols(), buf.cols());
        assert!(!builder.is_set(0));

        builder
            .set(0, Arc::new(StringArray::from(vec!["a"])))
            .unwrap();
        let err = builder
            .set(1, Arc::new(Int64Array::from(vec![1])))
            .unwrap_err();
        assert!(matches!(err, TableError::ColumnTypeMismatch { .. }));

        let incomplete = buf.copy_schema();
        assert_eq!(
            incomplete.build().unwrap_err(),
            TableError::MissingValues("host".to_string())
        );

        builder.set(1, Arc::new(Float64Array::from(vec![9.0]))).unwrap();
        let out = builder.build().unwrap();
        assert_eq!(out.len(), 1);
        assert!(out.allocator().unwrap().same_as(&alloc));
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let alloc = Allocator::new();
        let buf = sample(&alloc);
        let one = alloc.allocated();
        let copy = buf.deep_copy();
        assert!(!copy.ptr_eq(&buf));
        assert_eq!(copy.ref_count(), 1);
        assert_eq!(buf.ref_count(), 1);
        assert_ne!(
            copy.borrow(1).to_data().buffers()[0].as_ptr(),
            buf.borrow(1).to_data().buffers()[0].as_ptr()
        );
        assert!(alloc.allocated() > one);

        buf.release();
        let values = copy.borrow(1).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(&values.values()[..], &[1.0, 2.0, 3.0]);
        copy.release();
        assert_eq!(alloc.allocated(), 0);
    }

    #[test]
    fn test_record_batch_round_trip() {
        let buf = sample(&Allocator::new());
        let batch = buf.to_record_batch().unwrap();
        assert_eq!(batch.num_rows(), 3);
        let back = TableBuffer::from_record_batch(buf.key().clone(), &batch).unwrap();
        assert_eq!(back.cols(), buf.cols());

        let empty = TableBuffer::empty(GroupKey::empty()).to_record_batch().unwrap();
        assert_eq!(empty.num_columns(), 0);
    }

    #[test]
    fn test_from_record_batch_unsupported_type() {
        let batch = RecordBatch::try_from_iter(vec![(
            "x",
            Arc::new(arrow_array::Int32Array::from(vec![1])) as ArrayRef,
        )])
        .unwrap();
        let err = TableBuffer::from_record_batch(GroupKey::empty(), &batch).unwrap_err();
        assert!(matches!(err, TableError::UnsupportedType { .. }));
    }
}
