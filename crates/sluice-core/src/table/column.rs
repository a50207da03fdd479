//! Column metadata and the logical column types.

use std::fmt;
use std::sync::Arc;

use arrow_array::{new_null_array, ArrayRef};
use arrow_schema::{DataType, TimeUnit};

/// Logical type of a column.
///
/// Each logical type maps onto exactly one Arrow [`DataType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ColumnType {
    /// Boolean values.
    Bool,
    /// Signed 64-bit integers.
    Int,
    /// Unsigned 64-bit integers.
    UInt,
    /// 64-bit floats.
    Float,
    /// UTF-8 strings.
    String,
    /// Nanosecond timestamps.
    Time,
}

impl ColumnType {
    /// Returns the Arrow data type backing this column type.
    #[must_use]
    pub fn data_type(self) -> DataType {
        match self {
            Self::Bool => DataType::Boolean,
            Self::Int => DataType::Int64,
            Self::UInt => DataType::UInt64,
            Self::Float => DataType::Float64,
            Self::String => DataType::Utf8,
            Self::Time => DataType::Timestamp(TimeUnit::Nanosecond, None),
        }
    }

    /// Maps an Arrow data type back onto a column type.
    ///
    /// Returns `None` for Arrow types that have no logical counterpart.
    #[must_use]
    pub fn from_data_type(data_type: &DataType) -> Option<Self> {
        match data_type {
            DataType::Boolean => Some(Self::Bool),
            DataType::Int64 => Some(Self::Int),
            DataType::UInt64 => Some(Self::UInt),
            DataType::Float64 => Some(Self::Float),
            DataType::Utf8 => Some(Self::String),
            DataType::Timestamp(TimeUnit::Nanosecond, None) => Some(Self::Time),
            _ => None,
        }
    }

    /// Creates an all-null array of this type with `len` rows.
    ///
    /// With `len == 0` this is the empty array of the type.
    #[must_use]
    pub fn null_array(self, len: usize) -> ArrayRef {
        new_null_array(&self.data_type(), len)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Float => "float",
            Self::String => "string",
            Self::Time => "time",
        };
        f.write_str(name)
    }
}

/// Label and logical type of one column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnMeta {
    /// Column label, unique within a schema.
    pub label: Arc<str>,
    /// Logical type.
    pub ty: ColumnType,
}

impl ColumnMeta {
    /// Creates column metadata.
    #[must_use]
    pub fn new(label: impl Into<Arc<str>>, ty: ColumnType) -> Self {
        Self {
            label: label.into(),
            ty,
        }
    }
}

impl fmt::Display for ColumnMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.label, self.ty)
    }
}

/// Returns the index of the column labelled `label`, if any.
pub(crate) fn position(columns: &[ColumnMeta], label: &str) -> Option<usize> {
    columns.iter().position(|c| &*c.label == label)
}
