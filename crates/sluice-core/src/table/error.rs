//! Error types for table buffers, views and builders.

use super::column::ColumnType;

/// Errors raised while constructing or combining table data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    /// The buffer is shared and can no longer be grown in place.
    #[error("table buffer is shared and cannot be modified")]
    SharedBuffer,

    /// A column with this label already exists.
    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    /// Column metadata and value arrays have different lengths.
    #[error("schema has {columns} columns but {arrays} value arrays")]
    ColumnCountMismatch {
        /// Number of column metadata entries.
        columns: usize,
        /// Number of value arrays.
        arrays: usize,
    },

    /// A column's row count differs from the rest of the buffer.
    #[error("column {label} has {actual} rows, expected {expected}")]
    ColumnLengthMismatch {
        /// Column label.
        label: String,
        /// Row count of the buffer.
        expected: usize,
        /// Row count of the offending column.
        actual: usize,
    },

    /// A column's values do not match its declared type.
    #[error("column {label} has type {actual}, expected {expected}")]
    ColumnTypeMismatch {
        /// Column label.
        label: String,
        /// Declared type.
        expected: ColumnType,
        /// Type found in the data.
        actual: String,
    },

    /// An Arrow field has a type that no column type maps to.
    #[error("unsupported data type for column {label}: {data_type}")]
    UnsupportedType {
        /// Column label.
        label: String,
        /// Arrow data type name.
        data_type: String,
    },

    /// A value slot of a copied schema was never filled.
    #[error("missing values for column {0}")]
    MissingValues(String),

    /// Data for a different group key was appended to a builder.
    #[error("group key mismatch: expected {expected}, got {actual}")]
    KeyMismatch {
        /// Key of the builder.
        expected: String,
        /// Key of the appended data.
        actual: String,
    },

    /// No buffered table exists for the key.
    #[error("table not found with key {0}")]
    TableNotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            TableError::SharedBuffer.to_string(),
            "table buffer is shared and cannot be modified"
        );
        assert_eq!(
            TableError::ColumnLengthMismatch {
                label: "_value".to_string(),
                expected: 3,
                actual: 2,
            }
            .to_string(),
            "column _value has 2 rows, expected 3"
        );
        assert_eq!(
            TableError::TableNotFound("{host=a}".to_string()).to_string(),
            "table not found with key {host=a}"
        );
    }
}
