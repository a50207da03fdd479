//! Per-key buffered builders.
//!
//! A [`BufferedBuilder`] collects the buffers of partial views that share
//! one group key and finalises them into a single [`Table`]. The
//! [`BuilderCache`] maps keys to builders for one consumer and keeps them
//! ordered by key so a shutdown flush visits them deterministically.

use std::collections::btree_map::{self, BTreeMap};
use std::sync::Arc;

use fxhash::FxHashMap;

use crate::memory::Allocator;

use super::buffer::TableBuffer;
use super::column::ColumnMeta;
use super::error::TableError;
use super::key::GroupKey;
use super::Table;

/// Accumulates buffers for one group key.
///
/// Buffers may carry different column sets. The builder's schema is the
/// union in first-seen order; columns a buffer lacks are null-filled when
/// the table is produced.
#[derive(Debug)]
pub struct BufferedBuilder {
    key: GroupKey,
    columns: Vec<ColumnMeta>,
    index: FxHashMap<Arc<str>, usize>,
    buffers: Vec<TableBuffer>,
    allocator: Allocator,
}

impl BufferedBuilder {
    /// Creates an empty builder for `key`.
    #[must_use]
    pub fn new(key: GroupKey, allocator: &Allocator) -> Self {
        Self {
            key,
            columns: Vec::new(),
            index: FxHashMap::default(),
            buffers: Vec::new(),
            allocator: allocator.clone(),
        }
    }

    /// Group key of this builder.
    #[must_use]
    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    /// Union schema of everything appended so far.
    #[must_use]
    pub fn cols(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// Total number of buffered rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.iter().map(TableBuffer::len).sum()
    }

    /// Returns true if no rows are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Number of buffers held.
    #[must_use]
    pub fn nbuffers(&self) -> usize {
        self.buffers.len()
    }

    /// Appends a buffer, taking ownership of the handle.
    ///
    /// Buffers without rows only contribute their columns to the schema.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::KeyMismatch`] if the buffer belongs to another
    /// group, or [`TableError::ColumnTypeMismatch`] if a column label is
    /// reused with a different type.
    pub fn append_buffer(&mut self, buf: TableBuffer) -> Result<(), TableError> {
        if buf.key() != &self.key {
            return Err(TableError::KeyMismatch {
                expected: self.key.to_string(),
                actual: buf.key().to_string(),
            });
        }

        for col in buf.cols() {
            match self.index.get(&col.label) {
                Some(&j) if self.columns[j].ty != col.ty => {
                    return Err(TableError::ColumnTypeMismatch {
                        label: col.label.to_string(),
                        expected: self.columns[j].ty,
                        actual: col.ty.to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    self.index.insert(col.label.clone(), self.columns.len());
                    self.columns.push(col.clone());
                }
            }
        }

        if !buf.is_empty() {
            self.buffers.push(buf);
        }
        Ok(())
    }

    /// Finalises everything buffered so far into a table.
    ///
    /// The builder keeps its schema but gives up its buffers.
    ///
    /// # Errors
    ///
    /// Returns an error if a normalised buffer cannot be assembled.
    pub fn table(&mut self) -> Result<Table, TableError> {
        let buffers = std::mem::take(&mut self.buffers);
        let mut normalized = Vec::with_capacity(buffers.len());
        for buf in buffers {
            normalized.push(self.normalize(buf)?);
        }
        Table::from_buffers(self.key.clone(), self.columns.clone(), normalized)
    }

    /// Aligns a buffer with the builder schema, null-filling missing columns.
    fn normalize(&self, buf: TableBuffer) -> Result<TableBuffer, TableError> {
        if buf.cols() == self.columns.as_slice() {
            return Ok(buf);
        }
        let values = self
            .columns
            .iter()
            .map(|col| match buf.index(&col.label) {
                Some(j) => buf.values(j),
                None => col.ty.null_array(buf.len()),
            })
            .collect();
        TableBuffer::try_new(self.key.clone(), self.columns.clone(), values)?
            .accounted(&self.allocator)
    }
}

/// Group-key → builder map owned by one consumer.
#[derive(Debug)]
pub struct BuilderCache {
    builders: BTreeMap<GroupKey, BufferedBuilder>,
    allocator: Allocator,
}

impl BuilderCache {
    /// Creates an empty cache whose builders account in `allocator`.
    #[must_use]
    pub fn new(allocator: &Allocator) -> Self {
        Self {
            builders: BTreeMap::new(),
            allocator: allocator.clone(),
        }
    }

    /// Returns the builder for `key`, creating it if necessary.
    pub fn get_or_create(&mut self, key: &GroupKey) -> &mut BufferedBuilder {
        let allocator = &self.allocator;
        self.builders
            .entry(key.clone())
            .or_insert_with(|| BufferedBuilder::new(key.clone(), allocator))
    }

    /// Returns the builder for `key`, if one exists.
    #[must_use]
    pub fn get(&self, key: &GroupKey) -> Option<&BufferedBuilder> {
        self.builders.get(key)
    }

    /// Appends a buffer to the builder of the buffer's own key.
    ///
    /// # Errors
    ///
    /// See [`BufferedBuilder::append_buffer`].
    pub fn append_buffer(&mut self, buf: TableBuffer) -> Result<(), TableError> {
        let key = buf.key().clone();
        self.get_or_create(&key).append_buffer(buf)
    }

    /// Finalises the builder for `key` into a table. The entry is kept.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::TableNotFound`] if no builder exists for `key`.
    pub fn table(&mut self, key: &GroupKey) -> Result<Table, TableError> {
        self.builders
            .get_mut(key)
            .ok_or_else(|| TableError::TableNotFound(key.to_string()))?
            .table()
    }

    /// Evicts the builder for `key`. Returns true if one existed.
    pub fn expire_table(&mut self, key: &GroupKey) -> bool {
        self.builders.remove(key).is_some()
    }

    /// Visits every builder in key order, stopping at the first error.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `f`.
    pub fn for_each<E, F>(&mut self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&GroupKey, &mut BufferedBuilder) -> Result<(), E>,
    {
        for (key, builder) in &mut self.builders {
            f(key, builder)?;
        }
        Ok(())
    }

    /// Removes and returns every builder in key order.
    pub fn drain(&mut self) -> btree_map::IntoIter<GroupKey, BufferedBuilder> {
        std::mem::take(&mut self.builders).into_iter()
    }

    /// Returns true if a builder exists for `key`.
    #[must_use]
    pub fn contains(&self, key: &GroupKey) -> bool {
        self.builders.contains_key(key)
    }

    /// Number of cached builders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.builders.len()
    }

    /// Returns true if the cache holds no builders.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }
}
