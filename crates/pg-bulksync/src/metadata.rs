//! Entity-to-table metadata contract.
//!
//! The engine consumes a [`TableDescriptor`]: the destination table name plus
//! an ordered list of column descriptors, each carrying a value accessor and
//! a key-membership flag. Column order is significant - the staging DDL, the
//! binary wire writes, and the generated DML all follow it.
//!
//! Descriptors come from one of two providers with an identical shape: a type
//! implements [`TableMapped`], or a caller registers a mapping manually
//! through [`TableDescriptor::builder`].

use std::fmt;
use std::sync::Arc;

use crate::error::{BulkError, Result};
use crate::identifier::validate_identifier;
use crate::value::SqlValue;

/// One destination column: name, key membership, and the accessor that
/// extracts its value from an entity.
pub struct ColumnDescriptor<T> {
    name: String,
    is_key: bool,
    accessor: Arc<dyn Fn(&T) -> SqlValue + Send + Sync>,
}

impl<T> ColumnDescriptor<T> {
    /// Create a column descriptor.
    pub fn new(
        name: impl Into<String>,
        is_key: bool,
        accessor: impl Fn(&T) -> SqlValue + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            is_key,
            accessor: Arc::new(accessor),
        }
    }

    /// Column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this column participates in the default identity key.
    pub fn is_key(&self) -> bool {
        self.is_key
    }

    /// Apply the accessor to an entity.
    pub fn value_of(&self, entity: &T) -> SqlValue {
        (self.accessor)(entity)
    }
}

impl<T> Clone for ColumnDescriptor<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            is_key: self.is_key,
            accessor: Arc::clone(&self.accessor),
        }
    }
}

impl<T> fmt::Debug for ColumnDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDescriptor")
            .field("name", &self.name)
            .field("is_key", &self.is_key)
            .finish_non_exhaustive()
    }
}

/// Destination table name plus its ordered column descriptors.
#[derive(Debug, Clone)]
pub struct TableDescriptor<T> {
    table: String,
    columns: Vec<ColumnDescriptor<T>>,
}

impl<T> TableDescriptor<T> {
    /// Start a manual registration for `table`.
    pub fn builder(table: impl Into<String>) -> TableDescriptorBuilder<T> {
        TableDescriptorBuilder {
            table: table.into(),
            columns: Vec::new(),
        }
    }

    /// Destination table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[ColumnDescriptor<T>] {
        &self.columns
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Validate table and column identifiers and require at least one column.
    pub(crate) fn validate(&self) -> Result<()> {
        validate_identifier(&self.table)?;
        if self.columns.is_empty() {
            return Err(BulkError::Validation(format!(
                "table {} has no mapped columns",
                self.table
            )));
        }
        for column in &self.columns {
            validate_identifier(&column.name)?;
        }
        Ok(())
    }

    /// Resolve the identity key for merge/sync: the override when supplied,
    /// otherwise the descriptor's key-flagged columns.
    ///
    /// An override must be non-empty and may only reference mapped columns.
    /// The resolved set must be non-empty.
    pub(crate) fn resolve_keys(&self, key_override: Option<&[String]>) -> Result<Vec<String>> {
        let keys: Vec<String> = match key_override {
            Some(names) => {
                if names.is_empty() {
                    return Err(BulkError::Validation(
                        "key override cannot be empty".to_string(),
                    ));
                }
                for name in names {
                    if !self.columns.iter().any(|c| c.name == *name) {
                        return Err(BulkError::Validation(format!(
                            "key override references unmapped column {:?} on table {}",
                            name, self.table
                        )));
                    }
                }
                names.to_vec()
            }
            None => self
                .columns
                .iter()
                .filter(|c| c.is_key)
                .map(|c| c.name.clone())
                .collect(),
        };

        if keys.is_empty() {
            return Err(BulkError::Validation(format!(
                "table {} has no key columns - merge and sync require an identity key",
                self.table
            )));
        }
        Ok(keys)
    }
}

/// Manual registration builder, the introspection-free metadata provider.
pub struct TableDescriptorBuilder<T> {
    table: String,
    columns: Vec<ColumnDescriptor<T>>,
}

impl<T> TableDescriptorBuilder<T> {
    /// Register a non-key column.
    pub fn column(
        mut self,
        name: impl Into<String>,
        accessor: impl Fn(&T) -> SqlValue + Send + Sync + 'static,
    ) -> Self {
        self.columns.push(ColumnDescriptor::new(name, false, accessor));
        self
    }

    /// Register a key column.
    pub fn key_column(
        mut self,
        name: impl Into<String>,
        accessor: impl Fn(&T) -> SqlValue + Send + Sync + 'static,
    ) -> Self {
        self.columns.push(ColumnDescriptor::new(name, true, accessor));
        self
    }

    /// Finish the registration, validating identifiers and uniqueness.
    pub fn build(self) -> Result<TableDescriptor<T>> {
        let descriptor = TableDescriptor {
            table: self.table,
            columns: self.columns,
        };
        descriptor.validate()?;
        for (i, column) in descriptor.columns.iter().enumerate() {
            if descriptor.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(BulkError::Validation(format!(
                    "column {:?} registered twice on table {}",
                    column.name, descriptor.table
                )));
            }
        }
        Ok(descriptor)
    }
}

/// Metadata provider trait: a type that knows its own table mapping.
pub trait TableMapped: Sized {
    /// Produce the descriptor for this entity type.
    fn table_descriptor() -> TableDescriptor<Self>;
}
