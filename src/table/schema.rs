//! Column schema of the wide region table.

use super::TableError;
use std::fmt;

/// Key of one derived column: a metric prefix and a year.
///
/// Rendered as `"<prefix>_<year>"`, e.g. `NTL_2019`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnKey {
    /// Metric prefix
    pub prefix: String,

    /// Calendar year
    pub year: i32,
}

impl ColumnKey {
    pub fn new(prefix: impl Into<String>, year: i32) -> Self {
        Self {
            prefix: prefix.into(),
            year,
        }
    }

    /// Column name as exported.
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.prefix, self.year)
    }
}

/// Schema of the master table: the identity column followed by derived
/// columns in the order they were merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    identity: String,
    columns: Vec<ColumnKey>,
}

impl TableSchema {
    /// Schema holding only the identity column.
    pub fn identity_only(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            columns: Vec::new(),
        }
    }

    /// Name of the identity column.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Derived columns in merge order.
    pub fn columns(&self) -> &[ColumnKey] {
        &self.columns
    }

    /// Total column count, identity included.
    pub fn len(&self) -> usize {
        1 + self.columns.len()
    }

    /// Always false: the identity column is always present.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Position of a derived column.
    pub fn position(&self, key: &ColumnKey) -> Option<usize> {
        self.columns.iter().position(|c| c == key)
    }

    /// Position of a derived column by rendered name.
    pub fn position_by_name(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    /// All column names, identity first.
    pub fn column_names(&self) -> Vec<String> {
        std::iter::once(self.identity.clone())
            .chain(self.columns.iter().map(ColumnKey::name))
            .collect()
    }

    /// New schema with `key` appended.
    pub fn with_column(&self, key: ColumnKey) -> Result<Self, TableError> {
        let name = key.name();
        if name == self.identity {
            return Err(TableError::ColumnCollidesWithIdentity(name));
        }
        if self.position_by_name(&name).is_some() {
            return Err(TableError::DuplicateColumn(name));
        }

        let mut columns = self.columns.clone();
        columns.push(key);
        Ok(Self {
            identity: self.identity.clone(),
            columns,
        })
    }
}
