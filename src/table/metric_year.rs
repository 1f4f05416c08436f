//! Two-column result of one metric for one year.

use super::{ColumnKey, TableError};
use std::collections::HashSet;

/// Region identity plus one metric value per region.
///
/// Values are `None` when the region had no valid samples.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricYearTable {
    identity: String,
    column: ColumnKey,
    rows: Vec<(String, Option<f64>)>,
}

impl MetricYearTable {
    /// Build a table, rejecting repeated identities.
    pub fn new(
        identity: impl Into<String>,
        column: ColumnKey,
        rows: Vec<(String, Option<f64>)>,
    ) -> Result<Self, TableError> {
        let mut seen = HashSet::with_capacity(rows.len());
        for (name, _) in &rows {
            if !seen.insert(name.as_str()) {
                return Err(TableError::DuplicateIdentity(name.clone()));
            }
        }

        Ok(Self {
            identity: identity.into(),
            column,
            rows,
        })
    }

    /// Name of the identity column.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The metric column this table contributes.
    pub fn column(&self) -> &ColumnKey {
        &self.column
    }

    pub fn rows(&self) -> &[(String, Option<f64>)] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value for a region: outer `None` if the region has no row.
    pub fn get(&self, identity: &str) -> Option<Option<f64>> {
        self.rows
            .iter()
            .find(|(name, _)| name == identity)
            .map(|(_, value)| *value)
    }

    /// Number of rows without a value.
    pub fn missing_count(&self) -> usize {
        self.rows.iter().filter(|(_, v)| v.is_none()).count()
    }
}
