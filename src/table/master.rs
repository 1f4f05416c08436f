//! The accumulating wide table and its join-based widening.

use super::{ColumnKey, MetricYearTable, TableError, TableSchema};
use crate::index::RegionTable;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// How a metric-year table is joined onto the master table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinPolicy {
    /// Keep every master row; regions absent from the metric table get a
    /// missing value.
    #[default]
    Left,

    /// Keep only regions present on both sides. A region missing from any
    /// single metric-year table disappears from the result.
    Inner,
}

/// One region row of the master table.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterRow {
    identity: String,
    values: Vec<Option<f64>>,
}

impl MasterRow {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Values aligned with the schema's derived columns.
    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    fn extended(&self, value: Option<f64>) -> Self {
        let mut values = Vec::with_capacity(self.values.len() + 1);
        values.extend_from_slice(&self.values);
        values.push(value);
        Self {
            identity: self.identity.clone(),
            values,
        }
    }
}

/// Row accounting for a single merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Master rows matched by the metric table
    pub matched: usize,

    /// Master rows with no metric row (filled under left join, dropped under inner)
    pub unmatched_master: usize,

    /// Metric rows whose region is not in the master table
    pub unmatched_metric: usize,
}

/// The wide per-region table: identity plus one column per merged
/// (metric, year).
///
/// Every merge returns a new table; a `MasterTable` is never widened in place.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterTable {
    schema: TableSchema,
    rows: Vec<MasterRow>,
}

impl MasterTable {
    /// Identity-only projection of a region table.
    pub fn from_regions(regions: &RegionTable) -> Self {
        Self {
            schema: TableSchema::identity_only(regions.identity_column()),
            rows: regions
                .iter()
                .map(|region| MasterRow {
                    identity: region.name.clone(),
                    values: Vec::new(),
                })
                .collect(),
        }
    }

    /// Identity-only table from raw names, rejecting repeats.
    pub fn from_identities<I, S>(identity: &str, names: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        for name in names {
            let name = name.into();
            if !seen.insert(name.clone()) {
                return Err(TableError::DuplicateIdentity(name));
            }
            rows.push(MasterRow {
                identity: name,
                values: Vec::new(),
            });
        }

        Ok(Self {
            schema: TableSchema::identity_only(identity),
            rows,
        })
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn rows(&self) -> &[MasterRow] {
        &self.rows
    }

    /// Number of region rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Region identities in row order.
    pub fn identities(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.identity.as_str()).collect()
    }

    /// Cell lookup: outer `None` if the region or column is absent.
    pub fn value(&self, identity: &str, column: &str) -> Option<Option<f64>> {
        let idx = self.schema.position_by_name(column)?;
        self.rows
            .iter()
            .find(|r| r.identity == identity)
            .map(|r| r.values[idx])
    }

    /// All values of one derived column, in row order.
    pub fn column(&self, key: &ColumnKey) -> Option<Vec<Option<f64>>> {
        let idx = self.schema.position(key)?;
        Some(self.rows.iter().map(|r| r.values[idx]).collect())
    }

    /// Join a metric-year table on region identity and absorb its column.
    ///
    /// Identity and previously merged values always come from `self`; the
    /// metric table contributes only its new column.
    pub fn merge(&self, table: &MetricYearTable, policy: JoinPolicy) -> Result<Self, TableError> {
        self.merge_with_stats(table, policy).map(|(merged, _)| merged)
    }

    /// [`merge`](Self::merge) that also reports row accounting.
    pub fn merge_with_stats(
        &self,
        table: &MetricYearTable,
        policy: JoinPolicy,
    ) -> Result<(Self, MergeStats), TableError> {
        if table.identity() != self.schema.identity() {
            return Err(TableError::IdentityMismatch {
                left: self.schema.identity().to_string(),
                right: table.identity().to_string(),
            });
        }

        let schema = self.schema.with_column(table.column().clone())?;

        let lookup: HashMap<&str, Option<f64>> = table
            .rows()
            .iter()
            .map(|(name, value)| (name.as_str(), *value))
            .collect();

        let mut stats = MergeStats::default();
        let mut rows = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            match lookup.get(row.identity.as_str()) {
                Some(value) => {
                    stats.matched += 1;
                    rows.push(row.extended(*value));
                }
                None => {
                    stats.unmatched_master += 1;
                    if policy == JoinPolicy::Left {
                        rows.push(row.extended(None));
                    }
                }
            }
        }
        stats.unmatched_metric = table.len() - stats.matched;

        let column = table.column().name();
        if stats.unmatched_master > 0 {
            match policy {
                JoinPolicy::Left => tracing::warn!(
                    "{}: {} regions missing from metric table, filled with missing values",
                    column,
                    stats.unmatched_master
                ),
                JoinPolicy::Inner => tracing::warn!(
                    "{}: {} regions missing from metric table, dropped by inner join",
                    column,
                    stats.unmatched_master
                ),
            }
        }
        if stats.unmatched_metric > 0 {
            tracing::debug!(
                "{}: {} metric rows have no matching region",
                column,
                stats.unmatched_metric
            );
        }

        Ok((Self { schema, rows }, stats))
    }
}

/// Fold state for widening the master table one metric-year table at a time.
///
/// Each [`absorb`](Self::absorb) consumes the accumulator and returns the
/// next one, so every step can be tested on its own.
#[derive(Debug, Clone)]
pub struct TableAccumulator {
    table: MasterTable,
    policy: JoinPolicy,
    merges: usize,
    rows_filled: usize,
    rows_dropped: usize,
}

impl TableAccumulator {
    pub fn new(initial: MasterTable, policy: JoinPolicy) -> Self {
        Self {
            table: initial,
            policy,
            merges: 0,
            rows_filled: 0,
            rows_dropped: 0,
        }
    }

    /// Merge one metric-year table, producing the next accumulator state.
    pub fn absorb(self, table: &MetricYearTable) -> Result<Self, TableError> {
        let (merged, stats) = self.table.merge_with_stats(table, self.policy)?;

        tracing::info!(
            "Merged {} ({} matched, {} columns, {} rows)",
            table.column(),
            stats.matched,
            merged.schema().len(),
            merged.len()
        );

        let (filled, dropped) = match self.policy {
            JoinPolicy::Left => (stats.unmatched_master, 0),
            JoinPolicy::Inner => (0, stats.unmatched_master),
        };

        Ok(Self {
            table: merged,
            policy: self.policy,
            merges: self.merges + 1,
            rows_filled: self.rows_filled + filled,
            rows_dropped: self.rows_dropped + dropped,
        })
    }

    /// Current table state.
    pub fn table(&self) -> &MasterTable {
        &self.table
    }

    pub fn policy(&self) -> JoinPolicy {
        self.policy
    }

    /// Number of tables merged so far.
    pub fn merges(&self) -> usize {
        self.merges
    }

    /// Rows given a missing value because a metric table lacked them.
    pub fn rows_filled(&self) -> usize {
        self.rows_filled
    }

    /// Rows removed by inner joins.
    pub fn rows_dropped(&self) -> usize {
        self.rows_dropped
    }

    pub fn finish(self) -> MasterTable {
        self.table
    }
}
