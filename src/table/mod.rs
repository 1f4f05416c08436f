//! Region tables: per-year metric tables and the accumulating master table.

mod master;
mod metric_year;
mod schema;

pub use master::{JoinPolicy, MasterRow, MasterTable, MergeStats, TableAccumulator};
pub use metric_year::MetricYearTable;
pub use schema::{ColumnKey, TableSchema};

/// Errors raised while building or merging tables.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    /// A derived column with this name is already in the table
    #[error("column {0} is already present in the table")]
    DuplicateColumn(String),

    /// A derived column would shadow the identity column
    #[error("column {0} collides with the identity column")]
    ColumnCollidesWithIdentity(String),

    /// The same region identity appears twice in one table
    #[error("region {0} appears more than once")]
    DuplicateIdentity(String),

    /// The two sides of a join use different identity columns
    #[error("cannot join on {right}: master table is keyed by {left}")]
    IdentityMismatch { left: String, right: String },
}
