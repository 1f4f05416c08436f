//! Export of the master table as CSV or Parquet.

use crate::config::TableFormat;
use crate::table::MasterTable;
use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Convert the master table to a record batch.
///
/// The identity column is a non-null string column, metric columns are
/// nullable float columns in merge order.
pub fn to_record_batch(table: &MasterTable) -> Result<RecordBatch> {
    let schema = table.schema();

    let mut fields = Vec::with_capacity(schema.len());
    fields.push(Field::new(schema.identity(), DataType::Utf8, false));
    for key in schema.columns() {
        fields.push(Field::new(key.name(), DataType::Float64, true));
    }

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.len());
    columns.push(Arc::new(StringArray::from_iter_values(
        table.rows().iter().map(|r| r.identity()),
    )));
    for i in 0..schema.columns().len() {
        let values: Float64Array = table.rows().iter().map(|r| r.values()[i]).collect();
        columns.push(Arc::new(values));
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Write the master table to `path`, creating parent directories.
pub fn write_table(table: &MasterTable, path: &Path, format: TableFormat) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory {}", parent.display()))?;
        }
    }

    let batch = to_record_batch(table)?;
    let file = File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    match format {
        TableFormat::Csv => {
            let mut writer = arrow::csv::WriterBuilder::new().with_header(true).build(file);
            writer.write(&batch)?;
        }
        TableFormat::Parquet => {
            let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
            writer.write(&batch)?;
            writer.close()?;
        }
    }

    tracing::info!(
        "Exported {} rows x {} columns to {}",
        table.len(),
        table.schema().len(),
        path.display()
    );
    Ok(())
}
