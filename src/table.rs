// src/table.rs

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Seek;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, ArrayRef, BooleanArray, Int64Array, Scalar, StringArray};
use arrow::compute;
use arrow::compute::kernels::{cmp, numeric};
use arrow::csv::{reader::Format, ReaderBuilder, WriterBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use tracing::debug;

/// Geography identifier column, present on every census aggregate table.
pub const GEOGRAPHY_CODE: &str = "GEOGRAPHY_CODE";
/// Observed count column.
pub const OBS_VALUE: &str = "OBS_VALUE";
/// Single-dimension category column used by KS/QS tables.
pub const CELL: &str = "CELL";

/// A census aggregate table held in memory as one Arrow record batch.
///
/// Tables are loaded once and never mutated; every operation either reads a
/// column or produces a new `Table`.
#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    batch: RecordBatch,
}

impl Table {
    pub fn new(name: impl Into<String>, batch: RecordBatch) -> Self {
        Self {
            name: name.into(),
            batch,
        }
    }

    /// Load a table from a headed CSV file, inferring the schema from the
    /// full file so integer code columns come back as Int64.
    pub fn from_csv(name: impl Into<String>, path: &Path) -> Result<Self> {
        let name = name.into();
        let mut file =
            File::open(path).with_context(|| format!("opening {} for table {}", path.display(), name))?;

        let format = Format::default().with_header(true);
        let (schema, _) = format
            .infer_schema(&mut file, None)
            .with_context(|| format!("inferring schema of {}", path.display()))?;
        file.rewind()?;

        let schema = Arc::new(schema);
        let reader = ReaderBuilder::new(schema.clone())
            .with_header(true)
            .build(file)
            .with_context(|| format!("reading {}", path.display()))?;
        let batches = reader
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("decoding {}", path.display()))?;
        let batch = compute::concat_batches(&schema, &batches)?;

        debug!(table = %name, rows = batch.num_rows(), path = %path.display(), "loaded");
        Ok(Self { name, batch })
    }

    /// Write as comma-separated text with a header row and a leading 0-based
    /// index column whose header cell is empty.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let n = self.batch.num_rows();
        let index: Int64Array = (0..n as i64).collect::<Vec<_>>().into();

        let mut fields: Vec<Field> = vec![Field::new("", DataType::Int64, false)];
        fields.extend(self.batch.schema().fields().iter().map(|f| f.as_ref().clone()));
        let mut columns: Vec<ArrayRef> = vec![Arc::new(index)];
        columns.extend(self.batch.columns().iter().cloned());
        let indexed = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;

        let file = File::create(path)
            .with_context(|| format!("creating output file {}", path.display()))?;
        let mut writer = WriterBuilder::new().with_header(true).build(file);
        writer
            .write(&indexed)
            .with_context(|| format!("writing table {} to {}", self.name, path.display()))?;
        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn column(&self, name: &str) -> Result<&ArrayRef> {
        self.batch
            .column_by_name(name)
            .with_context(|| format!("table {} has no column {}", self.name, name))
    }

    /// Int64 view of a column; errors if the column holds anything else.
    pub fn ints(&self, name: &str) -> Result<&Int64Array> {
        let col = self.column(name)?;
        match col.data_type() {
            DataType::Int64 => col
                .as_any()
                .downcast_ref::<Int64Array>()
                .with_context(|| format!("downcasting {}.{}", self.name, name)),
            other => bail!(
                "column {}.{} is {:?}, expected Int64",
                self.name,
                name,
                other
            ),
        }
    }

    /// Utf8 view of a column; errors if the column holds anything else.
    pub fn strings(&self, name: &str) -> Result<&StringArray> {
        let col = self.column(name)?;
        match col.data_type() {
            DataType::Utf8 => col
                .as_any()
                .downcast_ref::<StringArray>()
                .with_context(|| format!("downcasting {}.{}", self.name, name)),
            other => bail!(
                "column {}.{} is {:?}, expected Utf8",
                self.name,
                name,
                other
            ),
        }
    }

    pub fn sum(&self, col: &str) -> Result<i64> {
        Ok(compute::sum(self.ints(col)?).unwrap_or(0))
    }

    /// Sum of `col` over rows where `filter_col == value`.
    pub fn sum_where(&self, filter_col: &str, value: i64, col: &str) -> Result<i64> {
        let mask = cmp::eq(self.ints(filter_col)?, &Int64Array::new_scalar(value))?;
        let vals = compute::filter(self.column(col)?, &mask)?;
        let vals = vals
            .as_any()
            .downcast_ref::<Int64Array>()
            .with_context(|| format!("column {}.{} is not Int64", self.name, col))?;
        Ok(compute::sum(vals).unwrap_or(0))
    }

    /// Row count where `col == value`.
    pub fn count_where(&self, col: &str, value: i64) -> Result<usize> {
        let mask = cmp::eq(self.ints(col)?, &Int64Array::new_scalar(value))?;
        Ok(mask.true_count())
    }

    /// Sum of a*b over all rows.
    pub fn weighted_sum(&self, a: &str, b: &str) -> Result<i64> {
        let product = numeric::mul(self.ints(a)?, self.ints(b)?)?;
        let product = product
            .as_any()
            .downcast_ref::<Int64Array>()
            .with_context(|| format!("product of {}.{} and {}.{}", self.name, a, self.name, b))?;
        Ok(compute::sum(product).unwrap_or(0))
    }

    /// Sorted distinct values of a Utf8 column.
    pub fn distinct(&self, col: &str) -> Result<Vec<String>> {
        let arr = self.strings(col)?;
        let set: BTreeSet<String> = arr.iter().flatten().map(str::to_owned).collect();
        Ok(set.into_iter().collect())
    }

    /// Sub-table of rows where an Int64 column equals `value`.
    pub fn filter_eq(&self, col: &str, value: i64) -> Result<Table> {
        let mask = cmp::eq(self.ints(col)?, &Int64Array::new_scalar(value))?;
        self.filtered(&mask)
    }

    /// Sub-table of rows where a Utf8 column equals `value`.
    pub fn filter_eq_str(&self, col: &str, value: &str) -> Result<Table> {
        let mask = cmp::eq(self.strings(col)?, &Scalar::new(StringArray::from(vec![value])))?;
        self.filtered(&mask)
    }

    fn filtered(&self, mask: &BooleanArray) -> Result<Table> {
        let batch = compute::filter_record_batch(&self.batch, mask)?;
        Ok(Table {
            name: self.name.clone(),
            batch,
        })
    }
}
