// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Convert extracted rows into Arrow RecordBatches

use std::sync::Arc;

use datafusion::arrow::array::{
    ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, RecordBatch, StringBuilder,
    TimestampMillisecondBuilder,
};
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use datafusion::arrow::error::ArrowError;

use crate::extract::{CellValue, ExtractedRow};
use crate::schema::{ColumnType, TableSchema};

/// Arrow type a column is stored as
pub fn arrow_type(ty: ColumnType) -> DataType {
    match ty {
        ColumnType::Text => DataType::Utf8,
        ColumnType::Integer | ColumnType::Size | ColumnType::Age => DataType::Int64,
        ColumnType::Real | ColumnType::Cpu => DataType::Float64,
        ColumnType::Bool => DataType::Boolean,
        ColumnType::Timestamp => DataType::Timestamp(TimeUnit::Millisecond, None),
    }
}

/// Arrow schema for a table. Every column is nullable.
pub fn arrow_schema(schema: &TableSchema) -> SchemaRef {
    let fields: Vec<Field> = schema
        .columns()
        .iter()
        .map(|c| Field::new(&c.name, arrow_type(c.data_type), true))
        .collect();
    Arc::new(Schema::new(fields))
}

/// Build a RecordBatch from extracted rows. Values whose variant does not
/// match the column's storage type are stored as NULL.
pub fn rows_to_record_batch(
    schema: SchemaRef,
    rows: &[ExtractedRow],
) -> Result<RecordBatch, ArrowError> {
    let columns: Vec<ArrayRef> = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(idx, field)| ColumnBuilder::new(idx, rows).build(field.data_type()))
        .collect::<Result<_, _>>()?;

    RecordBatch::try_new(schema, columns)
}

/// Builds one Arrow column from a slice of rows
struct ColumnBuilder<'a> {
    idx: usize,
    rows: &'a [ExtractedRow],
}

impl<'a> ColumnBuilder<'a> {
    fn new(idx: usize, rows: &'a [ExtractedRow]) -> Self {
        Self { idx, rows }
    }

    fn cells(&self) -> impl Iterator<Item = &'a CellValue> + '_ {
        let idx = self.idx;
        self.rows
            .iter()
            .map(move |row| row.get(idx).unwrap_or(&CellValue::Null))
    }

    fn build(&self, data_type: &DataType) -> Result<ArrayRef, ArrowError> {
        match data_type {
            DataType::Utf8 => Ok(self.build_text_array()),
            DataType::Int64 => Ok(self.build_integer_array()),
            DataType::Float64 => Ok(self.build_real_array()),
            DataType::Boolean => Ok(self.build_bool_array()),
            DataType::Timestamp(TimeUnit::Millisecond, None) => Ok(self.build_timestamp_array()),
            other => Err(ArrowError::NotYetImplemented(format!(
                "column type {} is not supported",
                other
            ))),
        }
    }

    fn build_text_array(&self) -> ArrayRef {
        // Estimate capacity from a sample to avoid reallocations
        let sample_len: usize = self
            .cells()
            .take(10)
            .map(|c| match c {
                CellValue::Text(s) => s.len(),
                _ => 0,
            })
            .sum();
        let sample = self.rows.len().min(10).max(1);
        let mut builder = StringBuilder::with_capacity(self.rows.len(), sample_len / sample * self.rows.len());

        for cell in self.cells() {
            match cell {
                CellValue::Text(s) => builder.append_value(s),
                _ => builder.append_null(),
            }
        }
        Arc::new(builder.finish())
    }

    fn build_integer_array(&self) -> ArrayRef {
        let mut builder = Int64Builder::with_capacity(self.rows.len());
        for cell in self.cells() {
            match cell {
                CellValue::Integer(i) => builder.append_value(*i),
                _ => builder.append_null(),
            }
        }
        Arc::new(builder.finish())
    }

    fn build_real_array(&self) -> ArrayRef {
        let mut builder = Float64Builder::with_capacity(self.rows.len());
        for cell in self.cells() {
            match cell {
                CellValue::Real(r) => builder.append_value(*r),
                CellValue::Integer(i) => builder.append_value(*i as f64),
                _ => builder.append_null(),
            }
        }
        Arc::new(builder.finish())
    }

    fn build_bool_array(&self) -> ArrayRef {
        let mut builder = BooleanBuilder::with_capacity(self.rows.len());
        for cell in self.cells() {
            match cell {
                CellValue::Bool(b) => builder.append_value(*b),
                _ => builder.append_null(),
            }
        }
        Arc::new(builder.finish())
    }

    fn build_timestamp_array(&self) -> ArrayRef {
        let mut builder = TimestampMillisecondBuilder::with_capacity(self.rows.len());
        for cell in self.cells() {
            match cell {
                CellValue::Timestamp(ms) => builder.append_value(*ms),
                _ => builder.append_null(),
            }
        }
        Arc::new(builder.finish())
    }
}
