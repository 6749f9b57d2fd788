//! Arrow interchange: how tables cross the workbook I/O boundary.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Float64Array, LargeStringArray, StringArray,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType as ArrowType, Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use arrow::util::display::array_value_to_string;
use chrono::{Datelike, NaiveDate};
use xlpilot_types::DataType;

use crate::{Presentation, Table, Value};

/// Days between 0001-01-01 and 1970-01-01.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

pub const PRESENTATION_METADATA_KEY: &str = "xlpilot.presentation";

fn downcast<'a, T: 'static>(array: &'a ArrayRef, expected: &str) -> Result<&'a T, ArrowError> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| ArrowError::CastError(format!("expected {expected} array")))
}

impl Table {
    /// Typed columns become typed arrays; mixed columns are exported as their display text.
    pub fn to_record_batch(&self) -> Result<RecordBatch, ArrowError> {
        let mut fields = Vec::with_capacity(self.width());
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.width());

        for (idx, name) in self.columns.iter().enumerate() {
            let (ty, array): (ArrowType, ArrayRef) = match self.column_type(idx) {
                Some(DataType::Number) => (
                    ArrowType::Float64,
                    Arc::new(self.column(idx).map(Value::number).collect::<Float64Array>()),
                ),
                Some(DataType::Boolean) => (
                    ArrowType::Boolean,
                    Arc::new(
                        self.column(idx)
                            .map(|v| match v {
                                Value::Bool(b) => Some(*b),
                                _ => None,
                            })
                            .collect::<BooleanArray>(),
                    ),
                ),
                Some(DataType::Date) => (
                    ArrowType::Date32,
                    Arc::new(
                        self.column(idx)
                            .map(|v| match v {
                                Value::Date(d) => Some(d.num_days_from_ce() - EPOCH_DAYS_FROM_CE),
                                _ => None,
                            })
                            .collect::<Date32Array>(),
                    ),
                ),
                _ => (
                    ArrowType::Utf8,
                    Arc::new(
                        self.column(idx)
                            .map(|v| if v.is_null() { None } else { Some(v.to_string()) })
                            .collect::<StringArray>(),
                    ),
                ),
            };
            fields.push(Field::new(name, ty, true));
            arrays.push(array);
        }

        let mut metadata = HashMap::new();
        if !self.presentation.is_empty() {
            let json = serde_json::to_string(&self.presentation)
                .map_err(|e| ArrowError::ExternalError(Box::new(e)))?;
            metadata.insert(PRESENTATION_METADATA_KEY.to_string(), json);
        }
        let schema = Arc::new(Schema::new(fields).with_metadata(metadata));
        let options = RecordBatchOptions::new().with_row_count(Some(self.row_count()));
        RecordBatch::try_new_with_options(schema, arrays, &options)
    }

    pub fn from_record_batch(
        name: impl Into<String>,
        batch: &RecordBatch,
    ) -> Result<Self, ArrowError> {
        let schema = batch.schema();
        let columns: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();
        let mut rows: Vec<Vec<Value>> = vec![Vec::with_capacity(columns.len()); batch.num_rows()];

        for array in batch.columns() {
            for (row, value) in rows.iter_mut().zip(column_values(array)?) {
                row.push(value);
            }
        }

        let presentation: Presentation = schema
            .metadata()
            .get(PRESENTATION_METADATA_KEY)
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default();

        Ok(Self {
            name: name.into(),
            source: None,
            columns,
            rows,
            presentation,
        })
    }
}

fn column_values(array: &ArrayRef) -> Result<Vec<Value>, ArrowError> {
    let n = array.len();
    let values = match array.data_type() {
        ArrowType::Boolean => {
            let a = downcast::<BooleanArray>(array, "boolean")?;
            (0..n)
                .map(|i| if a.is_null(i) { Value::Null } else { Value::Bool(a.value(i)) })
                .collect()
        }
        ArrowType::Date32 => {
            let a = downcast::<Date32Array>(array, "date32")?;
            (0..n)
                .map(|i| {
                    if a.is_null(i) {
                        return Value::Null;
                    }
                    NaiveDate::from_num_days_from_ce_opt(a.value(i) + EPOCH_DAYS_FROM_CE)
                        .map(Value::Date)
                        .unwrap_or(Value::Null)
                })
                .collect()
        }
        ArrowType::Utf8 => {
            let a = downcast::<StringArray>(array, "utf8")?;
            (0..n)
                .map(|i| {
                    if a.is_null(i) {
                        Value::Null
                    } else {
                        Value::Text(a.value(i).to_string())
                    }
                })
                .collect()
        }
        ArrowType::LargeUtf8 => {
            let a = downcast::<LargeStringArray>(array, "large utf8")?;
            (0..n)
                .map(|i| {
                    if a.is_null(i) {
                        Value::Null
                    } else {
                        Value::Text(a.value(i).to_string())
                    }
                })
                .collect()
        }
        ty if ty.is_numeric() => {
            let casted = cast(array, &ArrowType::Float64)?;
            let a = downcast::<Float64Array>(&casted, "float64")?;
            (0..n)
                .map(|i| {
                    if a.is_null(i) || !a.value(i).is_finite() {
                        Value::Null
                    } else {
                        Value::Number(a.value(i))
                    }
                })
                .collect()
        }
        _ => (0..n)
            .map(|i| {
                if array.is_null(i) {
                    Ok(Value::Null)
                } else {
                    array_value_to_string(array, i).map(Value::Text)
                }
            })
            .collect::<Result<Vec<_>, _>>()?,
    };
    Ok(values)
}
