//! Generic tabular result for the ad hoc query runner.
//!
//! Fixed-shape reads map straight into entities; only `run_query` hands back
//! rows of dynamically-typed cells.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{Row, TypeInfo, ValueRef};

/// One dynamically-typed cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    /// Column type this runner does not decode; carries the type name.
    Unsupported(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            CellValue::Decimal(v) => Some(*v),
            CellValue::Int(v) => Some(Decimal::from(*v)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct QueryRow {
    pub values: Vec<CellValue>,
}

impl QueryRow {
    pub fn get(&self, index: usize) -> Option<&CellValue> {
        self.values.get(index)
    }
}

/// Named columns plus rows of cells, in the order the database returned them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<QueryRow>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column, matched case-insensitively.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
    }

    /// Cell at `row` for the named column.
    pub fn value(&self, row: usize, column: &str) -> Option<&CellValue> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)
    }

    /// Build the result from a statement's column names and its fetched rows.
    ///
    /// Column names come from the statement, so a query matching no rows
    /// still reports its shape.
    pub(crate) fn from_pg_rows(columns: Vec<String>, rows: &[PgRow]) -> Result<Self, sqlx::Error> {
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = Vec::with_capacity(row.len());
            for index in 0..row.len() {
                values.push(decode_cell(row, index)?);
            }
            out.push(QueryRow { values });
        }

        Ok(Self { columns, rows: out })
    }
}

fn decode_cell(row: &PgRow, index: usize) -> Result<CellValue, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(CellValue::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let value = match type_name.as_str() {
        "BOOL" => CellValue::Bool(row.try_get(index)?),
        "INT2" => CellValue::Int(row.try_get::<i16, _>(index)?.into()),
        "INT4" => CellValue::Int(row.try_get::<i32, _>(index)?.into()),
        "INT8" => CellValue::Int(row.try_get(index)?),
        "FLOAT4" => CellValue::Float(row.try_get::<f32, _>(index)?.into()),
        "FLOAT8" => CellValue::Float(row.try_get(index)?),
        "NUMERIC" => CellValue::Decimal(row.try_get(index)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => CellValue::Text(row.try_get(index)?),
        "DATE" => CellValue::Date(row.try_get(index)?),
        "TIMESTAMP" => CellValue::Timestamp(row.try_get(index)?),
        "TIMESTAMPTZ" => {
            CellValue::Timestamp(row.try_get::<DateTime<Utc>, _>(index)?.naive_utc())
        }
        _ => CellValue::Unsupported(type_name),
    };
    Ok(value)
}
