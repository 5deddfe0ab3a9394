//! Conversion of PostgreSQL rows to JSON objects.

use serde_json::Value;
use sql_templates::{QueryError, Row};
use sqlx::postgres::PgRow;
use sqlx::{Column, Row as _, TypeInfo};

fn decode_error(column: &str, e: sqlx::Error) -> QueryError {
    QueryError::Execution(format!("Failed to decode column {}: {}", column, e))
}

/// Every column of `row`, keyed by column name. NULLs are kept as JSON null
/// so that `Option` fields of the mapped record see them.
pub fn row_to_json(row: &PgRow) -> Result<Row, QueryError> {
    let mut object = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = extract_column_value(row, index, column.name(), column.type_info().name())?;
        object.insert(column.name().to_string(), value);
    }
    Ok(object)
}

fn extract_column_value(
    row: &PgRow,
    index: usize,
    name: &str,
    type_name: &str,
) -> Result<Value, QueryError> {
    let value = match type_name {
        "BOOL" => {
            let v: Option<bool> = row.try_get(index).map_err(|e| decode_error(name, e))?;
            v.map(Value::Bool).unwrap_or(Value::Null)
        }
        "INT2" => {
            let v: Option<i16> = row.try_get(index).map_err(|e| decode_error(name, e))?;
            v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null)
        }
        "INT4" => {
            let v: Option<i32> = row.try_get(index).map_err(|e| decode_error(name, e))?;
            v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null)
        }
        "INT8" => {
            let v: Option<i64> = row.try_get(index).map_err(|e| decode_error(name, e))?;
            v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null)
        }
        "FLOAT4" => {
            let v: Option<f32> = row.try_get(index).map_err(|e| decode_error(name, e))?;
            v.and_then(|n| serde_json::Number::from_f64(f64::from(n)).map(Value::Number))
                .unwrap_or(Value::Null)
        }
        "FLOAT8" => {
            let v: Option<f64> = row.try_get(index).map_err(|e| decode_error(name, e))?;
            v.and_then(|n| serde_json::Number::from_f64(n).map(Value::Number))
                .unwrap_or(Value::Null)
        }
        "TIMESTAMPTZ" => {
            let v: Option<chrono::DateTime<chrono::Utc>> =
                row.try_get(index).map_err(|e| decode_error(name, e))?;
            v.map(|dt| Value::String(dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)))
                .unwrap_or(Value::Null)
        }
        "TIMESTAMP" => {
            let v: Option<chrono::NaiveDateTime> =
                row.try_get(index).map_err(|e| decode_error(name, e))?;
            v.map(|dt| Value::String(dt.and_utc().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)))
                .unwrap_or(Value::Null)
        }
        "DATE" => {
            let v: Option<chrono::NaiveDate> =
                row.try_get(index).map_err(|e| decode_error(name, e))?;
            v.map(|d| Value::String(d.to_string())).unwrap_or(Value::Null)
        }
        "JSONB" | "JSON" => {
            let v: Option<Value> = row.try_get(index).map_err(|e| decode_error(name, e))?;
            v.unwrap_or(Value::Null)
        }
        "TEXT[]" | "VARCHAR[]" => {
            let v: Option<Vec<String>> = row.try_get(index).map_err(|e| decode_error(name, e))?;
            v.map(Value::from).unwrap_or(Value::Null)
        }
        "INT8[]" => {
            let v: Option<Vec<i64>> = row.try_get(index).map_err(|e| decode_error(name, e))?;
            v.map(Value::from).unwrap_or(Value::Null)
        }
        _ => {
            // VARCHAR, TEXT, CHAR, NAME and anything else decodable as text
            let v: Option<String> = row.try_get(index).map_err(|e| decode_error(name, e))?;
            v.map(Value::String).unwrap_or(Value::Null)
        }
    };

    Ok(value)
}
