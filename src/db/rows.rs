//! Conversions between snapshot JSON rows and SQL values.

use crate::error::{StoreError, StoreResult};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map, Number, Value};

pub type JsonRow = Map<String, Value>;

/// Convert a JSON scalar to a SQL value. Arrays and objects are stored as
/// their JSON text.
pub fn json_to_sql(value: &Value) -> StoreResult<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().ok_or_else(|| {
                StoreError::InvalidSnapshot(format!("number out of range: {}", n))
            })?),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(serde_json::to_string(value)?),
    })
}

pub fn sql_to_json(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Number(i.into()),
        SqlValue::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => Value::Array(b.into_iter().map(Value::from).collect()),
    }
}

/// View a snapshot row as an object.
pub fn as_object<'a>(table: &str, row: &'a Value) -> StoreResult<&'a JsonRow> {
    row.as_object().ok_or_else(|| {
        StoreError::InvalidSnapshot(format!("row in '{}' is not an object", table))
    })
}

/// Get a required string value from a JSON object.
pub fn get_string(obj: &JsonRow, key: &str) -> StoreResult<String> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| StoreError::InvalidSnapshot(format!("missing or invalid string field: {}", key)))
}

/// Get a required i64 value from a JSON object.
pub fn get_i64(obj: &JsonRow, key: &str) -> StoreResult<i64> {
    obj.get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| StoreError::InvalidSnapshot(format!("missing or invalid integer field: {}", key)))
}

/// Get an optional i64 value from a JSON object.
pub fn get_opt_i64(obj: &JsonRow, key: &str) -> Option<i64> {
    obj.get(key)
        .and_then(|v| if v.is_null() { None } else { v.as_i64() })
}

/// Insert one row built from the `columns` present in `row` plus `fixed`
/// values, and return the new rowid.
///
/// Columns absent from `row` are left out so database defaults apply.
pub fn insert_row(
    conn: &Connection,
    table: &str,
    columns: &[&str],
    row: &JsonRow,
    fixed: &[(&str, SqlValue)],
) -> StoreResult<i64> {
    let mut names: Vec<&str> = Vec::with_capacity(columns.len() + fixed.len());
    let mut values: Vec<SqlValue> = Vec::with_capacity(columns.len() + fixed.len());

    for column in columns {
        if fixed.iter().any(|(name, _)| name == column) {
            continue;
        }
        if let Some(value) = row.get(*column) {
            names.push(*column);
            values.push(json_to_sql(value)?);
        }
    }
    for (name, value) in fixed {
        names.push(*name);
        values.push(value.clone());
    }

    let sql = if names.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", table)
    } else {
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            names.join(", "),
            placeholders.join(", ")
        )
    };
    conn.execute(&sql, params_from_iter(values.iter()))?;
    Ok(conn.last_insert_rowid())
}

/// Run `sql` and return each row as a JSON object keyed by column name.
pub fn query_json_rows<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    omit: &[&str],
) -> StoreResult<Vec<Value>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let rows = stmt
        .query_map(params, |row| {
            let mut obj = Map::new();
            for (i, name) in columns.iter().enumerate() {
                if omit.contains(&name.as_str()) {
                    continue;
                }
                obj.insert(name.clone(), sql_to_json(row.get::<_, SqlValue>(i)?));
            }
            Ok(Value::Object(obj))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
