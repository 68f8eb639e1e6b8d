use crate::assertion::{Assertion, Kind};
use crate::error::AppError;
use crate::value::{format_datetime, Value};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Row;
use std::collections::BTreeMap;

/// Bound parameter for `value` in a column asserted by `assertion`.
pub fn to_sql(assertion: &Assertion, value: &Value) -> Result<SqlValue, AppError> {
    if matches!(assertion.kind(), Kind::Any) && !value.is_null() {
        return Ok(SqlValue::Text(value.to_yaml_string()?));
    }
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Str(s) => SqlValue::Text(s.clone()),
        Value::DateTime(dt) => SqlValue::Text(format_datetime(dt)),
        composite => SqlValue::Text(composite.to_yaml_string()?),
    })
}

/// Typed value of a fetched column.
pub fn from_sql(assertion: &Assertion, raw: ValueRef<'_>) -> Result<Value, AppError> {
    let value = match raw {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes).map_err(|e| AppError::Serialization(format!("column text: {e}")))?;
            if matches!(assertion.kind(), Kind::Any) {
                Value::from_yaml_str(text)?
            } else {
                Value::Str(text.to_string())
            }
        }
        ValueRef::Blob(_) => return Err(AppError::Serialization("binary columns are not supported".into())),
    };
    Ok(assertion.coerce(value))
}

/// Reads `columns` (name, assertion) of `row` in order.
pub fn read_columns(row: &Row, columns: &[(String, Assertion)]) -> Result<BTreeMap<String, Value>, AppError> {
    let mut values = BTreeMap::new();
    for (i, (name, assertion)) in columns.iter().enumerate() {
        let raw = row
            .get_ref(i)
            .map_err(|source| AppError::DbQueryFailed { statement: format!("read column {name}"), source })?;
        values.insert(name.clone(), from_sql(assertion, raw)?);
    }
    Ok(values)
}
