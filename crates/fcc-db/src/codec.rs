//! Column decoding helpers shared by the table modules.

use crate::error::{DatabaseError, Result};
use fcc_core::Timestamp;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub(crate) fn timestamp(row: &SqliteRow, column: &str) -> Result<Timestamp> {
    let raw: String = row.try_get(column)?;
    Ok(Timestamp::from_rfc3339(&raw)?)
}

pub(crate) fn optional_timestamp(row: &SqliteRow, column: &str) -> Result<Option<Timestamp>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| Timestamp::from_rfc3339(&s).map_err(DatabaseError::from))
        .transpose()
}

pub(crate) fn count(row: &SqliteRow, column: &str) -> Result<u32> {
    let raw: i64 = row.try_get(column)?;
    u32::try_from(raw)
        .map_err(|_| DatabaseError::Decode(format!("column '{column}' out of range: {raw}")))
}

pub(crate) fn flag(row: &SqliteRow, column: &str) -> Result<bool> {
    let raw: i64 = row.try_get(column)?;
    Ok(raw != 0)
}

pub(crate) fn json<T: serde::de::DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T> {
    let raw: String = row.try_get(column)?;
    serde_json::from_str(&raw)
        .map_err(|e| DatabaseError::Decode(format!("column '{column}' holds invalid JSON: {e}")))
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
