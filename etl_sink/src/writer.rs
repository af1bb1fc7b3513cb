//! Batch INSERT execution against ClickHouse, with bounded retry and
//! exponential backoff, grounded on the teacher's `write_batch` /
//! `ensure_table_exists` retry shape.

use std::time::Duration;

use etl_core::ColumnValue;
use tracing::{error, warn};

use crate::error::{Result, SinkError};
use crate::pool::ChPool;
use crate::validate::validate_identifier;

fn format_value(value: &ColumnValue) -> String {
    match value {
        ColumnValue::String(s) => format!("'{}'", escape(s)),
        ColumnValue::Uuid(u) => format!("'{u}'"),
        ColumnValue::Int8(n) => n.to_string(),
        ColumnValue::Int16(n) => n.to_string(),
        ColumnValue::Int32(n) => n.to_string(),
        ColumnValue::Int64(n) => n.to_string(),
        ColumnValue::UInt8(n) => n.to_string(),
        ColumnValue::UInt16(n) => n.to_string(),
        ColumnValue::UInt32(n) => n.to_string(),
        ColumnValue::UInt64(n) => n.to_string(),
        ColumnValue::Float32(n) => n.to_string(),
        ColumnValue::Float64(n) => n.to_string(),
        ColumnValue::Bool(b) => if *b { "1".to_string() } else { "0".to_string() },
        ColumnValue::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S")),
        ColumnValue::Array(items) => {
            let inner: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", inner.join(", "))
        }
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

fn build_insert_sql(table: &str, columns: &[String], rows: &[Vec<ColumnValue>]) -> Result<String> {
    validate_identifier(table)?;
    for c in columns {
        validate_identifier(c)?;
    }
    let column_list = columns.join(", ");
    let value_rows: Vec<String> = rows
        .iter()
        .map(|row| {
            let rendered: Vec<String> = row.iter().map(format_value).collect();
            format!("({})", rendered.join(", "))
        })
        .collect();
    Ok(format!(
        "INSERT INTO {table} ({column_list}) VALUES {}",
        value_rows.join(", ")
    ))
}

/// Writes `rows` to `table` with bounded retry and exponential backoff.
/// Returns once the insert has succeeded; the caller routes the whole
/// batch to the DLQ if this returns an error after retries are spent.
pub async fn write_batch(
    pool: &ChPool,
    table: &str,
    columns: &[String],
    rows: &[Vec<ColumnValue>],
    max_retries: u32,
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let sql = build_insert_sql(table, columns, rows)?;

    let mut attempt = 0;
    loop {
        let outcome = async {
            let client = pool.get_handle().await?;
            let result = client.query(&sql).execute().await;
            pool.return_handle(client).await;
            result.map_err(|e| SinkError::ClickHouse(e.to_string()))
        }
        .await;

        match outcome {
            Ok(()) => return Ok(()),
            Err(e) if attempt < max_retries => {
                attempt += 1;
                let backoff = Duration::from_millis(100 * 2u64.pow(attempt - 1));
                warn!(attempt, error = %e, "clickhouse batch write failed, retrying after backoff");
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                error!(rows = rows.len(), table, error = %e, "clickhouse batch write exhausted retries");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl_core::ColumnValue;

    #[test]
    fn builds_insert_with_escaped_string() {
        let sql = build_insert_sql(
            "events",
            &["id".to_string(), "name".to_string()],
            &[vec![ColumnValue::UInt32(1), ColumnValue::String("O'Brien".to_string())]],
        )
        .unwrap();
        assert_eq!(sql, "INSERT INTO events (id, name) VALUES (1, 'O\\'Brien')");
    }

    #[test]
    fn rejects_malicious_table_name() {
        let err = build_insert_sql("events; DROP TABLE x", &["id".to_string()], &[vec![ColumnValue::UInt8(1)]]);
        assert!(err.is_err());
    }

    #[test]
    fn multiple_rows_joined() {
        let sql = build_insert_sql(
            "events",
            &["id".to_string()],
            &[vec![ColumnValue::UInt8(1)], vec![ColumnValue::UInt8(2)]],
        )
        .unwrap();
        assert_eq!(sql, "INSERT INTO events (id) VALUES (1), (2)");
    }
}
