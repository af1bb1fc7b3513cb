//! Native column value representation, aligned with the driver types the
//! ClickHouse sink understands (String, UUID, IntN/UIntN, Float32/64,
//! Bool, DateTime, Array(T)).

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    String(String),
    Uuid(Uuid),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Bool(bool),
    DateTime(DateTime<Utc>),
    Array(Vec<ColumnValue>),
}
