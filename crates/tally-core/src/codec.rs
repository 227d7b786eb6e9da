//! Mapping between attribute values and stored column values.

use rust_decimal::{Decimal, RoundingStrategy};
use time::{Duration, OffsetDateTime};

use crate::{
    models::Value,
    registry::{RecordType, ValueType},
    sql::{SqlType, SqlValue},
    storage::StorageError,
};

/// Reserved prefix of system columns. Attribute names may not use it.
pub const SYSTEM_PREFIX: &str = "sys_";
pub const ID_COLUMN: &str = "sys_id";
pub const TYPE_COLUMN: &str = "sys_type";
pub const CONTAINER_COLUMN: &str = "sys_container_id";
pub const INSTANT_COLUMN: &str = "sys_instant";
pub const START_COLUMN: &str = "sys_start_time";
pub const END_COLUMN: &str = "sys_end_time";

/// Separates a subtype name from its attribute name in column names.
pub const SUBTYPE_SEPARATOR: &str = "__";

/// Fractional digits kept for decimals, which are stored as scaled integers.
pub const DECIMAL_SCALE: u32 = 6;

/// Column holding `attribute` as declared by `declaring`.
pub fn attribute_column(declaring: &RecordType, attribute: &str) -> String {
    if declaring.is_root() {
        attribute.to_string()
    } else {
        format!("{}{}{}", declaring.name, SUBTYPE_SEPARATOR, attribute)
    }
}

pub fn sql_type(value_type: &ValueType) -> SqlType {
    match value_type {
        ValueType::String => SqlType::Text,
        ValueType::Integer => SqlType::Integer,
        ValueType::Boolean => SqlType::Boolean,
        ValueType::Decimal => SqlType::BigInt,
        ValueType::Timestamp => SqlType::Timestamp,
        ValueType::Enum(_) => SqlType::SmallInt,
    }
}

pub fn encode(value_type: &ValueType, value: &Value) -> Result<SqlValue, StorageError> {
    match (value_type, value) {
        (ValueType::String, Value::String(s)) => Ok(SqlValue::Text(s.clone())),
        (ValueType::Integer, Value::Integer(i)) => Ok(SqlValue::Integer(*i)),
        (ValueType::Boolean, Value::Boolean(b)) => Ok(SqlValue::Boolean(*b)),
        (ValueType::Decimal, Value::Decimal(d)) => Ok(SqlValue::BigInt(encode_decimal(*d)?)),
        (ValueType::Timestamp, Value::Timestamp(t)) => Ok(SqlValue::Timestamp(*t)),
        (ValueType::Enum(domain), Value::Enum(v)) if domain.contains(v) => {
            Ok(SqlValue::SmallInt(v.code()))
        }
        _ => Err(StorageError::Validation(format!(
            "cannot store {} value {} as {}",
            value.kind(),
            value,
            value_type
        ))),
    }
}

/// Decodes a stored column. `None` (SQL NULL) decodes to an absent attribute.
pub fn decode(
    value_type: &ValueType,
    raw: Option<&SqlValue>,
) -> Result<Option<Value>, StorageError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value = match value_type {
        ValueType::String => match raw {
            SqlValue::Text(s) => Value::String(s.clone()),
            other => return Err(mismatch(value_type, other)),
        },
        ValueType::Integer => {
            let wide = raw.as_i64().ok_or_else(|| mismatch(value_type, raw))?;
            Value::Integer(i32::try_from(wide).map_err(|_| mismatch(value_type, raw))?)
        }
        ValueType::Boolean => match raw {
            SqlValue::Boolean(b) => Value::Boolean(*b),
            other => match other.as_i64() {
                Some(0) => Value::Boolean(false),
                Some(1) => Value::Boolean(true),
                _ => return Err(mismatch(value_type, other)),
            },
        },
        ValueType::Decimal => {
            let scaled = raw.as_i64().ok_or_else(|| mismatch(value_type, raw))?;
            Value::Decimal(decode_decimal(scaled))
        }
        ValueType::Timestamp => Value::Timestamp(decode_timestamp(raw)?),
        ValueType::Enum(domain) => {
            let wide = raw.as_i64().ok_or_else(|| mismatch(value_type, raw))?;
            let code = i16::try_from(wide).map_err(|_| mismatch(value_type, raw))?;
            Value::Enum(domain.lookup(code)?)
        }
    };
    Ok(Some(value))
}

/// Decodes a summed measure column into a decimal, treating NULL as zero.
pub fn decode_measure(
    value_type: &ValueType,
    raw: Option<&SqlValue>,
) -> Result<Decimal, StorageError> {
    let Some(raw) = raw else {
        return Ok(Decimal::ZERO);
    };
    let total = raw.as_i64().ok_or_else(|| mismatch(value_type, raw))?;
    match value_type {
        ValueType::Decimal => Ok(decode_decimal(total)),
        ValueType::Integer => Ok(Decimal::from(total)),
        other => Err(StorageError::Validation(format!(
            "{} attributes cannot be used as measures",
            other
        ))),
    }
}

fn mismatch(value_type: &ValueType, raw: &SqlValue) -> StorageError {
    StorageError::Decode(format!("column value {} is not a valid {}", raw, value_type))
}

/// Rounds half-up to [`DECIMAL_SCALE`] digits and returns the scaled integer.
pub fn encode_decimal(value: Decimal) -> Result<i64, StorageError> {
    let mut rounded =
        value.round_dp_with_strategy(DECIMAL_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(DECIMAL_SCALE);
    i64::try_from(rounded.mantissa()).map_err(|_| {
        StorageError::Validation(format!("decimal {} is out of the storable range", value))
    })
}

pub fn decode_decimal(scaled: i64) -> Decimal {
    Decimal::new(scaled, DECIMAL_SCALE)
}

/// Epoch milliseconds, the timestamp representation for backends without a native type.
pub fn timestamp_to_millis(value: OffsetDateTime) -> i64 {
    value.unix_timestamp_nanos().div_euclid(1_000_000) as i64
}

/// Floors `value` to a multiple of `precision` since the epoch, keeping its offset.
pub fn truncate_timestamp(
    value: OffsetDateTime,
    precision: Duration,
) -> Result<OffsetDateTime, StorageError> {
    let step = precision.whole_nanoseconds();
    if step <= 1 {
        return Ok(value);
    }
    let nanos = value.unix_timestamp_nanos();
    OffsetDateTime::from_unix_timestamp_nanos(nanos - nanos.rem_euclid(step))
        .map(|t| t.to_offset(value.offset()))
        .map_err(|e| StorageError::Validation(format!("timestamp {} out of range: {}", value, e)))
}

pub fn timestamp_from_millis(millis: i64) -> Result<OffsetDateTime, StorageError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .map_err(|e| StorageError::Decode(format!("timestamp {} out of range: {}", millis, e)))
}

pub fn decode_timestamp(raw: &SqlValue) -> Result<OffsetDateTime, StorageError> {
    match raw {
        SqlValue::Timestamp(t) => Ok(*t),
        other => match other.as_i64() {
            Some(millis) => timestamp_from_millis(millis),
            None => Err(StorageError::Decode(format!(
                "column value {} is not a timestamp",
                other
            ))),
        },
    }
}

/// Decodes a required system id column.
pub fn decode_id(raw: Option<&SqlValue>, column: &str) -> Result<i64, StorageError> {
    raw.and_then(SqlValue::as_i64)
        .ok_or_else(|| StorageError::Decode(format!("column {} does not hold an id", column)))
}

/// Decodes a required system timestamp column.
pub fn decode_system_timestamp(
    raw: Option<&SqlValue>,
    column: &str,
) -> Result<OffsetDateTime, StorageError> {
    match raw {
        Some(raw) => decode_timestamp(raw),
        None => Err(StorageError::Decode(format!("column {} is null", column))),
    }
}
