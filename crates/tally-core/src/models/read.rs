use std::ops::Deref;

use rust_decimal::Decimal;
use time::OffsetDateTime;

use super::{Attributes, Value};

/// Immutable view of a stored record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Concrete (resolved) type name.
    pub record_type: String,
    pub id: i64,
    pub container_id: Option<i64>,
    pub attributes: Attributes,
}

impl Record {
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }

    pub fn string(&self, attribute: &str) -> Option<&str> {
        self.get(attribute).and_then(Value::as_str)
    }

    pub fn integer(&self, attribute: &str) -> Option<i32> {
        self.get(attribute).and_then(Value::as_integer)
    }

    pub fn boolean(&self, attribute: &str) -> Option<bool> {
        self.get(attribute).and_then(Value::as_bool)
    }

    pub fn decimal(&self, attribute: &str) -> Option<Decimal> {
        self.get(attribute).and_then(Value::as_decimal)
    }

    pub fn timestamp(&self, attribute: &str) -> Option<OffsetDateTime> {
        self.get(attribute).and_then(Value::as_timestamp)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstantRecord {
    pub record: Record,
    pub instant: OffsetDateTime,
}

impl Deref for InstantRecord {
    type Target = Record;

    fn deref(&self) -> &Record {
        &self.record
    }
}

/// A record valid over `[start, end)`.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalRecord {
    pub record: Record,
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

impl IntervalRecord {
    pub fn contains(&self, instant: OffsetDateTime) -> bool {
        self.start <= instant && instant < self.end
    }
}

impl Deref for IntervalRecord {
    type Target = Record;

    fn deref(&self) -> &Record {
        &self.record
    }
}
