use std::{collections::BTreeMap, fmt::Display, sync::Arc};

use rust_decimal::Decimal;
use time::OffsetDateTime;

use crate::storage::StorageError;

pub mod read;

/// Attribute values keyed by attribute name. Absent keys are null.
pub type Attributes = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    String(String),
    Integer(i32),
    Boolean(bool),
    Decimal(Decimal),
    Timestamp(OffsetDateTime),
    Enum(EnumValue),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Boolean(_) => "boolean",
            Value::Decimal(_) => "decimal",
            Value::Timestamp(_) => "timestamp",
            Value::Enum(_) => "enum",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i32> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<OffsetDateTime> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumValue> {
        match self {
            Value::Enum(e) => Some(e),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Timestamp(t) => write!(f, "{}", t),
            Value::Enum(e) => write!(f, "{}", e),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Decimal(value)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(value: OffsetDateTime) -> Self {
        Value::Timestamp(value)
    }
}

impl From<EnumValue> for Value {
    fn from(value: EnumValue) -> Self {
        Value::Enum(value)
    }
}

/// A member of an [`EnumDomain`], identified by its stored code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumValue {
    domain: Arc<str>,
    code: i16,
    name: Arc<str>,
}

impl EnumValue {
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn code(&self) -> i16 {
        self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Display for EnumValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A finite set of values stored as small integer codes.
///
/// Codes and names are both unique, so the mapping back from a stored code is injective.
#[derive(Debug, PartialEq, Eq)]
pub struct EnumDomain {
    name: Arc<str>,
    members: Vec<EnumValue>,
}

impl EnumDomain {
    pub fn new<'m>(
        name: &str,
        members: impl IntoIterator<Item = (i16, &'m str)>,
    ) -> Result<Arc<Self>, StorageError> {
        let domain: Arc<str> = Arc::from(name);
        let mut values: Vec<EnumValue> = Vec::new();
        for (code, member) in members {
            if values.iter().any(|v| v.code == code || &*v.name == member) {
                return Err(StorageError::Programming(format!(
                    "enum domain {} repeats code {} or name {}",
                    name, code, member
                )));
            }
            values.push(EnumValue {
                domain: domain.clone(),
                code,
                name: Arc::from(member),
            });
        }
        if values.is_empty() {
            return Err(StorageError::Programming(format!(
                "enum domain {} has no members",
                name
            )));
        }
        Ok(Arc::new(EnumDomain {
            name: domain,
            members: values,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[EnumValue] {
        &self.members
    }

    pub fn value(&self, name: &str) -> Option<EnumValue> {
        self.members.iter().find(|v| &*v.name == name).cloned()
    }

    /// Maps a stored code back to its value. Unknown codes are a decode error.
    pub fn lookup(&self, code: i16) -> Result<EnumValue, StorageError> {
        self.members
            .iter()
            .find(|v| v.code == code)
            .cloned()
            .ok_or_else(|| {
                StorageError::Decode(format!("unknown code {} for enum {}", code, self.name))
            })
    }

    pub fn contains(&self, value: &EnumValue) -> bool {
        *value.domain == *self.name && self.members.iter().any(|v| v.code == value.code)
    }
}
