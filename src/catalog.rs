//! Declarative type catalog: enum domains and record type descriptors read from the
//! config file, turned into a [`TypeRegistry`] at startup.

use std::{collections::HashMap, sync::Arc};

use serde::Deserialize;
use tally_core::{
    EnumDomain, Numbering, RecordType, StorageError, TemporalKind, TypeRegistry, ValueType,
};

#[derive(Debug, Deserialize, Clone)]
pub struct EnumDescriptor {
    pub name: String,
    pub values: Vec<EnumMember>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnumMember {
    pub code: i16,
    pub name: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TemporalDescriptor {
    #[default]
    None,
    Instant,
    Interval,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NumberingDescriptor {
    #[default]
    Auto,
    Manual,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    String,
    Integer,
    Boolean,
    Decimal,
    Timestamp,
    Enum,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AttributeDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AttributeKind,
    #[serde(default)]
    pub required: bool,
    /// Enum domain name, for `type = "enum"`.
    pub domain: Option<String>,
}

/// A record type. Subtypes (with `parent`) take temporal kind, container and
/// numbering from their root.
#[derive(Debug, Deserialize, Clone)]
pub struct TypeDescriptor {
    pub name: String,
    #[serde(default)]
    pub temporal: TemporalDescriptor,
    pub parent: Option<String>,
    pub container: Option<String>,
    #[serde(default)]
    pub numbering: NumberingDescriptor,
    #[serde(default)]
    pub attributes: Vec<AttributeDescriptor>,
}

impl From<TemporalDescriptor> for TemporalKind {
    fn from(value: TemporalDescriptor) -> Self {
        match value {
            TemporalDescriptor::None => TemporalKind::None,
            TemporalDescriptor::Instant => TemporalKind::Instant,
            TemporalDescriptor::Interval => TemporalKind::Interval,
        }
    }
}

impl From<NumberingDescriptor> for Numbering {
    fn from(value: NumberingDescriptor) -> Self {
        match value {
            NumberingDescriptor::Auto => Numbering::AutoIncrement,
            NumberingDescriptor::Manual => Numbering::Manual,
        }
    }
}

fn value_type(
    domains: &HashMap<&str, Arc<EnumDomain>>,
    owner: &str,
    attribute: &AttributeDescriptor,
) -> Result<ValueType, StorageError> {
    Ok(match attribute.kind {
        AttributeKind::String => ValueType::String,
        AttributeKind::Integer => ValueType::Integer,
        AttributeKind::Boolean => ValueType::Boolean,
        AttributeKind::Decimal => ValueType::Decimal,
        AttributeKind::Timestamp => ValueType::Timestamp,
        AttributeKind::Enum => {
            let domain = attribute
                .domain
                .as_deref()
                .and_then(|name| domains.get(name))
                .ok_or_else(|| {
                    StorageError::Programming(format!(
                        "enum attribute {}.{} names no known domain",
                        owner, attribute.name
                    ))
                })?;
            ValueType::Enum(domain.clone())
        }
    })
}

/// Registers the descriptors in order. Parents and containers must come first.
pub fn build_registry(
    enums: &[EnumDescriptor],
    types: &[TypeDescriptor],
) -> Result<TypeRegistry, StorageError> {
    let mut domains = HashMap::new();
    for descriptor in enums {
        let domain = EnumDomain::new(
            &descriptor.name,
            descriptor.values.iter().map(|m| (m.code, m.name.as_str())),
        )?;
        domains.insert(descriptor.name.as_str(), domain);
    }

    let mut registry = TypeRegistry::new();
    for descriptor in types {
        let mut record_type = match &descriptor.parent {
            Some(parent) => RecordType::subtype(&descriptor.name, parent),
            None => {
                let mut root = RecordType::snapshot(&descriptor.name)
                    .numbering(descriptor.numbering.into());
                root.temporal_kind = descriptor.temporal.into();
                root.container = descriptor.container.clone();
                root
            }
        };
        for attribute in &descriptor.attributes {
            let value_type = value_type(&domains, &descriptor.name, attribute)?;
            record_type = if attribute.required {
                record_type.required(&attribute.name, value_type)
            } else {
                record_type.attribute(&attribute.name, value_type)
            };
        }
        registry.register(record_type)?;
    }
    Ok(registry)
}
