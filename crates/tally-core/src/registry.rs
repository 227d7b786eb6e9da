use std::{collections::HashMap, fmt::Display, sync::Arc};

use crate::{
    codec::SYSTEM_PREFIX,
    models::{Attributes, EnumDomain, Value},
    storage::StorageError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemporalKind {
    None,
    Instant,
    Interval,
}

impl Display for TemporalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemporalKind::None => write!(f, "snapshot"),
            TemporalKind::Instant => write!(f, "instant"),
            TemporalKind::Interval => write!(f, "interval"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Numbering {
    AutoIncrement,
    Manual,
}

/// Semantic type of an attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueType {
    String,
    Integer,
    Boolean,
    Decimal,
    Timestamp,
    Enum(Arc<EnumDomain>),
}

impl ValueType {
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ValueType::String, Value::String(_))
            | (ValueType::Integer, Value::Integer(_))
            | (ValueType::Boolean, Value::Boolean(_))
            | (ValueType::Decimal, Value::Decimal(_))
            | (ValueType::Timestamp, Value::Timestamp(_)) => true,
            (ValueType::Enum(domain), Value::Enum(v)) => domain.contains(v),
            _ => false,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueType::Integer | ValueType::Decimal)
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueType::String => write!(f, "string"),
            ValueType::Integer => write!(f, "integer"),
            ValueType::Boolean => write!(f, "boolean"),
            ValueType::Decimal => write!(f, "decimal"),
            ValueType::Timestamp => write!(f, "timestamp"),
            ValueType::Enum(domain) => write!(f, "enum {}", domain.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeType {
    pub name: String,
    pub value_type: ValueType,
    pub required: bool,
}

/// Descriptor of a record type.
///
/// Subtypes only declare a name, a parent and attributes; temporal kind,
/// container and numbering are taken from the root type at registration.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordType {
    pub name: String,
    pub temporal_kind: TemporalKind,
    pub parent: Option<String>,
    pub container: Option<String>,
    pub numbering: Numbering,
    pub attributes: Vec<AttributeType>,
}

impl RecordType {
    fn root(name: &str, temporal_kind: TemporalKind) -> Self {
        RecordType {
            name: name.to_string(),
            temporal_kind,
            parent: None,
            container: None,
            numbering: Numbering::AutoIncrement,
            attributes: Vec::new(),
        }
    }

    pub fn snapshot(name: &str) -> Self {
        Self::root(name, TemporalKind::None)
    }

    pub fn instant(name: &str, container: &str) -> Self {
        Self::root(name, TemporalKind::Instant).contained_by(container)
    }

    pub fn interval(name: &str, container: &str) -> Self {
        Self::root(name, TemporalKind::Interval).contained_by(container)
    }

    pub fn subtype(name: &str, parent: &str) -> Self {
        RecordType {
            parent: Some(parent.to_string()),
            ..Self::root(name, TemporalKind::None)
        }
    }

    pub fn contained_by(mut self, container: &str) -> Self {
        self.container = Some(container.to_string());
        self
    }

    pub fn numbering(mut self, numbering: Numbering) -> Self {
        self.numbering = numbering;
        self
    }

    pub fn attribute(mut self, name: &str, value_type: ValueType) -> Self {
        self.attributes.push(AttributeType {
            name: name.to_string(),
            value_type,
            required: false,
        });
        self
    }

    pub fn required(mut self, name: &str, value_type: ValueType) -> Self {
        self.attributes.push(AttributeType {
            name: name.to_string(),
            value_type,
            required: true,
        });
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn own_attribute(&self, name: &str) -> Option<&AttributeType> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// Checks the lexical rules shared by type and attribute names.
pub fn check_name(kind: &str, name: &str) -> Result<(), StorageError> {
    let problem = if name.is_empty() {
        Some("must not be empty")
    } else if !name.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
        Some("must contain only lower-case letters and underscores")
    } else if name.starts_with(SYSTEM_PREFIX) {
        Some("must not use the reserved system prefix")
    } else if name.starts_with('_') || name.ends_with('_') {
        Some("must not begin or end with an underscore")
    } else if name.contains("__") {
        Some("must not contain doubled underscores")
    } else {
        None
    };
    match problem {
        Some(problem) => Err(StorageError::Programming(format!(
            "{} name '{}' {}",
            kind, name, problem
        ))),
        None => Ok(()),
    }
}

/// Record type metadata, built once at startup and read-only afterwards.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<String, Arc<RecordType>>,
    order: Vec<String>,
}

impl TypeRegistry {
    pub fn new() -> TypeRegistry {
        TypeRegistry::default()
    }

    pub fn register(&mut self, record_type: RecordType) -> Result<(), StorageError> {
        check_name("record type", &record_type.name)?;
        if self.types.contains_key(&record_type.name) {
            return Err(StorageError::Programming(format!(
                "record type {} is already registered",
                record_type.name
            )));
        }

        let mut record_type = record_type;
        match record_type.parent.clone() {
            Some(parent) => {
                let root = self.root_of(&parent)?;
                record_type.temporal_kind = root.temporal_kind;
                record_type.container = root.container.clone();
                record_type.numbering = root.numbering;
            }
            None => self.check_root(&record_type)?,
        }
        self.check_attributes(&record_type)?;

        tracing::debug!(record_type = %record_type.name, kind = %record_type.temporal_kind, "registered record type");
        self.order.push(record_type.name.clone());
        self.types
            .insert(record_type.name.clone(), Arc::new(record_type));
        Ok(())
    }

    fn check_root(&self, record_type: &RecordType) -> Result<(), StorageError> {
        match (record_type.temporal_kind, &record_type.container) {
            (TemporalKind::None, Some(_)) => {
                return Err(StorageError::Programming(format!(
                    "snapshot type {} cannot declare a container",
                    record_type.name
                )))
            }
            (TemporalKind::Instant | TemporalKind::Interval, None) => {
                return Err(StorageError::Programming(format!(
                    "{} type {} must declare a container",
                    record_type.temporal_kind, record_type.name
                )))
            }
            (_, Some(container)) => {
                self.get(container)?;
            }
            (TemporalKind::None, None) => {}
        }
        if record_type.temporal_kind != TemporalKind::None
            && record_type.numbering != Numbering::AutoIncrement
        {
            return Err(StorageError::Programming(format!(
                "{} type {} must use auto-increment numbering",
                record_type.temporal_kind, record_type.name
            )));
        }
        Ok(())
    }

    fn check_attributes(&self, record_type: &RecordType) -> Result<(), StorageError> {
        for (index, attribute) in record_type.attributes.iter().enumerate() {
            check_name("attribute", &attribute.name)?;
            let repeated = record_type.attributes[..index]
                .iter()
                .any(|a| a.name == attribute.name);
            let inherited = match &record_type.parent {
                Some(parent) => self.find_attribute(parent, &attribute.name)?.is_some(),
                None => false,
            };
            if repeated || inherited {
                return Err(StorageError::Programming(format!(
                    "attribute {} is declared more than once in the hierarchy of {}",
                    attribute.name, record_type.name
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Arc<RecordType>, StorageError> {
        self.types.get(name).ok_or_else(|| {
            StorageError::Programming(format!("record type {} is not registered", name))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// All types in registration order.
    pub fn types(&self) -> impl Iterator<Item = &Arc<RecordType>> {
        self.order.iter().filter_map(|name| self.types.get(name))
    }

    /// The type itself followed by its ancestors, ending at the root.
    pub fn ancestry(&self, name: &str) -> Result<Vec<&Arc<RecordType>>, StorageError> {
        let mut current = self.get(name)?;
        let mut chain = vec![current];
        while let Some(parent) = &current.parent {
            current = self.get(parent)?;
            chain.push(current);
        }
        Ok(chain)
    }

    pub fn root_of(&self, name: &str) -> Result<&Arc<RecordType>, StorageError> {
        let chain = self.ancestry(name)?;
        chain
            .last()
            .copied()
            .ok_or_else(|| StorageError::Programming(format!("record type {} has no root", name)))
    }

    /// True when `name` is `ancestor` or one of its descendants.
    pub fn is_assignable(&self, name: &str, ancestor: &str) -> bool {
        match self.ancestry(name) {
            Ok(chain) => chain.iter().any(|t| t.name == ancestor),
            Err(_) => false,
        }
    }

    /// The type and all of its registered descendants, in registration order.
    pub fn assignable_types(&self, name: &str) -> Result<Vec<&Arc<RecordType>>, StorageError> {
        self.get(name)?;
        Ok(self
            .types()
            .filter(|t| self.is_assignable(&t.name, name))
            .collect())
    }

    /// Finds an attribute on the type or its ancestors, with the type declaring it.
    pub fn find_attribute(
        &self,
        type_name: &str,
        attribute: &str,
    ) -> Result<Option<(&Arc<RecordType>, &AttributeType)>, StorageError> {
        Ok(self
            .ancestry(type_name)?
            .into_iter()
            .find_map(|t| t.own_attribute(attribute).map(|a| (t, a))))
    }

    /// Own and inherited attributes, root attributes first.
    pub fn all_attributes(
        &self,
        type_name: &str,
    ) -> Result<Vec<(&Arc<RecordType>, &AttributeType)>, StorageError> {
        let mut attributes = Vec::new();
        for record_type in self.ancestry(type_name)?.into_iter().rev() {
            attributes.extend(record_type.attributes.iter().map(|a| (record_type, a)));
        }
        Ok(attributes)
    }

    pub fn validate_attributes(
        &self,
        type_name: &str,
        attributes: &Attributes,
        is_create: bool,
    ) -> Result<(), StorageError> {
        for (name, value) in attributes {
            let (_, attribute) = self.find_attribute(type_name, name)?.ok_or_else(|| {
                StorageError::Validation(format!(
                    "attribute {} is not defined for {}",
                    name, type_name
                ))
            })?;
            if !attribute.value_type.accepts(value) {
                return Err(StorageError::Validation(format!(
                    "attribute {} of {} expects {}, got {} ({})",
                    name,
                    type_name,
                    attribute.value_type,
                    value.kind(),
                    value
                )));
            }
        }
        if is_create {
            for (_, attribute) in self.all_attributes(type_name)? {
                if attribute.required && !attributes.contains_key(&attribute.name) {
                    return Err(StorageError::Validation(format!(
                        "required attribute {} of {} is missing",
                        attribute.name, type_name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resolves the concrete type of a stored row from its discriminator.
    ///
    /// An absent or unregistered discriminator falls back to `requested`. A
    /// registered discriminator outside the subtree of `requested` is a decode error.
    pub fn resolve_type(
        &self,
        discriminator: Option<&str>,
        requested: &str,
    ) -> Result<&Arc<RecordType>, StorageError> {
        let fallback = self.get(requested)?;
        match discriminator.and_then(|name| self.types.get(name)) {
            Some(concrete) if self.is_assignable(&concrete.name, requested) => Ok(concrete),
            Some(concrete) => Err(StorageError::Decode(format!(
                "stored type {} is not a {}",
                concrete.name, requested
            ))),
            None => Ok(fallback),
        }
    }
}
