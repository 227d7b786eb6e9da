use crate::{
    codec::{self, CONTAINER_COLUMN, END_COLUMN, ID_COLUMN, INSTANT_COLUMN, START_COLUMN, TYPE_COLUMN},
    registry::{RecordType, TemporalKind, TypeRegistry},
    search::{SearchTerm, TimeColumn},
    sql::{SqlValue, StatementBuilder},
    storage::StorageError,
};

/// Restricts a query on a root table to `record_type` and its subtypes.
pub(crate) fn push_type_filter(
    builder: &mut StatementBuilder<'_>,
    registry: &TypeRegistry,
    record_type: &RecordType,
) -> Result<(), StorageError> {
    if record_type.is_root() {
        return Ok(());
    }
    let names = registry
        .assignable_types(&record_type.name)?
        .into_iter()
        .map(|t| SqlValue::Text(t.name.clone()));
    builder
        .and_where()
        .identifier(TYPE_COLUMN)
        .sql(" IN (")
        .bind_list(names)
        .sql(")");
    Ok(())
}

/// Appends each term as a conjunct of the WHERE clause.
pub(crate) fn push_terms(
    builder: &mut StatementBuilder<'_>,
    registry: &TypeRegistry,
    record_type: &RecordType,
    terms: &[SearchTerm],
) -> Result<(), StorageError> {
    for term in terms {
        builder.and_where();
        push_term(builder, registry, record_type, term)?;
    }
    Ok(())
}

fn time_column(record_type: &RecordType, column: TimeColumn) -> Result<&'static str, StorageError> {
    match (record_type.temporal_kind, column) {
        (TemporalKind::Instant, TimeColumn::Instant) => Ok(INSTANT_COLUMN),
        (TemporalKind::Interval, TimeColumn::Start) => Ok(START_COLUMN),
        (TemporalKind::Interval, TimeColumn::End) => Ok(END_COLUMN),
        (kind, column) => Err(StorageError::Validation(format!(
            "{} type {} has no {:?} time column",
            kind, record_type.name, column
        ))),
    }
}

fn push_term(
    builder: &mut StatementBuilder<'_>,
    registry: &TypeRegistry,
    record_type: &RecordType,
    term: &SearchTerm,
) -> Result<(), StorageError> {
    match term {
        SearchTerm::Attribute { name, operator, value } => {
            let (declaring, attribute) = registry
                .find_attribute(&record_type.name, name)?
                .ok_or_else(|| {
                    StorageError::Validation(format!(
                        "cannot search {} by unknown attribute {}",
                        record_type.name, name
                    ))
                })?;
            let encoded = codec::encode(&attribute.value_type, value)?;
            builder
                .identifier(&codec::attribute_column(declaring, name))
                .sql(" ")
                .sql(operator.sql())
                .sql(" ")
                .bind(encoded);
        }
        SearchTerm::Id(id) => {
            builder.identifier(ID_COLUMN).sql(" = ").bind(SqlValue::BigInt(*id));
        }
        SearchTerm::Container(id) => {
            if record_type.container.is_none() {
                return Err(StorageError::Validation(format!(
                    "{} records have no container",
                    record_type.name
                )));
            }
            builder
                .identifier(CONTAINER_COLUMN)
                .sql(" = ")
                .bind(SqlValue::BigInt(*id));
        }
        SearchTerm::Time { column, operator, instant } => {
            builder
                .identifier(time_column(record_type, *column)?)
                .sql(" ")
                .sql(operator.sql())
                .sql(" ")
                .bind(SqlValue::Timestamp(*instant));
        }
        SearchTerm::And(terms) => push_group(builder, registry, record_type, terms, " AND ", "1 = 1")?,
        SearchTerm::Or(terms) => push_group(builder, registry, record_type, terms, " OR ", "1 = 0")?,
    }
    Ok(())
}

fn push_group(
    builder: &mut StatementBuilder<'_>,
    registry: &TypeRegistry,
    record_type: &RecordType,
    terms: &[SearchTerm],
    separator: &str,
    empty: &str,
) -> Result<(), StorageError> {
    if terms.is_empty() {
        builder.sql(empty);
        return Ok(());
    }
    builder.sql("(");
    for (index, term) in terms.iter().enumerate() {
        if index > 0 {
            builder.sql(separator);
        }
        push_term(builder, registry, record_type, term)?;
    }
    builder.sql(")");
    Ok(())
}
