use std::sync::Arc;

use time::OffsetDateTime;

use crate::{
    codec::{
        self, CONTAINER_COLUMN, END_COLUMN, ID_COLUMN, INSTANT_COLUMN, START_COLUMN, TYPE_COLUMN,
    },
    models::{
        read::{InstantRecord, IntervalRecord, Record},
        Attributes, Value,
    },
    registry::{Numbering, RecordType, TemporalKind, TypeRegistry},
    report::{Report, ReportBuilder, ReportQuery},
    search::SearchTerm,
    sql::{Row, SqlValue, Statement, StatementBuilder},
    storage::{Connection, StorageError},
    timeline::{self, TimelineEdit, TimelineEntry},
};

use super::query::{push_terms, push_type_filter};

/// Attributes carried by a timeline entry, with the concrete type that owns them.
#[derive(Debug, Clone)]
struct Payload {
    record_type: String,
    attributes: Attributes,
}

/// Store operations over a single connection.
pub(crate) struct Operations<'r> {
    registry: &'r TypeRegistry,
}

impl<'r> Operations<'r> {
    pub(crate) fn new(registry: &'r TypeRegistry) -> Self {
        Operations { registry }
    }

    fn typed(
        &self,
        type_name: &str,
        kind: TemporalKind,
    ) -> Result<(&'r Arc<RecordType>, &'r Arc<RecordType>), StorageError> {
        let record_type = self.registry.get(type_name)?;
        if record_type.temporal_kind != kind {
            return Err(StorageError::Programming(format!(
                "{} is a {} type, not {}",
                type_name, record_type.temporal_kind, kind
            )));
        }
        Ok((record_type, self.registry.root_of(type_name)?))
    }

    /// Column assignments for `attributes` of `type_name`, in attribute name order.
    fn columns(
        &self,
        type_name: &str,
        attributes: &Attributes,
    ) -> Result<Vec<(String, SqlValue)>, StorageError> {
        let mut columns = Vec::with_capacity(attributes.len());
        for (name, value) in attributes {
            let (declaring, attribute) =
                self.registry.find_attribute(type_name, name)?.ok_or_else(|| {
                    StorageError::Validation(format!(
                        "attribute {} is not defined for {}",
                        name, type_name
                    ))
                })?;
            columns.push((
                codec::attribute_column(declaring, name),
                codec::encode(&attribute.value_type, value)?,
            ));
        }
        Ok(columns)
    }

    fn insert_statement(
        connection: &dyn Connection,
        table: &str,
        columns: &[(String, SqlValue)],
    ) -> Statement {
        let mut builder = StatementBuilder::new(connection.dialect());
        builder
            .sql("INSERT INTO ")
            .identifier(table)
            .sql(" (")
            .identifiers(columns.iter().map(|(name, _)| name.as_str()))
            .sql(") VALUES (")
            .bind_list(columns.iter().map(|(_, value)| value.clone()))
            .sql(")");
        builder.build()
    }

    fn decode_record(&self, requested: &RecordType, row: &Row) -> Result<Record, StorageError> {
        let id = codec::decode_id(row.get(ID_COLUMN), ID_COLUMN)?;
        let discriminator = match row.get(TYPE_COLUMN) {
            Some(SqlValue::Text(name)) => Some(name.as_str()),
            _ => None,
        };
        let concrete = self.registry.resolve_type(discriminator, &requested.name)?;
        let container_id = match concrete.container {
            Some(_) => Some(codec::decode_id(row.get(CONTAINER_COLUMN), CONTAINER_COLUMN)?),
            None => None,
        };
        let mut attributes = Attributes::new();
        for (declaring, attribute) in self.registry.all_attributes(&concrete.name)? {
            let column = codec::attribute_column(declaring, &attribute.name);
            if let Some(value) = codec::decode(&attribute.value_type, row.get(&column))? {
                attributes.insert(attribute.name.clone(), value);
            }
        }
        Ok(Record {
            record_type: concrete.name.clone(),
            id,
            container_id,
            attributes,
        })
    }

    fn decode_instant(
        &self,
        requested: &RecordType,
        row: &Row,
    ) -> Result<InstantRecord, StorageError> {
        Ok(InstantRecord {
            record: self.decode_record(requested, row)?,
            instant: codec::decode_system_timestamp(row.get(INSTANT_COLUMN), INSTANT_COLUMN)?,
        })
    }

    fn decode_interval(
        &self,
        requested: &RecordType,
        row: &Row,
    ) -> Result<IntervalRecord, StorageError> {
        Ok(IntervalRecord {
            record: self.decode_record(requested, row)?,
            start: codec::decode_system_timestamp(row.get(START_COLUMN), START_COLUMN)?,
            end: codec::decode_system_timestamp(row.get(END_COLUMN), END_COLUMN)?,
        })
    }

    /// `SELECT * FROM <root>` restricted to `record_type`, ready for more conjuncts.
    fn select<'d>(
        &self,
        connection: &'d dyn Connection,
        record_type: &RecordType,
        root: &RecordType,
    ) -> Result<StatementBuilder<'d>, StorageError> {
        let mut builder = StatementBuilder::new(connection.dialect());
        builder.sql("SELECT * FROM ").identifier(&root.name);
        push_type_filter(&mut builder, self.registry, record_type)?;
        Ok(builder)
    }

    /// Floors `instant` to what the backend can store.
    fn stored_instant(
        connection: &dyn Connection,
        instant: OffsetDateTime,
    ) -> Result<OffsetDateTime, StorageError> {
        codec::truncate_timestamp(instant, connection.dialect().timestamp_precision())
    }

    /// `attributes` with every timestamp floored to the backend precision.
    fn stored_attributes(
        connection: &dyn Connection,
        attributes: &Attributes,
    ) -> Result<Attributes, StorageError> {
        attributes
            .iter()
            .map(|(name, value)| -> Result<(String, Value), StorageError> {
                let value = match value {
                    Value::Timestamp(t) => Value::Timestamp(Self::stored_instant(connection, *t)?),
                    other => other.clone(),
                };
                Ok((name.clone(), value))
            })
            .collect()
    }

    fn select_by_id(
        &self,
        connection: &mut dyn Connection,
        record_type: &RecordType,
        root: &RecordType,
        id: i64,
    ) -> Result<Row, StorageError> {
        let mut builder = self.select(connection, record_type, root)?;
        builder.and_where().identifier(ID_COLUMN).sql(" = ").bind(SqlValue::BigInt(id));
        let statement = builder.build();
        connection
            .query(&statement)?
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::NotFound {
                record_type: record_type.name.clone(),
                id,
            })
    }

    pub(crate) fn create(
        &self,
        connection: &mut dyn Connection,
        type_name: &str,
        id: Option<i64>,
        attributes: &Attributes,
    ) -> Result<Record, StorageError> {
        let (record_type, root) = self.typed(type_name, TemporalKind::None)?;
        match (record_type.numbering, id) {
            (Numbering::AutoIncrement, Some(_)) => {
                return Err(StorageError::Programming(format!(
                    "{} ids are generated and cannot be supplied",
                    type_name
                )))
            }
            (Numbering::Manual, None) => {
                return Err(StorageError::Programming(format!(
                    "{} ids must be supplied by the caller",
                    type_name
                )))
            }
            _ => {}
        }
        let attributes = &Self::stored_attributes(connection, attributes)?;
        self.registry.validate_attributes(type_name, attributes, true)?;

        let mut columns = vec![(TYPE_COLUMN.to_string(), SqlValue::Text(type_name.to_string()))];
        if let Some(id) = id {
            columns.push((ID_COLUMN.to_string(), SqlValue::BigInt(id)));
        }
        columns.extend(self.columns(type_name, attributes)?);
        let statement = Self::insert_statement(connection, &root.name, &columns);
        let id = match id {
            Some(id) => {
                connection.execute(&statement)?;
                id
            }
            None => connection.insert(&statement)?,
        };
        metrics::increment_counter!("tally_records_written_total", "operation" => "create");
        tracing::debug!(record_type = type_name, id, "created record");
        self.get(connection, type_name, id)
    }

    pub(crate) fn get(
        &self,
        connection: &mut dyn Connection,
        type_name: &str,
        id: i64,
    ) -> Result<Record, StorageError> {
        let record_type = self.registry.get(type_name)?;
        let root = self.registry.root_of(type_name)?;
        let row = self.select_by_id(connection, record_type, root, id)?;
        self.decode_record(record_type, &row)
    }

    pub(crate) fn update(
        &self,
        connection: &mut dyn Connection,
        record: &Record,
        attributes: &Attributes,
    ) -> Result<Record, StorageError> {
        let (record_type, root) = self.typed(&record.record_type, TemporalKind::None)?;
        let attributes = &Self::stored_attributes(connection, attributes)?;
        self.registry
            .validate_attributes(&record.record_type, attributes, false)?;
        if !attributes.is_empty() {
            let columns = self.columns(&record.record_type, attributes)?;
            let mut builder = StatementBuilder::new(connection.dialect());
            builder.sql("UPDATE ").identifier(&root.name).sql(" SET ");
            for (index, (column, value)) in columns.into_iter().enumerate() {
                if index > 0 {
                    builder.sql(", ");
                }
                builder.identifier(&column).sql(" = ").bind(value);
            }
            builder
                .and_where()
                .identifier(ID_COLUMN)
                .sql(" = ")
                .bind(SqlValue::BigInt(record.id));
            push_type_filter(&mut builder, self.registry, record_type)?;
            let statement = builder.build();
            if connection.execute(&statement)? == 0 {
                return Err(StorageError::NotFound {
                    record_type: record.record_type.clone(),
                    id: record.id,
                });
            }
            metrics::increment_counter!("tally_records_written_total", "operation" => "update");
        }
        self.get(connection, &record.record_type, record.id)
    }

    pub(crate) fn find(
        &self,
        connection: &mut dyn Connection,
        type_name: &str,
        terms: &[SearchTerm],
    ) -> Result<Vec<Record>, StorageError> {
        let record_type = self.registry.get(type_name)?;
        let root = self.registry.root_of(type_name)?;
        let mut builder = self.select(connection, record_type, root)?;
        push_terms(&mut builder, self.registry, record_type, terms)?;
        builder.sql(" ORDER BY ").identifier(ID_COLUMN);
        let statement = builder.build();
        connection
            .query(&statement)?
            .iter()
            .map(|row| self.decode_record(record_type, row))
            .collect()
    }

    fn instant_row(
        type_name: &str,
        container_id: i64,
        instant: OffsetDateTime,
    ) -> Vec<(String, SqlValue)> {
        vec![
            (TYPE_COLUMN.to_string(), SqlValue::Text(type_name.to_string())),
            (CONTAINER_COLUMN.to_string(), SqlValue::BigInt(container_id)),
            (INSTANT_COLUMN.to_string(), SqlValue::Timestamp(instant)),
        ]
    }

    pub(crate) fn insert_instant(
        &self,
        connection: &mut dyn Connection,
        container_id: i64,
        type_name: &str,
        instant: OffsetDateTime,
        attributes: &Attributes,
    ) -> Result<i64, StorageError> {
        let (_, root) = self.typed(type_name, TemporalKind::Instant)?;
        let instant = Self::stored_instant(connection, instant)?;
        let attributes = &Self::stored_attributes(connection, attributes)?;
        self.registry.validate_attributes(type_name, attributes, true)?;

        let mut columns = Self::instant_row(type_name, container_id, instant);
        columns.extend(self.columns(type_name, attributes)?);
        let statement = Self::insert_statement(connection, &root.name, &columns);
        let id = connection.insert(&statement)?;
        metrics::increment_counter!("tally_records_written_total", "operation" => "insert_instant");
        tracing::debug!(record_type = type_name, container_id, id, "inserted instant record");
        Ok(id)
    }

    pub(crate) fn get_instant(
        &self,
        connection: &mut dyn Connection,
        type_name: &str,
        id: i64,
    ) -> Result<InstantRecord, StorageError> {
        let (record_type, root) = self.typed(type_name, TemporalKind::Instant)?;
        let row = self.select_by_id(connection, record_type, root, id)?;
        self.decode_instant(record_type, &row)
    }

    pub(crate) fn update_instant(
        &self,
        connection: &mut dyn Connection,
        container_id: i64,
        type_name: &str,
        id: i64,
        instant: OffsetDateTime,
        attributes: &Attributes,
    ) -> Result<InstantRecord, StorageError> {
        let (record_type, root) = self.typed(type_name, TemporalKind::Instant)?;
        let instant = Self::stored_instant(connection, instant)?;
        let attributes = &Self::stored_attributes(connection, attributes)?;
        self.registry.validate_attributes(type_name, attributes, false)?;

        let mut columns = vec![(INSTANT_COLUMN.to_string(), SqlValue::Timestamp(instant))];
        columns.extend(self.columns(type_name, attributes)?);
        let mut builder = StatementBuilder::new(connection.dialect());
        builder.sql("UPDATE ").identifier(&root.name).sql(" SET ");
        for (index, (column, value)) in columns.into_iter().enumerate() {
            if index > 0 {
                builder.sql(", ");
            }
            builder.identifier(&column).sql(" = ").bind(value);
        }
        builder
            .and_where()
            .identifier(ID_COLUMN)
            .sql(" = ")
            .bind(SqlValue::BigInt(id))
            .and_where()
            .identifier(CONTAINER_COLUMN)
            .sql(" = ")
            .bind(SqlValue::BigInt(container_id));
        push_type_filter(&mut builder, self.registry, record_type)?;
        let statement = builder.build();
        if connection.execute(&statement)? == 0 {
            return Err(StorageError::NotFound {
                record_type: type_name.to_string(),
                id,
            });
        }
        metrics::increment_counter!("tally_records_written_total", "operation" => "update_instant");
        self.get_instant(connection, type_name, id)
    }

    pub(crate) fn delete_instants(
        &self,
        connection: &mut dyn Connection,
        container_id: i64,
        type_name: &str,
        terms: &[SearchTerm],
    ) -> Result<u64, StorageError> {
        let (record_type, root) = self.typed(type_name, TemporalKind::Instant)?;
        let mut builder = StatementBuilder::new(connection.dialect());
        builder
            .sql("DELETE FROM ")
            .identifier(&root.name)
            .and_where()
            .identifier(CONTAINER_COLUMN)
            .sql(" = ")
            .bind(SqlValue::BigInt(container_id));
        push_type_filter(&mut builder, self.registry, record_type)?;
        push_terms(&mut builder, self.registry, record_type, terms)?;
        let statement = builder.build();
        let deleted = connection.execute(&statement)?;
        metrics::counter!("tally_records_deleted_total", deleted);
        tracing::debug!(record_type = type_name, container_id, deleted, "deleted instant records");
        Ok(deleted)
    }

    pub(crate) fn find_instants(
        &self,
        connection: &mut dyn Connection,
        container_id: i64,
        type_name: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
        terms: &[SearchTerm],
    ) -> Result<Vec<InstantRecord>, StorageError> {
        let (record_type, root) = self.typed(type_name, TemporalKind::Instant)?;
        let mut builder = self.select(connection, record_type, root)?;
        builder
            .and_where()
            .identifier(CONTAINER_COLUMN)
            .sql(" = ")
            .bind(SqlValue::BigInt(container_id))
            .and_where()
            .identifier(INSTANT_COLUMN)
            .sql(" >= ")
            .bind(SqlValue::Timestamp(start))
            .and_where()
            .identifier(INSTANT_COLUMN)
            .sql(" < ")
            .bind(SqlValue::Timestamp(end));
        push_terms(&mut builder, self.registry, record_type, terms)?;
        builder
            .sql(" ORDER BY ")
            .identifiers([INSTANT_COLUMN, ID_COLUMN]);
        let statement = builder.build();
        connection
            .query(&statement)?
            .iter()
            .map(|row| self.decode_instant(record_type, row))
            .collect()
    }

    pub(crate) fn get_interval_at(
        &self,
        connection: &mut dyn Connection,
        container_id: i64,
        type_name: &str,
        instant: OffsetDateTime,
    ) -> Result<Option<IntervalRecord>, StorageError> {
        let (record_type, root) = self.typed(type_name, TemporalKind::Interval)?;
        let mut builder = self.select(connection, record_type, root)?;
        builder
            .and_where()
            .identifier(CONTAINER_COLUMN)
            .sql(" = ")
            .bind(SqlValue::BigInt(container_id))
            .and_where()
            .identifier(START_COLUMN)
            .sql(" <= ")
            .bind(SqlValue::Timestamp(instant))
            .and_where()
            .identifier(END_COLUMN)
            .sql(" > ")
            .bind(SqlValue::Timestamp(instant));
        let statement = builder.build();
        connection
            .query(&statement)?
            .first()
            .map(|row| self.decode_interval(record_type, row))
            .transpose()
    }

    /// Intervals overlapping `[start, end)`, ordered by start.
    pub(crate) fn find_intervals(
        &self,
        connection: &mut dyn Connection,
        container_id: i64,
        type_name: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
        terms: &[SearchTerm],
    ) -> Result<Vec<IntervalRecord>, StorageError> {
        let (record_type, root) = self.typed(type_name, TemporalKind::Interval)?;
        let mut builder = self.select(connection, record_type, root)?;
        builder
            .and_where()
            .identifier(CONTAINER_COLUMN)
            .sql(" = ")
            .bind(SqlValue::BigInt(container_id))
            .and_where()
            .identifier(START_COLUMN)
            .sql(" < ")
            .bind(SqlValue::Timestamp(end))
            .and_where()
            .identifier(END_COLUMN)
            .sql(" > ")
            .bind(SqlValue::Timestamp(start));
        push_terms(&mut builder, self.registry, record_type, terms)?;
        builder.sql(" ORDER BY ").identifier(START_COLUMN);
        let statement = builder.build();
        connection
            .query(&statement)?
            .iter()
            .map(|row| self.decode_interval(record_type, row))
            .collect()
    }

    fn timeline_entry(
        &self,
        root: &RecordType,
        row: &Row,
    ) -> Result<TimelineEntry<OffsetDateTime, Payload>, StorageError> {
        let interval = self.decode_interval(root, row)?;
        Ok(TimelineEntry {
            id: interval.record.id,
            start: interval.start,
            end: interval.end,
            attributes: Payload {
                record_type: interval.record.record_type,
                attributes: interval.record.attributes,
            },
        })
    }

    /// Entry with the greatest start before `start`, and entries starting in `[start, end)`.
    ///
    /// A container has one timeline per table, shared by every type stored in it.
    #[allow(clippy::type_complexity)]
    fn neighbourhood(
        &self,
        connection: &mut dyn Connection,
        container_id: i64,
        root: &RecordType,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<
        (
            Option<TimelineEntry<OffsetDateTime, Payload>>,
            Vec<TimelineEntry<OffsetDateTime, Payload>>,
        ),
        StorageError,
    > {
        let mut builder = self.select(connection, root, root)?;
        builder
            .and_where()
            .identifier(CONTAINER_COLUMN)
            .sql(" = ")
            .bind(SqlValue::BigInt(container_id))
            .and_where()
            .identifier(START_COLUMN)
            .sql(" < ")
            .bind(SqlValue::Timestamp(start))
            .sql(" ORDER BY ")
            .identifier(START_COLUMN)
            .sql(" DESC LIMIT 1");
        let statement = builder.build();
        let preceding = connection
            .query(&statement)?
            .first()
            .map(|row| self.timeline_entry(root, row))
            .transpose()?;

        let mut builder = self.select(connection, root, root)?;
        builder
            .and_where()
            .identifier(CONTAINER_COLUMN)
            .sql(" = ")
            .bind(SqlValue::BigInt(container_id))
            .and_where()
            .identifier(START_COLUMN)
            .sql(" >= ")
            .bind(SqlValue::Timestamp(start))
            .and_where()
            .identifier(START_COLUMN)
            .sql(" < ")
            .bind(SqlValue::Timestamp(end))
            .sql(" ORDER BY ")
            .identifier(START_COLUMN);
        let statement = builder.build();
        let within = connection
            .query(&statement)?
            .iter()
            .map(|row| self.timeline_entry(root, row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((preceding, within))
    }

    fn insert_interval(
        &self,
        connection: &mut dyn Connection,
        root: &RecordType,
        container_id: i64,
        start: OffsetDateTime,
        end: OffsetDateTime,
        payload: &Payload,
    ) -> Result<i64, StorageError> {
        let mut columns = vec![
            (TYPE_COLUMN.to_string(), SqlValue::Text(payload.record_type.clone())),
            (CONTAINER_COLUMN.to_string(), SqlValue::BigInt(container_id)),
            (START_COLUMN.to_string(), SqlValue::Timestamp(start)),
            (END_COLUMN.to_string(), SqlValue::Timestamp(end)),
        ];
        columns.extend(self.columns(&payload.record_type, &payload.attributes)?);
        let statement = Self::insert_statement(connection, &root.name, &columns);
        connection.insert(&statement)
    }

    /// Replaces `[start, end)` of the container's timeline with `attributes`.
    pub(crate) fn update_interval(
        &self,
        connection: &mut dyn Connection,
        container_id: i64,
        type_name: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
        attributes: &Attributes,
    ) -> Result<IntervalRecord, StorageError> {
        let (record_type, root) = self.typed(type_name, TemporalKind::Interval)?;
        let start = Self::stored_instant(connection, start)?;
        let end = Self::stored_instant(connection, end)?;
        timeline::check_range(&start, &end)?;
        let attributes = Self::stored_attributes(connection, attributes)?;
        self.registry.validate_attributes(type_name, &attributes, true)?;

        if let Some(lock) = connection.dialect().timeline_lock(&root.name, container_id) {
            connection.execute(&lock)?;
        }
        let (preceding, within) = self.neighbourhood(connection, container_id, root, start, end)?;
        let payload = Payload {
            record_type: type_name.to_string(),
            attributes,
        };
        let edits = timeline::plan_update(start, end, payload, preceding.as_ref(), &within)?;

        let mut inserted = None;
        for edit in edits {
            match edit {
                TimelineEdit::Split {
                    source,
                    start,
                    end,
                    attributes,
                } => {
                    let id = self.insert_interval(
                        connection,
                        root,
                        container_id,
                        start,
                        end,
                        &attributes,
                    )?;
                    metrics::increment_counter!("tally_timeline_edits_total", "edit" => "split");
                    tracing::debug!(source, id, "split interval");
                }
                TimelineEdit::Truncate { id, end, .. } => {
                    let mut builder = StatementBuilder::new(connection.dialect());
                    builder
                        .sql("UPDATE ")
                        .identifier(&root.name)
                        .sql(" SET ")
                        .identifier(END_COLUMN)
                        .sql(" = ")
                        .bind(SqlValue::Timestamp(end))
                        .and_where()
                        .identifier(ID_COLUMN)
                        .sql(" = ")
                        .bind(SqlValue::BigInt(id));
                    let statement = builder.build();
                    connection.execute(&statement)?;
                    metrics::increment_counter!("tally_timeline_edits_total", "edit" => "truncate");
                    tracing::debug!(id, "truncated interval");
                }
                TimelineEdit::Remove { id, .. } => {
                    let mut builder = StatementBuilder::new(connection.dialect());
                    builder
                        .sql("DELETE FROM ")
                        .identifier(&root.name)
                        .and_where()
                        .identifier(ID_COLUMN)
                        .sql(" = ")
                        .bind(SqlValue::BigInt(id));
                    let statement = builder.build();
                    connection.execute(&statement)?;
                    metrics::increment_counter!("tally_timeline_edits_total", "edit" => "remove");
                    tracing::debug!(id, "removed interval");
                }
                TimelineEdit::Insert {
                    start,
                    end,
                    attributes,
                } => {
                    let id = self.insert_interval(
                        connection,
                        root,
                        container_id,
                        start,
                        end,
                        &attributes,
                    )?;
                    metrics::increment_counter!("tally_timeline_edits_total", "edit" => "insert");
                    inserted = Some(id);
                }
            }
        }

        let id = inserted.ok_or_else(|| {
            StorageError::Programming("interval update planned no insert".to_string())
        })?;
        tracing::debug!(record_type = type_name, container_id, id, "updated interval timeline");
        let row = self.select_by_id(connection, record_type, root, id)?;
        self.decode_interval(record_type, &row)
    }

    pub(crate) fn run_report(
        &self,
        connection: &mut dyn Connection,
        query: &ReportQuery,
    ) -> Result<Report, StorageError> {
        let (record_type, root) = self.typed(&query.record_type, TemporalKind::Instant)?;
        if query.container_dimension.is_some() && root.container.is_none() {
            return Err(StorageError::Validation(format!(
                "{} records have no container to group by",
                record_type.name
            )));
        }
        let mut dimensions = Vec::with_capacity(query.dimensions.len());
        for name in &query.dimensions {
            let (declaring, attribute) = self
                .registry
                .find_attribute(&record_type.name, name)?
                .ok_or_else(|| {
                    StorageError::Validation(format!("unknown report dimension {}", name))
                })?;
            dimensions.push((name, codec::attribute_column(declaring, name), attribute));
        }
        let mut measures = Vec::with_capacity(query.measures.len());
        for name in &query.measures {
            let (declaring, attribute) = self
                .registry
                .find_attribute(&record_type.name, name)?
                .filter(|(_, attribute)| attribute.value_type.is_numeric())
                .ok_or_else(|| {
                    StorageError::Validation(format!("{} is not a numeric attribute", name))
                })?;
            measures.push((name, codec::attribute_column(declaring, name), attribute));
        }

        let mut report = ReportBuilder::new(query)?;
        let last_boundary = report.last_boundary().ok_or_else(|| {
            StorageError::Programming("report has no boundaries".to_string())
        })?;

        let mut grouping: Vec<&str> = vec![INSTANT_COLUMN];
        if query.container_dimension.is_some() {
            grouping.push(CONTAINER_COLUMN);
        }
        grouping.extend(dimensions.iter().map(|(_, column, _)| column.as_str()));

        let mut builder = StatementBuilder::new(connection.dialect());
        builder.sql("SELECT ").identifiers(grouping.iter().copied());
        for (_, column, _) in &measures {
            builder
                .sql(", CAST(SUM(")
                .identifier(column)
                .sql(") AS BIGINT) AS ")
                .identifier(column);
        }
        builder
            .sql(" FROM ")
            .identifier(&root.name)
            .and_where()
            .identifier(INSTANT_COLUMN)
            .sql(" <= ")
            .bind(SqlValue::Timestamp(last_boundary));
        push_type_filter(&mut builder, self.registry, record_type)?;
        push_terms(&mut builder, self.registry, record_type, &query.terms)?;
        builder.sql(" GROUP BY ").identifiers(grouping.iter().copied());
        let statement = builder.build();

        let rows = connection.query(&statement)?;
        for row in &rows {
            let instant = codec::decode_system_timestamp(row.get(INSTANT_COLUMN), INSTANT_COLUMN)?;
            let container_id = match query.container_dimension {
                Some(_) => Some(codec::decode_id(row.get(CONTAINER_COLUMN), CONTAINER_COLUMN)?),
                None => None,
            };
            let mut attributes = Attributes::new();
            for (name, column, attribute) in &dimensions {
                if let Some(value) = codec::decode(&attribute.value_type, row.get(column))? {
                    attributes.insert(name.to_string(), value);
                }
            }
            for (name, column, attribute) in &measures {
                let total = codec::decode_measure(&attribute.value_type, row.get(column))?;
                attributes.insert(name.to_string(), Value::Decimal(total));
            }
            report.aggregate(instant, container_id, &attributes)?;
        }
        let report = report.build();
        metrics::histogram!("tally_report_rows", report.rows().len() as f64);
        tracing::debug!(
            record_type = %record_type.name,
            scanned = rows.len(),
            groups = report.rows().len(),
            "ran report"
        );
        Ok(report)
    }
}
