use crate::{
    codec::{
        attribute_column, sql_type, CONTAINER_COLUMN, END_COLUMN, ID_COLUMN, INSTANT_COLUMN,
        START_COLUMN, TYPE_COLUMN,
    },
    registry::{Numbering, RecordType, TemporalKind, TypeRegistry},
    sql::SqlType,
};

use super::{ColumnDef, Schema, TableDef};

impl Schema {
    /// Derives one table per root type, holding the columns of all its subtypes.
    pub fn build(registry: &TypeRegistry) -> Schema {
        let mut schema = Schema::default();
        for root in registry.types().filter(|t| t.is_root()) {
            let table = table_for(registry, root);
            schema.tables.insert(table.name.clone(), table);
        }
        schema
    }
}

fn system_columns(root: &RecordType) -> Vec<ColumnDef> {
    let mut columns = vec![
        ColumnDef {
            auto_increment: root.numbering == Numbering::AutoIncrement,
            ..ColumnDef::new(ID_COLUMN, SqlType::BigInt, true)
        },
        ColumnDef::new(TYPE_COLUMN, SqlType::Text, true),
    ];
    match root.temporal_kind {
        TemporalKind::None => {}
        TemporalKind::Instant => {
            columns.push(ColumnDef::new(INSTANT_COLUMN, SqlType::Timestamp, true));
        }
        TemporalKind::Interval => {
            columns.push(ColumnDef::new(START_COLUMN, SqlType::Timestamp, true));
            columns.push(ColumnDef::new(END_COLUMN, SqlType::Timestamp, true));
        }
    }
    if root.container.is_some() {
        columns.push(ColumnDef::new(CONTAINER_COLUMN, SqlType::BigInt, true));
    }
    columns
}

fn table_for(registry: &TypeRegistry, root: &RecordType) -> TableDef {
    let mut columns = system_columns(root);
    for attribute in &root.attributes {
        columns.push(ColumnDef::new(
            &attribute.name,
            sql_type(&attribute.value_type),
            attribute.required,
        ));
    }
    // Sibling rows share the table, so subtype columns are always nullable.
    let subtypes = registry
        .types()
        .filter(|t| !t.is_root() && registry.is_assignable(&t.name, &root.name));
    for subtype in subtypes {
        for attribute in &subtype.attributes {
            columns.push(ColumnDef::new(
                &attribute_column(subtype, &attribute.name),
                sql_type(&attribute.value_type),
                false,
            ));
        }
    }
    TableDef {
        name: root.name.clone(),
        columns,
    }
}
