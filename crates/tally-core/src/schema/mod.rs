//! Schema reconciliation: desired tables from type metadata, diffed against the
//! live catalog and repaired with DDL.

use std::{collections::BTreeMap, fmt::Display};

use crate::sql::SqlType;

pub mod builder;
pub mod updater;
pub mod validator;

pub use updater::SchemaUpdater;
pub use validator::SchemaValidator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: SqlType,
    pub required: bool,
    pub auto_increment: bool,
}

impl ColumnDef {
    pub fn new(name: &str, sql_type: SqlType, required: bool) -> Self {
        ColumnDef {
            name: name.to_string(),
            sql_type,
            required,
            auto_increment: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// The desired tables, one per root record type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    tables: BTreeMap<String, TableDef>,
}

impl Schema {
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.tables.values()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discrepancy {
    MissingTable(TableDef),
    MissingColumn { table: String, column: ColumnDef },
    ExtraColumn { table: String, column: String },
}

impl Discrepancy {
    pub fn table(&self) -> &str {
        match self {
            Discrepancy::MissingTable(table) => &table.name,
            Discrepancy::MissingColumn { table, .. } | Discrepancy::ExtraColumn { table, .. } => table,
        }
    }
}

impl Display for Discrepancy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Discrepancy::MissingTable(table) => write!(f, "missing table {}", table.name),
            Discrepancy::MissingColumn { table, column } => {
                write!(f, "missing column {}.{}", table, column.name)
            }
            Discrepancy::ExtraColumn { table, column } => {
                write!(f, "extra column {}.{}", table, column)
            }
        }
    }
}
