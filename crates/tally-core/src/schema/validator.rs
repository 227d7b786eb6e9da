use std::collections::{BTreeMap, HashSet};

use crate::storage::{Connection, StorageError};

use super::{Discrepancy, Schema};

/// Live catalog: column names per table.
pub type Catalog = BTreeMap<String, Vec<String>>;

pub struct SchemaValidator<'s> {
    schema: &'s Schema,
}

impl<'s> SchemaValidator<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        SchemaValidator { schema }
    }

    /// Reads the catalog for the tables this schema knows about.
    pub fn read_catalog(&self, connection: &mut dyn Connection) -> Result<Catalog, StorageError> {
        let live: HashSet<String> = connection
            .table_names()?
            .into_iter()
            .map(|name| name.to_ascii_lowercase())
            .collect();
        let mut catalog = Catalog::new();
        for table in self.schema.tables() {
            if live.contains(&table.name) {
                let columns = connection
                    .column_names(&table.name)?
                    .into_iter()
                    .map(|name| name.to_ascii_lowercase())
                    .collect();
                catalog.insert(table.name.clone(), columns);
            }
        }
        Ok(catalog)
    }

    pub fn validate(
        &self,
        connection: &mut dyn Connection,
    ) -> Result<Vec<Discrepancy>, StorageError> {
        let catalog = self.read_catalog(connection)?;
        let discrepancies = self.diff(&catalog);
        tracing::debug!(count = discrepancies.len(), "schema validated");
        Ok(discrepancies)
    }

    /// Compares the schema with `catalog`. Tables the schema does not define are ignored.
    pub fn diff(&self, catalog: &Catalog) -> Vec<Discrepancy> {
        let mut discrepancies = Vec::new();
        for table in self.schema.tables() {
            let Some(live_columns) = catalog.get(&table.name) else {
                discrepancies.push(Discrepancy::MissingTable(table.clone()));
                continue;
            };
            for column in live_columns {
                if table.column(column).is_none() {
                    discrepancies.push(Discrepancy::ExtraColumn {
                        table: table.name.clone(),
                        column: column.clone(),
                    });
                }
            }
            for column in &table.columns {
                if !live_columns.contains(&column.name) {
                    discrepancies.push(Discrepancy::MissingColumn {
                        table: table.name.clone(),
                        column: column.clone(),
                    });
                }
            }
        }
        discrepancies
    }
}
