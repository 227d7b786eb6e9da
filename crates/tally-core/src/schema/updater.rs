use std::collections::BTreeMap;

use crate::{
    codec::ID_COLUMN,
    sql::{quote_identifier, Dialect},
    storage::{Connection, StorageError},
};

use super::{ColumnDef, Discrepancy, Schema, SchemaValidator, TableDef};

/// Applies corrective DDL for the discrepancies found by [`SchemaValidator`].
pub struct SchemaUpdater<'s> {
    schema: &'s Schema,
}

impl<'s> SchemaUpdater<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        SchemaUpdater { schema }
    }

    /// Corrective statements, grouped by table.
    pub fn plan(
        &self,
        dialect: &dyn Dialect,
        discrepancies: &[Discrepancy],
    ) -> BTreeMap<String, Vec<String>> {
        let mut plan: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for discrepancy in discrepancies {
            let sql = match discrepancy {
                Discrepancy::MissingTable(table) => create_table_sql(dialect, table),
                Discrepancy::MissingColumn { table, column } => add_column_sql(dialect, table, column),
                Discrepancy::ExtraColumn { table, column } => drop_column_sql(table, column),
            };
            plan.entry(discrepancy.table().to_string()).or_default().push(sql);
        }
        plan
    }

    /// Repairs the live schema and returns the discrepancies left afterwards.
    ///
    /// A failing statement skips the remaining statements of its table. Other tables
    /// are still repaired and the first failure is returned. Applied DDL is not undone.
    pub fn update(
        &self,
        connection: &mut dyn Connection,
    ) -> Result<Vec<Discrepancy>, StorageError> {
        let validator = SchemaValidator::new(self.schema);
        let discrepancies = validator.validate(connection)?;
        let plan = self.plan(connection.dialect(), &discrepancies);

        let mut first_error = None;
        for (table, statements) in plan {
            for sql in statements {
                match connection.execute_batch(&sql) {
                    Ok(()) => {
                        tracing::info!(table = %table, sql = %sql, "applied schema change");
                        metrics::increment_counter!("tally_schema_statements_total");
                    }
                    Err(e) => {
                        tracing::error!(table = %table, sql = %sql, error = %e, "schema change failed");
                        first_error.get_or_insert(e);
                        break;
                    }
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let remaining = validator.validate(connection)?;
        if !remaining.is_empty() {
            tracing::warn!(count = remaining.len(), "schema discrepancies remain after update");
        }
        Ok(remaining)
    }
}

fn column_sql(dialect: &dyn Dialect, column: &ColumnDef) -> String {
    if column.name == ID_COLUMN {
        return format!(
            "{} {}",
            quote_identifier(&column.name),
            dialect.id_column_type(column.auto_increment)
        );
    }
    let mut sql = format!(
        "{} {}",
        quote_identifier(&column.name),
        dialect.column_type(column.sql_type)
    );
    if column.required {
        sql.push_str(" NOT NULL");
    }
    sql
}

pub fn create_table_sql(dialect: &dyn Dialect, table: &TableDef) -> String {
    let mut parts: Vec<String> = table.columns.iter().map(|c| column_sql(dialect, c)).collect();
    let inline_key = table
        .column(ID_COLUMN)
        .map(|id| id.auto_increment && dialect.auto_increment_is_primary_key())
        .unwrap_or(false);
    if !inline_key {
        parts.push(format!("PRIMARY KEY ({})", quote_identifier(ID_COLUMN)));
    }
    format!("CREATE TABLE {} ({})", quote_identifier(&table.name), parts.join(", "))
}

/// Required columns get a zero default so the change also works on populated tables.
pub fn add_column_sql(dialect: &dyn Dialect, table: &str, column: &ColumnDef) -> String {
    let mut sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote_identifier(table),
        quote_identifier(&column.name),
        dialect.column_type(column.sql_type)
    );
    if column.required {
        sql.push_str(" NOT NULL DEFAULT ");
        sql.push_str(dialect.zero_literal(column.sql_type));
    }
    sql
}

pub fn drop_column_sql(table: &str, column: &str) -> String {
    format!(
        "ALTER TABLE {} DROP COLUMN {}",
        quote_identifier(table),
        quote_identifier(column)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        registry::{RecordType, TypeRegistry, ValueType},
        sql::tests::TestDialect,
    };

    fn schema() -> Schema {
        let mut registry = TypeRegistry::new();
        registry
            .register(RecordType::snapshot("account").required("title", ValueType::String))
            .unwrap();
        registry
            .register(RecordType::instant("posting", "account").required("amount", ValueType::Decimal))
            .unwrap();
        Schema::build(&registry)
    }

    #[test]
    fn test_create_table_statement() {
        let schema = schema();
        let sql = create_table_sql(&TestDialect, schema.table("posting").unwrap());
        assert_eq!(
            sql,
            "CREATE TABLE \"posting\" (\"sys_id\" BIGSERIAL, \"sys_type\" TEXT NOT NULL, \
             \"sys_instant\" TIMESTAMP NOT NULL, \"sys_container_id\" BIGINT NOT NULL, \
             \"amount\" BIGINT NOT NULL, PRIMARY KEY (\"sys_id\"))"
        );
    }

    #[test]
    fn test_plan_one_statement_per_discrepancy() {
        let schema = schema();
        let account = schema.table("account").unwrap();
        let discrepancies = vec![
            Discrepancy::ExtraColumn {
                table: "account".into(),
                column: "legacy".into(),
            },
            Discrepancy::MissingColumn {
                table: "account".into(),
                column: account.column("title").unwrap().clone(),
            },
            Discrepancy::MissingTable(schema.table("posting").unwrap().clone()),
        ];

        let plan = SchemaUpdater::new(&schema).plan(&TestDialect, &discrepancies);
        assert_eq!(
            plan["account"],
            vec![
                "ALTER TABLE \"account\" DROP COLUMN \"legacy\"".to_string(),
                "ALTER TABLE \"account\" ADD COLUMN \"title\" TEXT NOT NULL DEFAULT ''".to_string(),
            ]
        );
        assert_eq!(plan["posting"].len(), 1);
        assert!(plan["posting"][0].starts_with("CREATE TABLE \"posting\""));
    }
}
