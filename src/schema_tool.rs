use tally_core::{DataSource, Discrepancy, Schema, SchemaUpdater, SchemaValidator, StorageError};
use tally_postgres::PostgresDataSource;
use tally_sqlite::SqliteDataSource;

use crate::{
    catalog::build_registry,
    config::{Backend, Command, Config},
};

/// Runs `command` against the configured database and returns the discrepancies found
/// (for `validate`) or left over (for `update`).
pub fn run(config: &Config, command: Command) -> Result<Vec<Discrepancy>, StorageError> {
    let registry = build_registry(&config.enums, &config.types)?;
    let schema = Schema::build(&registry);
    tracing::info!(
        backend = ?config.database.backend,
        tables = schema.tables().count(),
        command = ?command,
        "running schema tool"
    );
    match config.database.backend {
        Backend::Sqlite => execute(&SqliteDataSource::new(&config.database.url)?, &schema, command),
        Backend::Postgres => {
            execute(&PostgresDataSource::new(&config.database.url), &schema, command)
        }
    }
}

pub fn execute<D: DataSource>(
    source: &D,
    schema: &Schema,
    command: Command,
) -> Result<Vec<Discrepancy>, StorageError> {
    let mut connection = source.connect()?;
    match command {
        Command::Validate => SchemaValidator::new(schema).validate(&mut connection),
        Command::Update => SchemaUpdater::new(schema).update(&mut connection),
    }
}
