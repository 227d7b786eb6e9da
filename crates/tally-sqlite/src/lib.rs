//! SQLite storage backend for Tally.
//!
//! Timestamps are stored as epoch milliseconds, booleans as 0/1 integers.

use std::{sync::Mutex, time::Duration};

use rusqlite::{
    params_from_iter,
    types::{Value as SqliteValue, ValueRef},
    OpenFlags,
};
use tally_core::{
    codec::timestamp_to_millis,
    sql::{Dialect, Row, SqlType, SqlValue, Statement},
    storage::{Connection, DataSource, StorageError},
};
use uuid::Uuid;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("?{}", index)
    }

    fn column_type(&self, sql_type: SqlType) -> &'static str {
        match sql_type {
            SqlType::Text => "TEXT",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Timestamp => "TIMESTAMP",
        }
    }

    fn zero_literal(&self, sql_type: SqlType) -> &'static str {
        match sql_type {
            SqlType::Text => "''",
            _ => "0",
        }
    }

    fn id_column_type(&self, auto_increment: bool) -> &'static str {
        if auto_increment {
            "INTEGER PRIMARY KEY AUTOINCREMENT"
        } else {
            "BIGINT NOT NULL"
        }
    }

    fn auto_increment_is_primary_key(&self) -> bool {
        true
    }

    // Takes the write lock up front, which also serializes timeline updates.
    fn begin_transaction(&self) -> &'static str {
        "BEGIN IMMEDIATE"
    }

    // Timestamps are stored as epoch milliseconds.
    fn timestamp_precision(&self) -> time::Duration {
        time::Duration::MILLISECOND
    }
}

/// Opens connections to one SQLite database.
pub struct SqliteDataSource {
    uri: String,
    flags: OpenFlags,
    // Keeps a shared in-memory database alive between connections.
    _anchor: Option<Mutex<rusqlite::Connection>>,
}

impl SqliteDataSource {
    /// Opens the database file at `path`, or a fresh in-memory database for `:memory:`.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        if path == ":memory:" {
            return Self::in_memory();
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = rusqlite::Connection::open_with_flags(path, flags)
            .map_err(|e| StorageError::backend(format!("opening {}", path), e))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| StorageError::backend("enabling WAL", e))?;
        tracing::debug!(path, "SQLite database opened");
        Ok(SqliteDataSource {
            uri: path.to_string(),
            flags,
            _anchor: None,
        })
    }

    /// A private in-memory database shared by all connections of this data source.
    pub fn in_memory() -> Result<Self, StorageError> {
        let uri = format!("file:tally-{}?mode=memory&cache=shared", Uuid::new_v4());
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let anchor = rusqlite::Connection::open_with_flags(&uri, flags)
            .map_err(|e| StorageError::backend("opening in-memory database", e))?;
        tracing::debug!(uri = %uri, "SQLite in-memory database opened");
        Ok(SqliteDataSource {
            uri,
            flags,
            _anchor: Some(Mutex::new(anchor)),
        })
    }
}

impl DataSource for SqliteDataSource {
    type Connection = SqliteConnection;

    fn connect(&self) -> Result<SqliteConnection, StorageError> {
        let conn = rusqlite::Connection::open_with_flags(&self.uri, self.flags)
            .map_err(|e| StorageError::backend("opening connection", e))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| StorageError::backend("setting busy timeout", e))?;
        Ok(SqliteConnection { conn })
    }
}

pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    fn bind(value: &SqlValue) -> SqliteValue {
        match value {
            SqlValue::Null(_) => SqliteValue::Null,
            SqlValue::Text(s) => SqliteValue::Text(s.clone()),
            SqlValue::SmallInt(v) => SqliteValue::Integer(i64::from(*v)),
            SqlValue::Integer(v) => SqliteValue::Integer(i64::from(*v)),
            SqlValue::BigInt(v) => SqliteValue::Integer(*v),
            SqlValue::Boolean(b) => SqliteValue::Integer(i64::from(*b)),
            SqlValue::Timestamp(t) => SqliteValue::Integer(timestamp_to_millis(*t)),
        }
    }

    fn params(statement: &Statement) -> Vec<SqliteValue> {
        statement.params.iter().map(Self::bind).collect()
    }

    fn read(value: ValueRef<'_>, column: &str) -> Result<Option<SqlValue>, StorageError> {
        match value {
            ValueRef::Null => Ok(None),
            ValueRef::Integer(i) => Ok(Some(SqlValue::BigInt(i))),
            ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                .map(|s| Some(SqlValue::Text(s.to_string())))
                .map_err(|e| StorageError::Decode(format!("column {} is not UTF-8: {}", column, e))),
            ValueRef::Real(_) | ValueRef::Blob(_) => Err(StorageError::Decode(format!(
                "column {} holds an unsupported SQLite value",
                column
            ))),
        }
    }

    fn single_column(
        &mut self,
        sql: &str,
        param: Option<&str>,
    ) -> Result<Vec<String>, StorageError> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| StorageError::backend("reading catalog", e))?;
        let rows = stmt
            .query_map(params_from_iter(param), |row| row.get::<_, String>(0))
            .map_err(|e| StorageError::backend("reading catalog", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::backend("reading catalog", e))
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> &dyn Dialect {
        &SqliteDialect
    }

    fn execute(&mut self, statement: &Statement) -> Result<u64, StorageError> {
        tracing::debug!(sql = %statement.sql, "executing statement");
        let changed = self
            .conn
            .execute(&statement.sql, params_from_iter(Self::params(statement)))
            .map_err(|e| StorageError::backend(format!("executing {}", statement.sql), e))?;
        Ok(changed as u64)
    }

    fn insert(&mut self, statement: &Statement) -> Result<i64, StorageError> {
        self.execute(statement)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn query(&mut self, statement: &Statement) -> Result<Vec<Row>, StorageError> {
        tracing::debug!(sql = %statement.sql, "running query");
        let context = || format!("querying {}", statement.sql);
        let mut stmt = self
            .conn
            .prepare(&statement.sql)
            .map_err(|e| StorageError::backend(context(), e))?;
        let columns: std::sync::Arc<[String]> =
            stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt
            .query(params_from_iter(Self::params(statement)))
            .map_err(|e| StorageError::backend(context(), e))?;

        let mut result = Vec::new();
        while let Some(row) = rows.next().map_err(|e| StorageError::backend(context(), e))? {
            let mut values = Vec::with_capacity(columns.len());
            for (index, column) in columns.iter().enumerate() {
                let value = row
                    .get_ref(index)
                    .map_err(|e| StorageError::backend(context(), e))?;
                values.push(Self::read(value, column)?);
            }
            result.push(Row::new(columns.clone(), values));
        }
        Ok(result)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), StorageError> {
        tracing::debug!(sql, "executing batch");
        self.conn
            .execute_batch(sql)
            .map_err(|e| StorageError::backend(format!("executing {}", sql), e))
    }

    fn table_names(&mut self) -> Result<Vec<String>, StorageError> {
        self.single_column(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            None,
        )
    }

    fn column_names(&mut self, table: &str) -> Result<Vec<String>, StorageError> {
        self.single_column("SELECT name FROM pragma_table_info(?1) ORDER BY cid", Some(table))
    }
}
