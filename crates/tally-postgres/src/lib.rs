//! PostgreSQL storage backend for Tally, on the synchronous `postgres` client.

use postgres::{
    types::{ToSql, Type},
    Client, NoTls,
};
use tally_core::{
    codec::ID_COLUMN,
    sql::{quote_identifier, Dialect, Row, SqlType, SqlValue, Statement},
    storage::{Connection, DataSource, StorageError},
};
use time::{OffsetDateTime, PrimitiveDateTime};

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn column_type(&self, sql_type: SqlType) -> &'static str {
        match sql_type {
            SqlType::Text => "TEXT",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Timestamp => "TIMESTAMP WITH TIME ZONE",
        }
    }

    fn zero_literal(&self, sql_type: SqlType) -> &'static str {
        match sql_type {
            SqlType::Text => "''",
            SqlType::Boolean => "FALSE",
            SqlType::Timestamp => "'1970-01-01 00:00:00+00'",
            SqlType::SmallInt | SqlType::Integer | SqlType::BigInt => "0",
        }
    }

    fn id_column_type(&self, auto_increment: bool) -> &'static str {
        if auto_increment {
            "BIGINT GENERATED BY DEFAULT AS IDENTITY"
        } else {
            "BIGINT NOT NULL"
        }
    }

    /// Transaction-scoped advisory lock on one container's timeline.
    fn timeline_lock(&self, table: &str, container_id: i64) -> Option<Statement> {
        Some(Statement {
            sql: "SELECT pg_advisory_xact_lock(hashtextextended($1, 0))".to_string(),
            params: vec![SqlValue::Text(format!("{}:{}", table, container_id))],
        })
    }
}

pub struct PostgresDataSource {
    url: String,
}

impl PostgresDataSource {
    pub fn new(url: &str) -> Self {
        PostgresDataSource {
            url: url.to_string(),
        }
    }
}

impl DataSource for PostgresDataSource {
    type Connection = PostgresConnection;

    fn connect(&self) -> Result<PostgresConnection, StorageError> {
        let client = Client::connect(&self.url, NoTls)
            .map_err(|e| StorageError::backend("PostgreSQL connection failed", e))?;
        tracing::debug!("PostgreSQL connection opened");
        Ok(PostgresConnection { client })
    }
}

pub struct PostgresConnection {
    client: Client,
}

type Param = Box<dyn ToSql + Sync>;

impl PostgresConnection {
    fn param(value: &SqlValue) -> Param {
        match value {
            SqlValue::Null(SqlType::Text) => Box::new(None::<String>),
            SqlValue::Null(SqlType::SmallInt) => Box::new(None::<i16>),
            SqlValue::Null(SqlType::Integer) => Box::new(None::<i32>),
            SqlValue::Null(SqlType::BigInt) => Box::new(None::<i64>),
            SqlValue::Null(SqlType::Boolean) => Box::new(None::<bool>),
            SqlValue::Null(SqlType::Timestamp) => Box::new(None::<OffsetDateTime>),
            SqlValue::Text(s) => Box::new(s.clone()),
            SqlValue::SmallInt(v) => Box::new(*v),
            SqlValue::Integer(v) => Box::new(*v),
            SqlValue::BigInt(v) => Box::new(*v),
            SqlValue::Boolean(b) => Box::new(*b),
            SqlValue::Timestamp(t) => Box::new(*t),
        }
    }

    fn params(statement: &Statement) -> Vec<Param> {
        statement.params.iter().map(Self::param).collect()
    }

    fn read(row: &postgres::Row, index: usize) -> Result<Option<SqlValue>, StorageError> {
        let column = &row.columns()[index];
        let decode = |e: postgres::Error| {
            StorageError::Decode(format!("column {}: {}", column.name(), e))
        };
        let ty = column.type_();
        let value = if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(index).map_err(decode)?.map(SqlValue::SmallInt)
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(index).map_err(decode)?.map(SqlValue::Integer)
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(index).map_err(decode)?.map(SqlValue::BigInt)
        } else if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(index).map_err(decode)?.map(SqlValue::Boolean)
        } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME {
            row.try_get::<_, Option<String>>(index).map_err(decode)?.map(SqlValue::Text)
        } else if *ty == Type::TIMESTAMPTZ {
            row.try_get::<_, Option<OffsetDateTime>>(index)
                .map_err(decode)?
                .map(SqlValue::Timestamp)
        } else if *ty == Type::TIMESTAMP {
            row.try_get::<_, Option<PrimitiveDateTime>>(index)
                .map_err(decode)?
                .map(|t| SqlValue::Timestamp(t.assume_utc()))
        } else {
            return Err(StorageError::Decode(format!(
                "column {} has unsupported type {}",
                column.name(),
                ty
            )));
        };
        Ok(value)
    }

    fn single_column(
        &mut self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<String>, StorageError> {
        let rows = self
            .client
            .query(sql, params)
            .map_err(|e| StorageError::backend("reading catalog", e))?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::backend("reading catalog", e))
    }
}

impl Connection for PostgresConnection {
    fn dialect(&self) -> &dyn Dialect {
        &PostgresDialect
    }

    fn execute(&mut self, statement: &Statement) -> Result<u64, StorageError> {
        tracing::debug!(sql = %statement.sql, "executing statement");
        let params = Self::params(statement);
        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p.as_ref()).collect();
        self.client
            .execute(statement.sql.as_str(), &refs)
            .map_err(|e| StorageError::backend(format!("executing {}", statement.sql), e))
    }

    fn insert(&mut self, statement: &Statement) -> Result<i64, StorageError> {
        let sql = format!("{} RETURNING {}", statement.sql, quote_identifier(ID_COLUMN));
        tracing::debug!(sql = %sql, "executing insert");
        let params = Self::params(statement);
        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p.as_ref()).collect();
        let row = self
            .client
            .query_one(sql.as_str(), &refs)
            .map_err(|e| StorageError::backend(format!("executing {}", sql), e))?;
        row.try_get::<_, i64>(0)
            .map_err(|e| StorageError::Decode(format!("generated id: {}", e)))
    }

    fn query(&mut self, statement: &Statement) -> Result<Vec<Row>, StorageError> {
        tracing::debug!(sql = %statement.sql, "running query");
        let params = Self::params(statement);
        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p.as_ref()).collect();
        let rows = self
            .client
            .query(statement.sql.as_str(), &refs)
            .map_err(|e| StorageError::backend(format!("querying {}", statement.sql), e))?;
        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let columns: std::sync::Arc<[String]> =
            first.columns().iter().map(|c| c.name().to_string()).collect();

        let mut result = Vec::with_capacity(rows.len());
        for row in &rows {
            let values = (0..columns.len())
                .map(|index| Self::read(row, index))
                .collect::<Result<Vec<_>, _>>()?;
            result.push(Row::new(columns.clone(), values));
        }
        Ok(result)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), StorageError> {
        tracing::debug!(sql, "executing batch");
        self.client
            .batch_execute(sql)
            .map_err(|e| StorageError::backend(format!("executing {}", sql), e))
    }

    fn table_names(&mut self) -> Result<Vec<String>, StorageError> {
        self.single_column(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
            &[],
        )
    }

    fn column_names(&mut self, table: &str) -> Result<Vec<String>, StorageError> {
        self.single_column(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position",
            &[&table],
        )
    }
}
