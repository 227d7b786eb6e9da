use std::error::Error as StdError;

use thiserror::Error;

use crate::sql::{Dialect, Row, Statement};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{record_type} {id} not found")]
    NotFound { record_type: String, id: i64 },
    #[error("backend failure: {context}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("cannot decode stored value: {0}")]
    Decode(String),
    #[error("programming error: {0}")]
    Programming(String),
}

impl StorageError {
    pub fn backend<E>(context: impl Into<String>, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        StorageError::Backend {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Fatal errors indicate a caller or configuration defect and are never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StorageError::Programming(_) | StorageError::Decode(_))
    }
}

pub type TransactionId = u64;

/// A live connection to a relational backend.
///
/// Implementations own exactly one backend session. Dropping the connection
/// releases it.
pub trait Connection {
    fn dialect(&self) -> &dyn Dialect;

    /// Runs a statement and returns the number of affected rows.
    fn execute(&mut self, statement: &Statement) -> Result<u64, StorageError>;

    /// Runs an insert and returns the generated `sys_id`.
    fn insert(&mut self, statement: &Statement) -> Result<i64, StorageError>;

    fn query(&mut self, statement: &Statement) -> Result<Vec<Row>, StorageError>;

    /// Runs unparameterized SQL such as DDL or transaction control.
    fn execute_batch(&mut self, sql: &str) -> Result<(), StorageError>;

    fn table_names(&mut self) -> Result<Vec<String>, StorageError>;

    fn column_names(&mut self, table: &str) -> Result<Vec<String>, StorageError>;

    fn begin(&mut self) -> Result<(), StorageError> {
        let sql = self.dialect().begin_transaction();
        self.execute_batch(sql)
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        let sql = self.dialect().commit_transaction();
        self.execute_batch(sql)
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        let sql = self.dialect().rollback_transaction();
        self.execute_batch(sql)
    }
}

/// Hands out backend connections.
pub trait DataSource: Send + Sync {
    type Connection: Connection + 'static;

    fn connect(&self) -> Result<Self::Connection, StorageError>;
}
