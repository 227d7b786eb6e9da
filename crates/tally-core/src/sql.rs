use std::{fmt::Display, sync::Arc};

use time::{Duration, OffsetDateTime};

/// Storage-level column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Text,
    SmallInt,
    Integer,
    BigInt,
    Boolean,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// A typed NULL. Some backends need the type to bind it.
    Null(SqlType),
    Text(String),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Boolean(bool),
    Timestamp(OffsetDateTime),
}

impl SqlValue {
    pub fn sql_type(&self) -> SqlType {
        match self {
            SqlValue::Null(sql_type) => *sql_type,
            SqlValue::Text(_) => SqlType::Text,
            SqlValue::SmallInt(_) => SqlType::SmallInt,
            SqlValue::Integer(_) => SqlType::Integer,
            SqlValue::BigInt(_) => SqlType::BigInt,
            SqlValue::Boolean(_) => SqlType::Boolean,
            SqlValue::Timestamp(_) => SqlType::Timestamp,
        }
    }

    /// Widens any integer representation.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::SmallInt(v) => Some(i64::from(*v)),
            SqlValue::Integer(v) => Some(i64::from(*v)),
            SqlValue::BigInt(v) => Some(*v),
            _ => None,
        }
    }
}

impl Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlValue::Null(_) => write!(f, "NULL"),
            SqlValue::Text(s) => write!(f, "'{}'", s),
            SqlValue::SmallInt(v) => write!(f, "{}", v),
            SqlValue::Integer(v) => write!(f, "{}", v),
            SqlValue::BigInt(v) => write!(f, "{}", v),
            SqlValue::Boolean(b) => write!(f, "{}", b),
            SqlValue::Timestamp(t) => write!(f, "{}", t),
        }
    }
}

/// SQL text with its bound parameters kept separate.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Statement {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// Backend-specific SQL syntax.
pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Placeholder for the 1-based parameter `index`.
    fn placeholder(&self, index: usize) -> String;

    fn column_type(&self, sql_type: SqlType) -> &'static str;

    /// Literal used as the default when a required column is added to a populated table.
    fn zero_literal(&self, sql_type: SqlType) -> &'static str;

    /// Declaration of the `sys_id` column, without its name.
    fn id_column_type(&self, auto_increment: bool) -> &'static str;

    /// True when the auto-increment id declaration already makes the column the primary key.
    fn auto_increment_is_primary_key(&self) -> bool {
        false
    }

    fn begin_transaction(&self) -> &'static str {
        "BEGIN"
    }

    fn commit_transaction(&self) -> &'static str {
        "COMMIT"
    }

    fn rollback_transaction(&self) -> &'static str {
        "ROLLBACK"
    }

    /// Smallest timestamp step the backend stores. Finer instants are floored to it.
    fn timestamp_precision(&self) -> Duration {
        Duration::MICROSECOND
    }

    /// Statement serializing timeline updates for one container, if the backend needs one.
    fn timeline_lock(&self, _table: &str, _container_id: i64) -> Option<Statement> {
        None
    }
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Builds a [`Statement`] so that values are always bound, never spliced into the SQL.
pub struct StatementBuilder<'d> {
    dialect: &'d dyn Dialect,
    sql: String,
    params: Vec<SqlValue>,
    has_where: bool,
}

impl<'d> StatementBuilder<'d> {
    pub fn new(dialect: &'d dyn Dialect) -> Self {
        StatementBuilder {
            dialect,
            sql: String::new(),
            params: Vec::new(),
            has_where: false,
        }
    }

    pub fn sql(&mut self, fragment: &str) -> &mut Self {
        self.sql.push_str(fragment);
        self
    }

    pub fn identifier(&mut self, name: &str) -> &mut Self {
        self.sql.push_str(&quote_identifier(name));
        self
    }

    pub fn identifiers<'n>(&mut self, names: impl IntoIterator<Item = &'n str>) -> &mut Self {
        for (index, name) in names.into_iter().enumerate() {
            if index > 0 {
                self.sql.push_str(", ");
            }
            self.identifier(name);
        }
        self
    }

    pub fn bind(&mut self, value: SqlValue) -> &mut Self {
        self.params.push(value);
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
        self
    }

    pub fn bind_list(&mut self, values: impl IntoIterator<Item = SqlValue>) -> &mut Self {
        for (index, value) in values.into_iter().enumerate() {
            if index > 0 {
                self.sql.push_str(", ");
            }
            self.bind(value);
        }
        self
    }

    /// Starts the next conjunct: ` WHERE ` the first time, ` AND ` afterwards.
    pub fn and_where(&mut self) -> &mut Self {
        if self.has_where {
            self.sql.push_str(" AND ");
        } else {
            self.sql.push_str(" WHERE ");
            self.has_where = true;
        }
        self
    }

    pub fn dialect(&self) -> &'d dyn Dialect {
        self.dialect
    }

    pub fn build(self) -> Statement {
        Statement {
            sql: self.sql,
            params: self.params,
        }
    }
}

/// One result row. Columns are shared between the rows of a result set.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Option<SqlValue>>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Option<SqlValue>>) -> Self {
        Row { columns, values }
    }

    /// Value of `column`, or `None` when the column is NULL or absent.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|index| self.values.get(index))
            .and_then(|value| value.as_ref())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}
