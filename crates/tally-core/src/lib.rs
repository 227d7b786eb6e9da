//! Core engines and traits for Tally temporal record stores.
//!
//! This crate holds the type registry, the relational mapping layer, the interval
//! timeline and report engines, schema reconciliation, and the transactional store.
//! Backends implement [`Connection`] and [`DataSource`] in separate crates.

pub mod codec;
pub mod models;
pub mod registry;
pub mod report;
pub mod schema;
pub mod search;
pub mod sql;
pub mod storage;
pub mod store;
pub mod timeline;

// Re-export key types at crate root for convenience
pub use models::read::{InstantRecord, IntervalRecord, Record};
pub use models::{Attributes, EnumDomain, EnumValue, Value};
pub use registry::{AttributeType, Numbering, RecordType, TemporalKind, TypeRegistry, ValueType};
pub use report::{DimensionKey, DimensionValue, Report, ReportGranularity, ReportQuery};
pub use schema::{Discrepancy, Schema, SchemaUpdater, SchemaValidator};
pub use search::{SearchOperator, SearchTerm, TimeColumn};
pub use sql::{Dialect, Row, SqlType, SqlValue, Statement};
pub use storage::{Connection, DataSource, StorageError, TransactionId};
pub use store::{ExecutionContext, Store, Transaction};
pub use timeline::IntervalTimeline;
