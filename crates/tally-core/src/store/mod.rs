//! The transactional store: record operations bound to an explicit transaction handle.

mod ops;
mod query;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use time::OffsetDateTime;

use crate::{
    models::{
        read::{InstantRecord, IntervalRecord, Record},
        Attributes,
    },
    registry::TypeRegistry,
    report::{Report, ReportQuery},
    search::SearchTerm,
    storage::{Connection, DataSource, StorageError, TransactionId},
};

use ops::Operations;

/// Request-scoped context. At most one transaction is active per context.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    active: AtomicBool,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_transaction(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

pub struct Store<D: DataSource> {
    data_source: D,
    registry: Arc<TypeRegistry>,
    tx_counter: AtomicU64,
}

impl<D: DataSource> Store<D> {
    pub fn new(data_source: D, registry: Arc<TypeRegistry>) -> Self {
        Store {
            data_source,
            registry,
            tx_counter: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn data_source(&self) -> &D {
        &self.data_source
    }

    /// Opens a transaction on its own connection.
    ///
    /// Fails with a programming error when `context` already has an active transaction.
    pub fn start_transaction<'a>(
        &'a self,
        context: &'a ExecutionContext,
    ) -> Result<Transaction<'a, D>, StorageError> {
        if context
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(StorageError::Programming(
                "a transaction is already active for this context".to_string(),
            ));
        }
        let connection = self
            .data_source
            .connect()
            .and_then(|mut connection| connection.begin().map(|_| connection));
        let connection = match connection {
            Ok(connection) => connection,
            Err(e) => {
                context.active.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        metrics::increment_counter!("tally_transactions_total", "state" => "begun");
        tracing::debug!(tx_id = id, "transaction started");
        Ok(Transaction {
            store: self,
            context,
            connection: Some(connection),
            id,
        })
    }

    /// Runs a read on a connection held only for its duration.
    fn read<R>(
        &self,
        f: impl FnOnce(&Operations<'_>, &mut dyn Connection) -> Result<R, StorageError>,
    ) -> Result<R, StorageError> {
        let mut connection = self.data_source.connect()?;
        f(&Operations::new(&self.registry), &mut connection)
    }

    pub fn get(&self, type_name: &str, id: i64) -> Result<Record, StorageError> {
        self.read(|ops, connection| ops.get(connection, type_name, id))
    }

    pub fn find(&self, type_name: &str, terms: &[SearchTerm]) -> Result<Vec<Record>, StorageError> {
        self.read(|ops, connection| ops.find(connection, type_name, terms))
    }

    pub fn get_instant(&self, type_name: &str, id: i64) -> Result<InstantRecord, StorageError> {
        self.read(|ops, connection| ops.get_instant(connection, type_name, id))
    }

    pub fn find_instants(
        &self,
        container_id: i64,
        type_name: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
        terms: &[SearchTerm],
    ) -> Result<Vec<InstantRecord>, StorageError> {
        self.read(|ops, connection| {
            ops.find_instants(connection, container_id, type_name, start, end, terms)
        })
    }

    pub fn get_interval_at(
        &self,
        container_id: i64,
        type_name: &str,
        instant: OffsetDateTime,
    ) -> Result<Option<IntervalRecord>, StorageError> {
        self.read(|ops, connection| {
            ops.get_interval_at(connection, container_id, type_name, instant)
        })
    }

    pub fn find_intervals(
        &self,
        container_id: i64,
        type_name: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
        terms: &[SearchTerm],
    ) -> Result<Vec<IntervalRecord>, StorageError> {
        self.read(|ops, connection| {
            ops.find_intervals(connection, container_id, type_name, start, end, terms)
        })
    }

    pub fn run_report(&self, query: &ReportQuery) -> Result<Report, StorageError> {
        self.read(|ops, connection| ops.run_report(connection, query))
    }
}

/// An active transaction. Mutations are only available here.
///
/// The connection is released exactly once: by [`Transaction::commit`],
/// [`Transaction::rollback`], or a rollback when the handle is dropped.
pub struct Transaction<'a, D: DataSource> {
    store: &'a Store<D>,
    context: &'a ExecutionContext,
    connection: Option<D::Connection>,
    id: TransactionId,
}

impl<'a, D: DataSource> Transaction<'a, D> {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    fn run<R>(
        &mut self,
        f: impl FnOnce(&Operations<'_>, &mut dyn Connection) -> Result<R, StorageError>,
    ) -> Result<R, StorageError> {
        let store = self.store;
        let connection = self.connection.as_mut().ok_or_else(|| {
            StorageError::Programming("transaction is no longer active".to_string())
        })?;
        f(&Operations::new(&store.registry), connection)
    }

    /// Creates a record of an auto-numbered type.
    pub fn create(
        &mut self,
        type_name: &str,
        attributes: &Attributes,
    ) -> Result<Record, StorageError> {
        self.run(|ops, connection| ops.create(connection, type_name, None, attributes))
    }

    /// Creates a record of a manually numbered type under `id`.
    pub fn create_with_id(
        &mut self,
        type_name: &str,
        id: i64,
        attributes: &Attributes,
    ) -> Result<Record, StorageError> {
        self.run(|ops, connection| ops.create(connection, type_name, Some(id), attributes))
    }

    pub fn get(&mut self, type_name: &str, id: i64) -> Result<Record, StorageError> {
        self.run(|ops, connection| ops.get(connection, type_name, id))
    }

    /// Overwrites the given attributes and returns the re-read record.
    pub fn update(
        &mut self,
        record: &Record,
        attributes: &Attributes,
    ) -> Result<Record, StorageError> {
        self.run(|ops, connection| ops.update(connection, record, attributes))
    }

    pub fn find(
        &mut self,
        type_name: &str,
        terms: &[SearchTerm],
    ) -> Result<Vec<Record>, StorageError> {
        self.run(|ops, connection| ops.find(connection, type_name, terms))
    }

    pub fn insert_instant(
        &mut self,
        container_id: i64,
        type_name: &str,
        instant: OffsetDateTime,
        attributes: &Attributes,
    ) -> Result<i64, StorageError> {
        self.run(|ops, connection| {
            ops.insert_instant(connection, container_id, type_name, instant, attributes)
        })
    }

    pub fn get_instant(&mut self, type_name: &str, id: i64) -> Result<InstantRecord, StorageError> {
        self.run(|ops, connection| ops.get_instant(connection, type_name, id))
    }

    pub fn update_instant(
        &mut self,
        container_id: i64,
        type_name: &str,
        id: i64,
        instant: OffsetDateTime,
        attributes: &Attributes,
    ) -> Result<InstantRecord, StorageError> {
        self.run(|ops, connection| {
            ops.update_instant(connection, container_id, type_name, id, instant, attributes)
        })
    }

    /// Deletes the container's instant records matching `terms` and returns how many went.
    pub fn delete_instants(
        &mut self,
        container_id: i64,
        type_name: &str,
        terms: &[SearchTerm],
    ) -> Result<u64, StorageError> {
        self.run(|ops, connection| ops.delete_instants(connection, container_id, type_name, terms))
    }

    pub fn find_instants(
        &mut self,
        container_id: i64,
        type_name: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
        terms: &[SearchTerm],
    ) -> Result<Vec<InstantRecord>, StorageError> {
        self.run(|ops, connection| {
            ops.find_instants(connection, container_id, type_name, start, end, terms)
        })
    }

    /// Sets the attributes over `[start, end)` of the container's timeline.
    pub fn update_interval(
        &mut self,
        container_id: i64,
        type_name: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
        attributes: &Attributes,
    ) -> Result<IntervalRecord, StorageError> {
        self.run(|ops, connection| {
            ops.update_interval(connection, container_id, type_name, start, end, attributes)
        })
    }

    pub fn get_interval_at(
        &mut self,
        container_id: i64,
        type_name: &str,
        instant: OffsetDateTime,
    ) -> Result<Option<IntervalRecord>, StorageError> {
        self.run(|ops, connection| {
            ops.get_interval_at(connection, container_id, type_name, instant)
        })
    }

    pub fn find_intervals(
        &mut self,
        container_id: i64,
        type_name: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
        terms: &[SearchTerm],
    ) -> Result<Vec<IntervalRecord>, StorageError> {
        self.run(|ops, connection| {
            ops.find_intervals(connection, container_id, type_name, start, end, terms)
        })
    }

    pub fn run_report(&mut self, query: &ReportQuery) -> Result<Report, StorageError> {
        self.run(|ops, connection| ops.run_report(connection, query))
    }

    pub fn commit(mut self) -> Result<(), StorageError> {
        self.finish(true)
    }

    pub fn rollback(mut self) -> Result<(), StorageError> {
        self.finish(false)
    }

    fn finish(&mut self, commit: bool) -> Result<(), StorageError> {
        let Some(mut connection) = self.connection.take() else {
            return Ok(());
        };
        self.context.active.store(false, Ordering::SeqCst);
        if commit {
            connection.commit()?;
            metrics::increment_counter!("tally_transactions_total", "state" => "committed");
            tracing::debug!(tx_id = self.id, "transaction committed");
        } else {
            connection.rollback()?;
            metrics::increment_counter!("tally_transactions_total", "state" => "rolled_back");
            tracing::debug!(tx_id = self.id, "transaction rolled back");
        }
        Ok(())
    }
}

impl<'a, D: DataSource> Drop for Transaction<'a, D> {
    fn drop(&mut self) {
        if self.connection.is_some() {
            tracing::warn!(tx_id = self.id, "transaction dropped without commit or rollback");
            if let Err(e) = self.finish(false) {
                tracing::error!(
                    tx_id = self.id,
                    error = %e,
                    "rollback of dropped transaction failed"
                );
            }
        }
    }
}
