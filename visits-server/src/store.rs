use {
    std::{cell::RefCell, fs, path::{Path, PathBuf}, sync::Arc, time::Duration},
    tracing::{info, warn},
    rusqlite::{Connection, OptionalExtension, TransactionBehavior},
    rusqlite_migration::{Migrations, M},
    thread_local::ThreadLocal,
    crate::error::{StorageError, SchemaError, StoreOpenError},
};

const COUNTER_ID: i64 = 1;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MIGRATIONS: &[&str] = &[
    "create table if not exists visitors (
        id integer primary key check(id = 1),
        count integer not null check(count >= 0)
    )",
];

#[derive(Debug, Clone)]
pub struct StoreConfig {
    path: PathBuf,
    busy_timeout: Duration,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The single persisted visitor count.
///
/// Every worker thread lazily opens its own sqlite connection. Mutations run in
/// `BEGIN IMMEDIATE` transactions, so concurrent writers queue on the busy handler
/// and no increment is ever lost. Nothing is cached in memory: each call reads and
/// writes through to the database file.
#[derive(Clone)]
pub struct CounterStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    config: StoreConfig,
    connections: ThreadLocal<RefCell<Connection>>,
}

impl CounterStore {
    /// Opens the database at `config.path` and initializes it.
    pub fn open(config: StoreConfig) -> Result<Self, StoreOpenError> {
        let store = Self {
            inner: Arc::new(StoreInner {
                config,
                connections: ThreadLocal::new(),
            }),
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        self.inner.config.path()
    }

    /// Ensures the schema exists and the counter row is present. Safe to call repeatedly,
    /// an existing count is never touched.
    pub fn initialize(&self) -> Result<(), StoreOpenError> {
        let config = &self.inner.config;

        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|err| StorageError::CreateDirectory { path: parent.to_owned(), source: err })?;
            }
        }

        let mut connection = open_connection(config)?;

        let journal_mode: String = connection.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|err| StorageError::Pragma { pragma: "journal_mode", source: err })?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            warn!("sqlite refused wal journal mode, running with {journal_mode:?}");
        }

        migrations().to_latest(&mut connection)
            .map_err(|err| SchemaError::Migration { reason: err.to_string() })?;

        connection.prepare("select id, count from visitors where id = ?1")
            .map_err(|err| SchemaError::UnexpectedShape { reason: err.to_string() })?;

        let seeded = connection.execute("insert or ignore into visitors (id, count) values (?1, 0)", [COUNTER_ID])
            .map_err(StorageError::query)?;
        if seeded > 0 {
            info!("initialized visitor counter at 0");
        }

        let extra_rows: i64 = connection.query_row("select count(*) from visitors where id != ?1", [COUNTER_ID], |row| row.get(0))
            .map_err(StorageError::query)?;
        if extra_rows > 0 {
            return Err(SchemaError::UnexpectedRows { rows: extra_rows }.into());
        }

        let count: i64 = connection.query_row("select count from visitors where id = ?1", [COUNTER_ID], |row| row.get(0))
            .map_err(|err| SchemaError::UnexpectedShape { reason: err.to_string() })?;
        if count < 0 {
            return Err(SchemaError::NegativeCount { count }.into());
        }

        Ok(())
    }

    /// Atomically adds one visit and returns the new count.
    pub fn increment_and_get(&self) -> Result<i64, StorageError> {
        self.with_connection(|connection| {
            let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(StorageError::transaction)?;

            let count = transaction
                .query_row(
                    "update visitors set count = count + 1 where id = ?1 returning count",
                    [COUNTER_ID],
                    |row| row.get::<_, i64>(0),
                )
                .optional()
                .map_err(StorageError::query)?
                .ok_or(StorageError::CounterMissing)?;

            transaction.commit().map_err(StorageError::transaction)?;
            Ok(count)
        })
    }

    /// Sets the count back to zero. Always returns 0 on success.
    pub fn reset(&self) -> Result<i64, StorageError> {
        self.with_connection(|connection| {
            let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(StorageError::transaction)?;

            let updated = transaction.execute("update visitors set count = 0 where id = ?1", [COUNTER_ID])
                .map_err(StorageError::query)?;
            if updated == 0 {
                return Err(StorageError::CounterMissing);
            }

            transaction.commit().map_err(StorageError::transaction)?;
            Ok(0)
        })
    }

    /// Current count, without counting a visit.
    pub fn get(&self) -> Result<i64, StorageError> {
        self.with_connection(|connection| {
            connection.query_row("select count from visitors where id = ?1", [COUNTER_ID], |row| row.get::<_, i64>(0))
                .optional()
                .map_err(StorageError::query)?
                .ok_or(StorageError::CounterMissing)
        })
    }

    fn with_connection<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T, StorageError>) -> Result<T, StorageError> {
        let connection = self.inner.connections
            .get_or_try(|| open_connection(&self.inner.config).map(RefCell::new))?;
        let mut connection = connection.try_borrow_mut()
            .map_err(|err| StorageError::ConnectionAcquire { reason: err.to_string() })?;
        f(&mut connection)
    }
}

fn migrations() -> Migrations<'static> {
    Migrations::new(MIGRATIONS.iter().map(|migration| M::up(migration)).collect())
}

// journal_mode is persisted in the file by `initialize`, the rest is per connection.
fn open_connection(config: &StoreConfig) -> Result<Connection, StorageError> {
    let connection = Connection::open(&config.path).map_err(StorageError::ConnectionOpen)?;
    connection.busy_timeout(config.busy_timeout)
        .map_err(|err| StorageError::Pragma { pragma: "busy_timeout", source: err })?;
    connection.pragma_update(None, "synchronous", "FULL")
        .map_err(|err| StorageError::Pragma { pragma: "synchronous", source: err })?;
    Ok(connection)
}
