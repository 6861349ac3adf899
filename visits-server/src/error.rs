use {
    std::{io, path::PathBuf},
    thiserror::Error,
    rusqlite::ErrorCode,
};

/// Durable read or write of the counter failed.
/// Surfaced to the caller as-is, never retried by the store.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to create database directory {path:?}: {source:?}")]
    CreateDirectory {
        path: PathBuf,
        source: io::Error,
    },

    #[error("failed to open sqlite database: {0:?}")]
    ConnectionOpen(rusqlite::Error),

    #[error("failed to acquire sqlite connection: {reason}")]
    ConnectionAcquire {
        reason: String,
    },

    #[error("failed to set pragma {pragma}: {source:?}")]
    Pragma {
        pragma: &'static str,
        source: rusqlite::Error,
    },

    /// Busy timeout expired while waiting for another writer.
    #[error("database is locked: {0:?}")]
    Busy(rusqlite::Error),

    #[error("failed to run transaction: {0:?}")]
    Transaction(rusqlite::Error),

    #[error("failed to execute sqlite query: {0:?}")]
    Query(rusqlite::Error),

    #[error("counter row is missing")]
    CounterMissing,
}

impl StorageError {
    pub(crate) fn query(err: rusqlite::Error) -> Self {
        if is_busy(&err) {
            Self::Busy(err)
        } else {
            Self::Query(err)
        }
    }

    pub(crate) fn transaction(err: rusqlite::Error) -> Self {
        if is_busy(&err) {
            Self::Busy(err)
        } else {
            Self::Transaction(err)
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(err.sqlite_error_code(), Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked))
}

/// Database exists but is not in a state the counter can safely run on.
/// Fatal at startup.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("sql migration failed: {reason}")]
    Migration {
        reason: String,
    },

    #[error("visitors table has unexpected shape: {reason}")]
    UnexpectedShape {
        reason: String,
    },

    #[error("visitors table contains {rows} rows besides the counter row")]
    UnexpectedRows {
        rows: i64,
    },

    #[error("stored visitor count is negative: {count}")]
    NegativeCount {
        count: i64,
    },
}

#[derive(Error, Debug)]
pub enum StoreOpenError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
}

/// Outcome of handing a counter operation to the worker pool.
#[derive(Error, Debug)]
pub enum CounterOperationError {
    #[error("counter storage failed: {0}")]
    Storage(#[from] StorageError),

    /// Worker dropped the reply channel without answering, e.g. the job panicked.
    #[error("worker did not report a result")]
    WorkerLost,
}
