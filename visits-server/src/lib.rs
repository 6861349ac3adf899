pub use crate::{
    server::{VisitsServer, ServerInitError},
    store::{CounterStore, StoreConfig},
    error::{StorageError, SchemaError, StoreOpenError, CounterOperationError},
    metrics::Metrics,
};

pub mod config;
mod dashboard;
pub mod error;
mod http;
mod metrics;
mod server;
mod store;
