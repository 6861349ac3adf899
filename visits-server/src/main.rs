// a storage hiccup should turn into a 500, never a crashed server
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

use {
    std::process::exit,
    tracing::{info, error},
    tracing_subscriber::FmtSubscriber,
    clap::Parser,
    tokio::net::TcpListener,
    visits_server::{
        CounterStore,
        StoreConfig,
        StoreOpenError,
        VisitsServer,
        config::{Args, ServerConfig},
    },
};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    FmtSubscriber::builder().with_max_level(args.log_level).init();

    let config = match ServerConfig::load(&args) {
        Ok(v) => v,
        Err(err) => {
            error!("failed to load config: {err}");
            exit(-1);
        }
    };

    info!("opening visitor counter database at {:?}", config.database_path);
    let store = match CounterStore::open(StoreConfig::new(&config.database_path).with_busy_timeout(config.busy_timeout)) {
        Ok(v) => v,
        Err(StoreOpenError::Schema(err)) => {
            error!("refusing to start, database schema is not usable: {err}");
            exit(-1);
        },
        Err(StoreOpenError::Storage(err)) => {
            error!("failed to open visitor counter database: {err}");
            exit(-1);
        },
    };

    match store.get() {
        Ok(count) => info!("visitor count is {count}"),
        Err(err) => error!("failed to read visitor count: {err}"),
    }

    let server = match VisitsServer::with_workers(store, config.workers) {
        Ok(v) => v,
        Err(err) => {
            error!("failed to create server: {err}");
            exit(-1);
        }
    };

    if let Some(metrics_port) = config.metrics_port {
        let metrics_addr = (config.addr.ip(), metrics_port);
        match TcpListener::bind(metrics_addr).await {
            Ok(listener) => {
                let server = server.clone();
                tokio::spawn(async move { server.run_metrics_server(listener).await });
            },
            Err(err) => {
                error!("failed to bind metrics server to {metrics_addr:?}: {err}");
                exit(-1);
            }
        }
    }

    let listener = match TcpListener::bind(config.addr).await {
        Ok(v) => v,
        Err(err) => {
            error!("failed to bind to {:?}: {err}", config.addr);
            exit(-1);
        }
    };

    tokio::select! {
        _ = server.serve(listener) => {},
        _ = tokio::signal::ctrl_c() => info!("received ctrl-c, shutting down"),
    }
}
