use {
    std::{any::Any, sync::Arc, time::Duration},
    tracing::{error, info, warn},
    thiserror::Error,
    tokio::{net::TcpListener, time::sleep},
    hyper_util::rt::tokio::{TokioIo, TokioTimer},
    hyper::server::conn::http1,
    rayon::{ThreadPool, ThreadPoolBuilder, ThreadPoolBuildError},
    crate::{
        store::CounterStore,
        http::HttpHandler,
        metrics::Metrics,
    },
};

pub(crate) const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Visitor counter http server. Cheap to clone, all clones share one store and worker pool.
#[derive(Clone)]
pub struct VisitsServer {
    pub(crate) engine: Arc<Engine>,
}

pub(crate) struct Engine {
    pub(crate) store: CounterStore,
    pub(crate) thread_pool: ThreadPool,
    pub(crate) metrics: Metrics,
}

#[derive(Error, Debug)]
pub enum ServerInitError {
    #[error("failed to build worker pool: {0:?}")]
    ThreadPool(#[from] ThreadPoolBuildError),

    #[error("failed to register metrics: {0:?}")]
    Metrics(#[from] prometheus::Error),
}

impl VisitsServer {
    pub fn new(store: CounterStore) -> Result<Self, ServerInitError> {
        Self::with_workers(store, None)
    }

    /// `workers` sets the size of the pool that runs counter operations, rayon picks
    /// one thread per cpu when it is `None`.
    pub fn with_workers(store: CounterStore, workers: Option<usize>) -> Result<Self, ServerInitError> {
        // a panicking job drops its reply channel, which the handler turns into a 500
        let mut thread_pool = ThreadPoolBuilder::new()
            .thread_name(|index| format!("visits-worker-{index}"))
            .panic_handler(|panic| error!("counter operation panicked on worker pool: {}", panic_message(&*panic)));
        if let Some(workers) = workers {
            thread_pool = thread_pool.num_threads(workers);
        }

        Ok(Self {
            engine: Arc::new(Engine {
                store,
                thread_pool: thread_pool.build()?,
                metrics: Metrics::new()?,
            }),
        })
    }

    pub fn store(&self) -> &CounterStore {
        &self.engine.store
    }

    pub fn metrics(&self) -> &Metrics {
        &self.engine.metrics
    }

    /// Accepts connections until the task is dropped.
    pub async fn serve(&self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!(workers = self.engine.thread_pool.current_num_threads(), "running on {addr:?}");
        }

        let http_handler = HttpHandler::new(self.engine.clone());

        loop {
            let (tcp, remote_addr) = match listener.accept().await {
                Ok(v) => v,
                Err(err) => {
                    error!("failed to accept connection: {err:?}");
                    sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            };
            let io = TokioIo::new(tcp);

            let http_handler = http_handler.clone();
            tokio::task::spawn(async move {
                if let Err(err) = http1::Builder::new()
                    .timer(TokioTimer::new())
                    .serve_connection(io, http_handler)
                    .await {
                        warn!("error while serving connection from {remote_addr:?}: {err:?}");
                    }
            });
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
