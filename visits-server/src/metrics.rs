use {
    std::{convert::Infallible, pin::Pin},
    tracing::{error, info},
    tokio::{net::TcpListener, time::sleep},
    hyper::{Request, Response, StatusCode, body::{Incoming, Bytes}, server::conn::http1},
    hyper_util::rt::{TokioIo, TokioTimer},
    http_body_util::Full,
    prometheus::{
        TextEncoder,
        Registry,
        IntGauge,
        IntCounter,
        register_int_gauge_with_registry,
        register_int_counter_with_registry,
    },
    crate::server::{VisitsServer, ACCEPT_ERROR_BACKOFF},
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    pub(crate) http_requests_total: IntCounter,
    pub(crate) http_requests_in_flight: IntGauge,
    pub(crate) visitor_increments_total: IntCounter,
    pub(crate) visitor_resets_total: IntCounter,
    pub(crate) storage_errors_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = register_int_counter_with_registry!("http_requests_total", "total http requests processed", registry)?;
        let http_requests_in_flight = register_int_gauge_with_registry!("http_requests_in_flight", "http requests being processed", registry)?;
        let visitor_increments_total = register_int_counter_with_registry!("visitor_increments_total", "visits counted", registry)?;
        let visitor_resets_total = register_int_counter_with_registry!("visitor_resets_total", "counter resets", registry)?;
        let storage_errors_total = register_int_counter_with_registry!("storage_errors_total", "counter operations failed in storage", registry)?;

        Ok(Self {
            registry,
            http_requests_total,
            http_requests_in_flight,
            visitor_increments_total,
            visitor_resets_total,
            storage_errors_total,
        })
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let metrics = self.registry.gather();
        let encoder = TextEncoder::new();
        encoder.encode_to_string(&metrics)
    }
}

impl VisitsServer {
    pub async fn run_metrics_server(&self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!("running metrics server on {addr:?}");
        }

        let metrics_server = MetricsServer::new(self.engine.metrics.clone());

        loop {
            let (tcp, _) = match listener.accept().await {
                Ok(v) => v,
                Err(err) => {
                    error!("failed to accept metrics connection: {err:?}");
                    sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            };
            let io = TokioIo::new(tcp);
            let metrics_server = metrics_server.clone();
            tokio::task::spawn(async move {
                if let Err(err) = http1::Builder::new()
                    .timer(TokioTimer::new())
                    .serve_connection(io, metrics_server)
                    .await {
                        error!("error while handling metrics request: {err:?}");
                    }
            });
        }
    }
}

#[derive(Clone)]
struct MetricsServer {
    metrics: Metrics,
}

impl MetricsServer {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            metrics,
        }
    }
}

impl hyper::service::Service<Request<Incoming>> for MetricsServer {
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, _req: Request<Incoming>) -> Self::Future {
        let response = match self.metrics.encode() {
            Ok(metrics) => Response::new(Full::new(Bytes::from(metrics))),
            Err(err) => {
                error!("failed to encode metrics: {err:?}");
                let mut response = Response::new(Full::new(Bytes::from_static(b"failed to encode metrics\n")));
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                response
            }
        };
        Box::pin(async move { Ok(response) })
    }
}

pub(crate) struct MetricGaugeDecreaseGuard {
    gauge: IntGauge,
}

impl MetricGaugeDecreaseGuard {
    pub(crate) fn wrap(gauge: IntGauge) -> Self {
        Self { gauge }
    }
}

impl Drop for MetricGaugeDecreaseGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}
