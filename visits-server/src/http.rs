use {
    std::{convert::Infallible, pin::Pin, sync::Arc},
    tracing::{debug, error, warn},
    tokio::sync::oneshot,
    hyper::{
        Method,
        Request,
        Response,
        StatusCode,
        body::{Bytes, Incoming},
        header::{self, HeaderMap, HeaderValue},
    },
    http_body_util::Full,
    serde::Serialize,
    visits_core::{
        HttpResponse,
        CounterResponse,
        ErrorResponse,
        ERROR_READ_COUNT,
        ERROR_RESET_COUNT,
        ERROR_NOT_FOUND,
        ERROR_METHOD_NOT_ALLOWED,
    },
    crate::{
        server::Engine,
        error::{CounterOperationError, StorageError},
        metrics::MetricGaugeDecreaseGuard,
        dashboard::dashboard_response,
    },
};

const PATH_DASHBOARD: &str = "/";
const PATH_VISITORS: &str = "/api/visitors";
const PATH_RESET: &str = "/api/reset";
const API_PREFIX: &str = "/api/";

const CORS_ALLOW_METHODS: &str = "GET, POST, OPTIONS";

#[derive(Clone)]
pub struct HttpHandler {
    engine: Arc<Engine>,
}

impl HttpHandler {
    pub(crate) fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
        }
    }
}

impl hyper::service::Service<Request<Incoming>> for HttpHandler {
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let engine = self.engine.clone();

        Box::pin(async move {
            engine.metrics.http_requests_total.inc();
            engine.metrics.http_requests_in_flight.inc();
            let _metric_guard_http_requests_in_flight = MetricGaugeDecreaseGuard::wrap(engine.metrics.http_requests_in_flight.clone());

            let route = Route::resolve(req.method(), req.uri().path());
            debug!(method = %req.method(), path = req.uri().path(), ?route, "handling request");

            let response = engine.handle(route, req.headers()).await;
            Ok(into_hyper_response(response))
        })
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum Route {
    Dashboard,
    Visitors,
    Reset,
    Preflight,
    MethodNotAllowed { allow: &'static str, api: bool },
    NotFound { api: bool },
}

impl Route {
    pub(crate) fn resolve(method: &Method, path: &str) -> Self {
        match path {
            PATH_DASHBOARD => {
                if method == Method::GET || method == Method::HEAD {
                    Self::Dashboard
                } else {
                    Self::MethodNotAllowed { allow: "GET, HEAD", api: false }
                }
            },
            PATH_VISITORS => {
                if method == Method::GET {
                    Self::Visitors
                } else if method == Method::OPTIONS {
                    Self::Preflight
                } else {
                    Self::MethodNotAllowed { allow: "GET, OPTIONS", api: true }
                }
            },
            PATH_RESET => {
                if method == Method::POST {
                    Self::Reset
                } else if method == Method::OPTIONS {
                    Self::Preflight
                } else {
                    Self::MethodNotAllowed { allow: "POST, OPTIONS", api: true }
                }
            },
            other => Self::NotFound { api: other.starts_with(API_PREFIX) },
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum CounterOperation {
    Increment,
    Reset,
}

impl Engine {
    async fn handle(&self, route: Route, request_headers: &HeaderMap) -> HttpResponse {
        match route {
            Route::Dashboard => dashboard_response(),
            Route::Visitors => {
                let result = self.run_counter_operation(CounterOperation::Increment).await;
                match &result {
                    Ok(_) => self.metrics.visitor_increments_total.inc(),
                    Err(err) => {
                        self.metrics.storage_errors_total.inc();
                        error!("failed to increment visitor count: {err:?}");
                    }
                }
                with_cors(counter_response(result, ERROR_READ_COUNT))
            },
            Route::Reset => {
                let result = self.run_counter_operation(CounterOperation::Reset).await;
                match &result {
                    Ok(_) => {
                        self.metrics.visitor_resets_total.inc();
                        warn!("visitor counter reset by request");
                    },
                    Err(err) => {
                        self.metrics.storage_errors_total.inc();
                        error!("failed to reset visitor count: {err:?}");
                    }
                }
                with_cors(counter_response(result, ERROR_RESET_COUNT))
            },
            Route::Preflight => preflight_response(request_headers),
            Route::MethodNotAllowed { allow, api } => {
                let response = json_response(StatusCode::METHOD_NOT_ALLOWED, &ErrorResponse::new(ERROR_METHOD_NOT_ALLOWED))
                    .with_header(header::ALLOW, HeaderValue::from_static(allow));
                if api { with_cors(response) } else { response }
            },
            Route::NotFound { api } => {
                let response = json_response(StatusCode::NOT_FOUND, &ErrorResponse::new(ERROR_NOT_FOUND));
                if api { with_cors(response) } else { response }
            },
        }
    }

    /// Runs the operation on the worker pool. Once a worker has picked it up the
    /// operation completes even if the client is gone by then.
    async fn run_counter_operation(&self, operation: CounterOperation) -> Result<i64, CounterOperationError> {
        let store = self.store.clone();
        self.run_on_worker(operation, move || match operation {
            CounterOperation::Increment => store.increment_and_get(),
            CounterOperation::Reset => store.reset(),
        }).await
    }

    async fn run_on_worker<F>(&self, operation: CounterOperation, job: F) -> Result<i64, CounterOperationError>
    where
        F: FnOnce() -> Result<i64, StorageError> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        self.thread_pool.spawn(move || {
            if tx.send(job()).is_err() {
                debug!("request for {operation:?} went away before it completed");
            }
        });

        match rx.await {
            Ok(result) => result.map_err(CounterOperationError::from),
            Err(_) => Err(CounterOperationError::WorkerLost),
        }
    }
}

/// Maps a counter operation outcome to the wire. Details of the failure never reach the client.
fn counter_response(result: Result<i64, CounterOperationError>, error_message: &'static str) -> HttpResponse {
    match result {
        Ok(count) => json_response(StatusCode::OK, &CounterResponse::new(count)),
        Err(_) => json_response(StatusCode::INTERNAL_SERVER_ERROR, &ErrorResponse::new(error_message)),
    }
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> HttpResponse {
    match HttpResponse::new().with_status(status).with_json(value) {
        Ok(v) => v,
        Err(err) => {
            error!("failed to serialize response: {err:?}");
            response_internal_error()
        }
    }
}

fn with_cors(response: HttpResponse) -> HttpResponse {
    response.with_header(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"))
}

fn preflight_response(request_headers: &HeaderMap) -> HttpResponse {
    let allow_headers = request_headers.get(header::ACCESS_CONTROL_REQUEST_HEADERS)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("*"));

    with_cors(HttpResponse::new().with_status(StatusCode::NO_CONTENT))
        .with_header(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(CORS_ALLOW_METHODS))
        .with_header(header::ACCESS_CONTROL_ALLOW_HEADERS, allow_headers)
}

fn response_internal_error() -> HttpResponse {
    HttpResponse::new().with_status(StatusCode::INTERNAL_SERVER_ERROR).with_body("internal server error\n")
}

// hyper omits the body on its own when answering HEAD.
fn into_hyper_response(response: HttpResponse) -> Response<Full<Bytes>> {
    let HttpResponse { status, headers, body } = response;
    let mut hyper_response = Response::new(Full::new(Bytes::from(body)));
    *hyper_response.status_mut() = status;
    *hyper_response.headers_mut() = headers;
    hyper_response
}
