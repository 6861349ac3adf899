use serde::{Serialize, Deserialize};

pub use crate::response::{HttpResponse, HttpResponseBody, HttpResponseError};

pub mod response;

/// Body returned when the counter could not be incremented.
pub const ERROR_READ_COUNT: &str = "Unable to read visitor count";
/// Body returned when the counter could not be reset.
pub const ERROR_RESET_COUNT: &str = "Unable to reset visitor count";
/// Body returned for paths the server does not serve.
pub const ERROR_NOT_FOUND: &str = "Not found";
/// Body returned when the path exists but not for the request method.
pub const ERROR_METHOD_NOT_ALLOWED: &str = "Method not allowed";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct CounterResponse {
    pub count: i64,
}

impl CounterResponse {
    pub fn new(count: i64) -> Self {
        Self { count }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }
}
