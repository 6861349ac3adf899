use {
    serde::Serialize,
    thiserror::Error,
    http::{HeaderMap, StatusCode, header::{self, IntoHeaderName, HeaderValue}},
};

#[derive(Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: vec![],
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn with_header<K: IntoHeaderName>(mut self, header_name: K, header_value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(header_name, header_value.into());
        self
    }

    pub fn with_body(mut self, body: impl HttpResponseBody) -> Self {
        self.body = body.into_bytes();
        self
    }

    /// Serializes `value` as the body and marks the response as json.
    pub fn with_json<T: Serialize>(self, value: &T) -> Result<Self, HttpResponseError> {
        let body = serde_json::to_vec(value)
            .map_err(|err| HttpResponseError::SerializationFailed { reason: err.to_string() })?;
        Ok(self
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_body(body))
    }
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum HttpResponseError {
    #[error("failed to serialize response body: {reason}")]
    SerializationFailed { reason: String },
}

pub trait HttpResponseBody {
    fn into_bytes(self) -> Vec<u8>;
}

impl HttpResponseBody for Vec<u8> {
    fn into_bytes(self) -> Vec<u8> { self }
}

impl HttpResponseBody for String {
    fn into_bytes(self) -> Vec<u8> { self.into_bytes() }
}

impl HttpResponseBody for &str {
    fn into_bytes(self) -> Vec<u8> { self.as_bytes().to_vec() }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::CounterResponse,
    };

    #[test]
    fn json_body_sets_content_type() {
        let response = HttpResponse::new()
            .with_status(StatusCode::CREATED)
            .with_json(&CounterResponse::new(7))
            .unwrap();

        assert_eq!(StatusCode::CREATED, response.status);
        assert_eq!("application/json", response.headers().get(header::CONTENT_TYPE).unwrap());
        assert_eq!(br#"{"count":7}"#.to_vec(), response.body);
    }

    #[test]
    fn later_header_replaces_earlier() {
        let response = HttpResponse::new()
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
        assert_eq!("text/html", response.headers().get(header::CONTENT_TYPE).unwrap());
        assert_eq!(1, response.headers().len());
    }
}
