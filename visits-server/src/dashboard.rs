use {
    hyper::header::{self, HeaderValue},
    visits_core::HttpResponse,
};

const DASHBOARD_HTML: &str = include_str!("../static/dashboard.html");

pub(crate) fn dashboard_response() -> HttpResponse {
    HttpResponse::new()
        .with_header(header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"))
        .with_body(DASHBOARD_HTML)
}

#[cfg(test)]
mod tests {
    use {super::*, hyper::StatusCode};

    #[test]
    fn dashboard_is_html_and_uses_api_routes() {
        let response = dashboard_response();
        assert_eq!(StatusCode::OK, response.status);
        assert_eq!("text/html; charset=utf-8", response.headers().get(header::CONTENT_TYPE).unwrap());

        let body = String::from_utf8(response.body).unwrap();
        assert!(body.starts_with("<!doctype html>"));
        assert!(body.contains("fetch('/api/visitors')"));
        assert!(body.contains("fetch('/api/reset', { method: 'POST' })"));
    }
}
