use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tracing::Instrument;
use uuid::Uuid;

/// Tags each request with an id, preferring the Lambda trace id so callback
/// logs line up with the function's own logs. The id is echoed back as
/// `x-request-id`.
pub async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = ["x-request-id", "x-amzn-trace-id"]
        .iter()
        .find_map(|name| req.headers().get(*name))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = tracing::info_span!("request", id = %request_id, method = %req.method(), uri = %req.uri());
    let mut response = next.run(req).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}
