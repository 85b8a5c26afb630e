//! Request middleware

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use bookchat_common::metrics::RequestMetrics;

/// Record request count and latency per matched route. The matched path
/// template keeps label cardinality bounded.
pub async fn track_metrics(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let metrics = RequestMetrics::start(&method, &endpoint);
    let response = next.run(request).await;
    metrics.finish(response.status().as_u16());
    response
}
