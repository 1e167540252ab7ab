//! Request-level middleware: structured request logs and per-route metrics.

pub mod logging;
pub mod metrics;

pub use logging::RequestLogging;
pub use metrics::MetricsMiddleware;

use actix_web::HttpRequest;

/// Route template the request matched, e.g. `/api/v1/sessions/{session_id}/merge`.
///
/// Ids stay out of metric keys this way. Requests that matched no route share one key.
pub(crate) fn route_template(req: &HttpRequest) -> String {
    req.match_pattern().unwrap_or_else(|| "<unmatched>".to_string())
}
