//! Request middleware: structured logging with a per-request span, and the
//! counters behind `GET /health`.

mod logging;
mod metrics;

pub use logging::RequestLogging;
pub use metrics::MetricsMiddleware;
