//! Prometheus metrics and structured logging for tradelink.
//!
//! - Prometheus metrics for the persistent channel, request client,
//!   offline queue and replay
//! - Structured logging with tracing (JSON in production)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
