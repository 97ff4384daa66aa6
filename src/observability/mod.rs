//! # Observability Infrastructure
//!
//! Structured logging and the Prometheus metrics surface.

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{init_metrics, MetricsRecorder};
