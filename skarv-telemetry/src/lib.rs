//! # Skarv Telemetry and Monitoring
//!
//! Crate for structured logging and metrics of the event builder.

pub mod logging;
pub mod metrics;

pub use logging::EventLogger;
pub use metrics::MetricsRecorder;
