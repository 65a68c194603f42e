//! ## skarv-telemetry::logging
//! **Structured logging with tracing and OpenTelemetry**
//!
//! One `init` at process start; lifecycle events are logged through
//! `log_event` with OpenTelemetry key/values so a collector can pick
//! them up without parsing log lines.

use opentelemetry::KeyValue;
use tracing::{info_span, Instrument};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Initializes the global subscriber. `RUST_LOG` wins over the
    /// supplied default filter.
    pub fn init(default_filter: &str) {
        fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new(default_filter)),
            )
            .with_thread_names(true)
            .with_span_events(FmtSpan::ENTER)
            .init()
    }

    #[inline]
    pub async fn log_event(event_type: &str, metadata: Vec<KeyValue>) {
        let span = info_span!(
            "builder_event",
            event_type = event_type,
            otel.kind = "INTERNAL"
        );

        async {
            tracing::info!(
                metadata = ?metadata,
                "Builder lifecycle event"
            );
        }
        .instrument(span)
        .await
    }
}
