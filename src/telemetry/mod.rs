//! Tracing initialization for the dispatch service.
//!
//! Structured logs go through the `tracing` ecosystem. The subscriber is
//! configured from the environment:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `RUST_LOG` | Env-filter directives | `info` |
//! | `LOG_FORMAT` | `text` or `json` | `text` |

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Guard kept alive for the lifetime of the application.
///
/// Present so the init signature stays stable if a flushing writer (file
/// appender, OTLP exporter) is added later.
pub struct TelemetryGuard {
    _private: (),
}

/// Initialize the global tracing subscriber.
///
/// Must be called once, before any spans or events are emitted. Returns a
/// guard the caller should hold until shutdown.
pub fn init_telemetry() -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_output = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json_output {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(json = json_output, "Tracing initialized");

    TelemetryGuard { _private: () }
}
