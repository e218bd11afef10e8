//! Tracing initialisation for the bridge.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `ALTHERMA_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP collector base URL (e.g. `http://localhost:4318`). When set, spans are exported over OTLP/HTTP. |
//!
//! # Example
//!
//! ```rust,no_run
//! // Keep the guard alive until the process exits.
//! let _guard = altherma_runtime::telemetry::init_tracing("altherma-mqtt");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of the console log layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    /// `json` selects [`LogFormat::Json`]; anything else, or nothing, is
    /// compact.
    pub fn from_setting(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Install the global `tracing` subscriber.
///
/// Hold the returned [`TracerProviderGuard`] for the lifetime of the
/// process; dropping it flushes exported spans.  Calling this twice leaves
/// the first subscriber in place.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let format = LogFormat::from_setting(std::env::var("ALTHERMA_LOG_FORMAT").ok().as_deref());

    let provider = build_provider(service_name);
    let otel_layer = provider.as_ref().map(|p| {
        tracing_opentelemetry::layer().with_tracer(p.tracer(service_name.to_string()))
    });
    let fmt_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer().compact().boxed(),
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .with(otel_layer)
        .try_init()
    {
        eprintln!("[altherma] tracing already initialised: {e}");
    }

    TracerProviderGuard(provider)
}

/// Shuts the OTLP tracer provider down on drop, flushing pending spans.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[altherma] OpenTelemetry shutdown error: {e}");
        }
    }
}

/// `None` unless `OTEL_EXPORTER_OTLP_ENDPOINT` is set and the exporter
/// builds.
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[altherma] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    // The simple exporter needs no runtime; tracing is set up before the
    // tokio runtime exists.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_setting() {
        assert_eq!(LogFormat::from_setting(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::from_setting(Some("JSON")), LogFormat::Json);
        assert_eq!(LogFormat::from_setting(Some("pretty")), LogFormat::Compact);
        assert_eq!(LogFormat::from_setting(None), LogFormat::Compact);
    }

    #[test]
    fn no_provider_without_endpoint() {
        // SAFETY: no other test in this crate reads this variable.
        unsafe { std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT") };
        assert!(build_provider("altherma-test").is_none());
    }

    #[test]
    fn empty_guard_drops_cleanly() {
        drop(TracerProviderGuard(None));
    }
}
