//! Telemetry setup for OpenTelemetry integration

use anyhow::Result;
use tracing_subscriber::{Layer, Registry};

/// Extra subscriber layer contributed by telemetry, if any
pub type TelemetryLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Handle to the trace exporter
///
/// Inactive unless the `telemetry` feature is compiled in and
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set. Call [`Telemetry::shutdown`] before
/// exit so buffered spans are flushed.
pub struct Telemetry {
    #[cfg(feature = "telemetry")]
    provider: Option<opentelemetry_sdk::trace::TracerProvider>,
    endpoint: Option<String>,
}

impl Telemetry {
    pub fn disabled() -> Self {
        Self {
            #[cfg(feature = "telemetry")]
            provider: None,
            endpoint: None,
        }
    }

    #[cfg(feature = "telemetry")]
    pub fn is_active(&self) -> bool {
        self.provider.is_some()
    }

    #[cfg(not(feature = "telemetry"))]
    pub fn is_active(&self) -> bool {
        false
    }

    /// OTLP endpoint from the environment, whether or not export is active
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn shutdown(self) {
        #[cfg(feature = "telemetry")]
        if let Some(provider) = self.provider {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "OpenTelemetry shutdown failed");
            }
        }
    }
}

/// Initialize OpenTelemetry if enabled
///
/// Runs before the subscriber is installed; the returned layer is added to
/// it. Nothing is logged here.
///
/// # Environment Variables
///
/// - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (e.g., http://localhost:4317)
/// - `OTEL_SERVICE_NAME`: Service name (default: keel-migrate)
///
/// # Example
///
/// ```text
/// OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 \
/// OTEL_SERVICE_NAME=keel-migrate-staging \
///     keel-migrate migrate
/// ```
pub fn init_telemetry() -> Result<(Telemetry, Option<TelemetryLayer>)> {
    let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") else {
        return Ok((Telemetry::disabled(), None));
    };

    init_telemetry_impl(endpoint)
}

#[cfg(not(feature = "telemetry"))]
fn init_telemetry_impl(endpoint: String) -> Result<(Telemetry, Option<TelemetryLayer>)> {
    // Reported by the caller once logging is up
    let telemetry = Telemetry {
        endpoint: Some(endpoint),
    };
    Ok((telemetry, None))
}

#[cfg(feature = "telemetry")]
fn init_telemetry_impl(endpoint: String) -> Result<(Telemetry, Option<TelemetryLayer>)> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::{SpanExporter, WithExportConfig};
    use opentelemetry_sdk::{runtime, trace::TracerProvider, Resource};

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "keel-migrate".to_string());

    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .build()?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            service_name.clone(),
        )]))
        .build();

    let tracer = provider.tracer(service_name);
    let layer: TelemetryLayer = Box::new(tracing_opentelemetry::layer().with_tracer(tracer));

    let telemetry = Telemetry {
        provider: Some(provider),
        endpoint: Some(endpoint),
    };
    Ok((telemetry, Some(layer)))
}
