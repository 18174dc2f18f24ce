//! OpenTelemetry wiring, enabled only when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
//!
//! Mirrors the teacher's `main.rs` split between a plain `tracing-subscriber`
//! registry and an optional OTLP layer grafted on top.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use tracing_subscriber::Layer;

/// Build the OpenTelemetry tracing layer, reading the collector endpoint
/// from the environment (`OTEL_EXPORTER_OTLP_ENDPOINT`).
///
/// Returns `None` if the exporter cannot be constructed; callers fall back
/// to plain stdout logging in that case rather than failing startup.
pub fn init_telemetry<S>() -> Option<impl Layer<S>>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?)
        .build()
        .ok()?;

    let provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(opentelemetry_sdk::Resource::new(vec![
            opentelemetry::KeyValue::new("service.name", "storage-control-plane"),
        ]))
        .build();

    let tracer = provider.tracer("storage-control-plane");
    opentelemetry::global::set_tracer_provider(provider);

    Some(tracing_opentelemetry::layer().with_tracer(tracer))
}

/// Flush any batched spans before process exit.
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}
