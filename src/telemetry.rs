use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{trace as sdktrace, Resource};
use opentelemetry_semantic_conventions::resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Tracing setup: env-filtered subscriber, an OTLP span exporter when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set, and JSON or plain event formatting
/// selected by `RUST_LOG_FORMAT`.
pub fn init_telemetry(service_name: &str) {
    // sqlx/sea_orm statement logging drowns everything at info.
    let filter = EnvFilter::new(
        std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "info,wildtrace_server=info,sqlx=warn,sea_orm=warn".into()),
    );

    let otel_layer = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .map(|endpoint| {
            tracing_opentelemetry::layer().with_tracer(otlp_tracer(service_name, endpoint))
        });

    let registry = tracing_subscriber::registry().with(filter).with(otel_layer);

    match std::env::var("RUST_LOG_FORMAT").as_deref() {
        // Flattened JSON for log aggregation; the collector stamps its own time.
        Ok("json") => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .without_time(),
            )
            .init(),
        _ => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn otlp_tracer(service_name: &str, endpoint: String) -> sdktrace::Tracer {
    let resource = Resource::new(vec![KeyValue::new(
        resource::SERVICE_NAME,
        service_name.to_string(),
    )]);

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(
            sdktrace::config()
                .with_resource(resource)
                .with_sampler(sdktrace::Sampler::AlwaysOn),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .expect("failed to install OpenTelemetry tracer")
}
