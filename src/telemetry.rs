use opentelemetry::KeyValue;
use opentelemetry_sdk::{trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "tokenq=debug,tower_http=debug";

/// Install the global subscriber.
///
/// - `RUST_LOG` filters (default `tokenq=debug,tower_http=debug`).
/// - `TOKENQ_LOG_FORMAT=json` switches to one JSON object per line.
/// - `OTEL_EXPORTER_OTLP_ENDPOINT` adds an OTLP exporter.
pub fn init() {
    let json = std::env::var("TOKENQ_LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let otlp_error;
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        match opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "tokenq"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
        {
            Ok(tracer) => {
                otlp_error = None;
                Some(tracing_opentelemetry::layer().with_tracer(tracer))
            }
            Err(e) => {
                otlp_error = Some(e);
                None
            }
        }
    } else {
        otlp_error = None;
        None
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.into()),
        ))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .with(telemetry_layer)
        .init();

    if let Some(e) = otlp_error {
        tracing::warn!("OpenTelemetry exporter disabled, failed to install tracer: {}", e);
    }
}

/// Flush pending spans. No-op without an OTLP exporter.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}
