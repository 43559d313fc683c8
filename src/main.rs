use std::{sync::Arc, time::Duration};

use clap::Parser;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, Tracer};
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};
use upstream_controller::{configuration::Configuration, gateway::InMemoryUpstreamCache};

const LOG_FILE: &str = "upstream-controller.log";
const OTLP_ENDPOINT: &str = "http://127.0.0.1:4317";

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct CommandArgs {
    #[arg(long)]
    with_config_file: String,
}

/// `UPSTREAM_CONTROLLER_<name>` with `RUST_LOG` style directives, falling back to `default`.
fn env_filter(name: &str, default: &str) -> EnvFilter {
    EnvFilter::new(std::env::var(format!("UPSTREAM_CONTROLLER_{name}")).unwrap_or_else(|_| default.to_owned()))
}

fn otlp_tracer(service_name: &str) -> upstream_controller::Result<Tracer> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(OTLP_ENDPOINT)
        .with_timeout(Duration::from_secs(3))
        .build()?;
    let provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_id_generator(RandomIdGenerator::default())
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(opentelemetry_sdk::Resource::new(vec![opentelemetry::KeyValue::new("service.name", service_name.to_owned())]))
        .build();
    Ok(provider.tracer(service_name.to_owned()))
}

/// Console and file output carry events only; spans go to the OTLP exporter when it is enabled.
fn init_tracing(configuration: &Configuration) -> WorkerGuard {
    let (file_writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(".", LOG_FILE));

    let console_layer = fmt::layer()
        .event_format(fmt::format().compact())
        .with_span_events(FmtSpan::NONE)
        .with_ansi(false)
        .with_filter(filter::filter_fn(|meta| !meta.is_span()))
        .with_filter(env_filter("LOG", "info"));
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_span_events(FmtSpan::NONE)
        .with_ansi(false)
        .with_filter(filter::filter_fn(|meta| !meta.is_span()))
        .with_filter(env_filter("FILE_LOG", "debug"));

    let (tracer, tracer_error) = match configuration.enable_open_telemetry {
        Some(true) => match otlp_tracer(&configuration.controller_name) {
            Ok(tracer) => (Some(tracer), None),
            Err(e) => (None, Some(e)),
        },
        _ => (None, None),
    };
    let telemetry_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer).with_filter(env_filter("TRACE_LOG", "info")));

    Registry::default().with(console_layer).with(file_layer).with(telemetry_layer).init();
    if let Some(e) = tracer_error {
        warn!("OpenTelemetry exporter unavailable, tracing to {OTLP_ENDPOINT} disabled {e:?}");
    }
    guard
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> upstream_controller::Result<()> {
    let args = CommandArgs::parse();
    let configuration: Configuration = serde_yaml::from_str(&std::fs::read_to_string(args.with_config_file)?)?;
    let _guard = init_tracing(&configuration);

    configuration.validate()?;

    let gateway = InMemoryUpstreamCache::new([configuration.default_cluster_name.clone()]);
    gateway.mark_synced();
    upstream_controller::start(configuration, Arc::new(gateway)).await
}
