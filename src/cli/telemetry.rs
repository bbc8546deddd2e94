//! Log formatting plus an optional OTLP/gRPC span exporter.
//!
//! Spans are only exported when `OTEL_EXPORTER_OTLP_ENDPOINT` is set; without
//! it casekeeper logs to stdout and nothing else.

use anyhow::{anyhow, Context, Result};
use once_cell::sync::OnceCell;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{Compression, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
    Resource,
};
use std::{env::var, time::Duration};
use tonic::{
    metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{debug, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use ulid::Ulid;

const ENV_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
const ENV_HEADERS: &str = "OTEL_EXPORTER_OTLP_HEADERS";
const ENV_INSTANCE_ID: &str = "OTEL_SERVICE_INSTANCE_ID";
const ENV_ENVIRONMENT: &str = "CASEKEEPER_ENVIRONMENT";

const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

/// Where and how spans are shipped, read once from the environment.
#[derive(Debug)]
struct ExporterSettings {
    endpoint: String,
    tls_domain: Option<String>,
    metadata: MetadataMap,
}

impl ExporterSettings {
    fn from_env() -> Result<Option<Self>> {
        let Ok(endpoint) = var(ENV_ENDPOINT) else {
            return Ok(None);
        };
        let endpoint = endpoint.trim().trim_end_matches('/');
        if endpoint.is_empty() {
            return Ok(None);
        }

        let endpoint = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("https://{endpoint}")
        };
        let tls_domain = endpoint
            .strip_prefix("https://")
            .and_then(|rest| rest.split(['/', ':']).next())
            .filter(|host| !host.is_empty())
            .map(str::to_string);
        let metadata = var(ENV_HEADERS)
            .map_or_else(|_| Ok(MetadataMap::new()), |headers| header_metadata(&headers))?;

        Ok(Some(Self {
            endpoint,
            tls_domain,
            metadata,
        }))
    }
}

/// `key=value,key=value` into gRPC metadata. Pairs without `=` are skipped.
fn header_metadata(headers: &str) -> Result<MetadataMap> {
    let mut map = MetadataMap::new();
    for (key, value) in headers.split(',').filter_map(|pair| pair.split_once('=')) {
        let key = key.trim().to_ascii_lowercase();
        let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
            .map_err(|err| anyhow!("invalid {ENV_HEADERS} key {key}: {err}"))?;
        let value: MetadataValue<Ascii> = value
            .trim()
            .parse()
            .map_err(|err| anyhow!("invalid {ENV_HEADERS} value for {key}: {err}"))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Attributes every exported span carries.
fn resource() -> Resource {
    let mut attributes = vec![
        KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        KeyValue::new(
            "service.instance.id",
            var(ENV_INSTANCE_ID).unwrap_or_else(|_| Ulid::new().to_string()),
        ),
        KeyValue::new("vcs.ref.head.revision", crate::GIT_COMMIT_HASH),
    ];
    if let Ok(environment) = var(ENV_ENVIRONMENT) {
        attributes.push(KeyValue::new("deployment.environment.name", environment));
    }
    Resource::builder_empty().with_attributes(attributes).build()
}

fn filter(level: Level) -> Result<EnvFilter> {
    Ok(EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?))
}

fn tracer(settings: ExporterSettings) -> Result<Tracer> {
    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&settings.endpoint)
        .with_compression(Compression::Gzip)
        .with_timeout(EXPORT_TIMEOUT)
        .with_metadata(settings.metadata);
    if let Some(domain) = settings.tls_domain {
        builder = builder.with_tls_config(
            ClientTlsConfig::new()
                .domain_name(domain)
                .with_native_roots(),
        );
    }
    let exporter = builder
        .build()
        .with_context(|| format!("failed to build span exporter for {}", settings.endpoint))?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource())
        .build();

    let _ = TRACER_PROVIDER.set(provider.clone());
    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));

    Ok(provider.tracer(env!("CARGO_PKG_NAME")))
}

/// Install the global subscriber. `None` logs errors only.
///
/// # Errors
///
/// Returns an error if the OTLP settings are malformed or a subscriber is already installed
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_target(false)
        .pretty();
    let filter = filter(verbosity_level.unwrap_or(Level::ERROR))?;

    match ExporterSettings::from_env()? {
        Some(settings) => {
            debug!(endpoint = %settings.endpoint, "exporting spans");
            let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer(settings)?);
            tracing::subscriber::set_global_default(
                Registry::default()
                    .with(fmt_layer)
                    .with(otel_layer)
                    .with(filter),
            )?;
        }
        None => {
            tracing::subscriber::set_global_default(
                Registry::default().with(fmt_layer).with(filter),
            )?;
        }
    }

    Ok(())
}

/// Flush pending spans. Does nothing when no exporter was started.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(err) = provider.shutdown() {
            debug!("tracer shutdown: {err}");
        }
    }
}
