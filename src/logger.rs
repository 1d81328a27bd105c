use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use opentelemetry::global;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, MetricExporter, Protocol, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt as tfmt};

pub const LOG_FILE: &str = "engine_bridge.log";
pub const REQUEST_FILE: &str = "requests.json";

/// Higher variants are more severe.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    /// The `EnvFilter` directive for this level. `tracing` has nothing above
    /// error, so critical filters like error.
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Critical => "critical",
            other => other.as_directive(),
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "critical" | "fatal" => Ok(LogLevel::Critical),
            other => Err(format!("unknown log level `{other}`")),
        }
    }
}

/// Keeps OTLP exporters alive; flushes them on drop.
#[derive(Default)]
pub struct TelemetryGuard {
    logger_provider: Option<SdkLoggerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.logger_provider.take() {
            let _ = provider.shutdown();
        }
        if let Some(provider) = self.meter_provider.take() {
            let _ = provider.shutdown();
        }
    }
}

/// Per-signal OTLP/HTTP URLs derived from one collector base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtlpEndpoints {
    pub logs: String,
    pub metrics: String,
}

impl OtlpEndpoints {
    /// `base` is the collector root, e.g. `http://localhost:4318`. A base that
    /// already names one signal path is cut back to the root first.
    pub fn from_base(base: &str) -> Self {
        let mut root = base.trim().trim_end_matches('/');
        for suffix in ["/v1/logs", "/v1/metrics", "/v1/traces"] {
            if let Some(stripped) = root.strip_suffix(suffix) {
                root = stripped;
                break;
            }
        }
        Self {
            logs: format!("{root}/v1/logs"),
            metrics: format!("{root}/v1/metrics"),
        }
    }
}

/// Install the global subscriber.
///
/// With an OTLP base endpoint, logs and dispatch metrics are exported over
/// OTLP/HTTP to their signal paths and echoed to stdout. Otherwise two daily-rolling files are
/// written under `log_dir`: a text log and a JSON log of `request` events.
pub fn init_tracing(log_dir: &Path, level: LogLevel, otel_endpoint: Option<&str>) -> Result<TelemetryGuard> {
    match otel_endpoint {
        Some(base) => init_otlp(level, &OtlpEndpoints::from_base(base)),
        None => init_files(log_dir, level),
    }
}

/// Plain stderr logging, for processes whose stdout carries protocol traffic.
pub fn init_stderr(level: LogLevel) -> Result<()> {
    tfmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_env_filter(EnvFilter::new(level.as_directive()))
        .try_init()
        .map_err(|err| anyhow::anyhow!("could not install stderr logger: {err}"))
}

fn init_files(log_dir: &Path, level: LogLevel) -> Result<TelemetryGuard> {
    std::fs::create_dir_all(log_dir).with_context(|| format!("creating log dir {}", log_dir.display()))?;

    let txt_layer = tfmt::layer()
        .with_writer(RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE))
        .with_ansi(false)
        .with_filter(EnvFilter::new(level.as_directive()));

    let json_layer = tfmt::layer()
        .json()
        .with_writer(RollingFileAppender::new(Rotation::DAILY, log_dir, REQUEST_FILE))
        .with_target(true)
        .with_filter(EnvFilter::new("request=info"));

    Registry::default()
        .with(txt_layer)
        .with(json_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(TelemetryGuard::default())
}

fn init_otlp(level: LogLevel, endpoints: &OtlpEndpoints) -> Result<TelemetryGuard> {
    let log_exporter = LogExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(&endpoints.logs)
        .build()
        .context("building OTLP log exporter")?;
    let logger_provider = SdkLoggerProvider::builder()
        .with_batch_exporter(log_exporter)
        .with_resource(resource())
        .build();

    let metric_exporter = MetricExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(&endpoints.metrics)
        .build()
        .context("building OTLP metric exporter")?;
    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(metric_exporter)
        .with_resource(resource())
        .build();
    global::set_meter_provider(meter_provider.clone());

    // keep the exporter's own HTTP stack out of the exported logs
    let otel_filter = EnvFilter::new(level.as_directive())
        .add_directive("hyper=off".parse()?)
        .add_directive("h2=off".parse()?)
        .add_directive("reqwest=off".parse()?);
    let otel_layer = OpenTelemetryTracingBridge::new(&logger_provider).with_filter(otel_filter);

    let fmt_layer = tfmt::layer()
        .with_thread_names(true)
        .with_filter(EnvFilter::new(level.as_directive()));

    Registry::default()
        .with(otel_layer)
        .with(fmt_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(TelemetryGuard {
        logger_provider: Some(logger_provider),
        meter_provider: Some(meter_provider),
    })
}

static RESOURCE: OnceLock<Resource> = OnceLock::new();

fn resource() -> Resource {
    RESOURCE
        .get_or_init(|| Resource::builder().with_service_name("engine-bridge").build())
        .clone()
}
