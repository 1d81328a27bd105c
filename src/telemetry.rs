use std::future::Future;
use std::time::Instant;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use tracing::{debug, warn};

use crate::instance::InstanceId;

/// Counters and latency for command round-trips.
///
/// Instruments come from the global meter, which stays a no-op unless an
/// OTLP endpoint was configured at startup.
#[derive(Clone)]
pub struct DispatchTelemetry {
    pub dispatch_started: Counter<u64>,
    pub dispatch_succeeded: Counter<u64>,
    pub dispatch_failed: Counter<u64>,
    pub dispatch_latency_ms: Histogram<f64>,
}

impl DispatchTelemetry {
    pub fn new() -> Self {
        let meter = global::meter("engine-bridge");

        let dispatch_started = meter
            .u64_counter("dispatch_started")
            .with_description("Commands sent to an engine instance")
            .build();
        let dispatch_succeeded = meter.u64_counter("dispatch_succeeded").build();
        let dispatch_failed = meter.u64_counter("dispatch_failed").build();
        let dispatch_latency_ms = meter
            .f64_histogram("dispatch_latency_ms")
            .with_description("Round-trip latency per command in ms")
            .with_unit("ms")
            .build();

        Self {
            dispatch_started,
            dispatch_succeeded,
            dispatch_failed,
            dispatch_latency_ms,
        }
    }

    /// Run one command round-trip, recording metrics and a `request` event.
    pub async fn instrument<F, Fut, T, E>(&self, operation: &str, instance: InstanceId, call: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attrs = [KeyValue::new("operation", operation.to_string())];
        self.dispatch_started.add(1, &attrs);
        let start = Instant::now();

        let result = call().await;

        let elapsed = start.elapsed().as_secs_f64() * 1_000.0;
        self.dispatch_latency_ms.record(elapsed, &attrs);

        match &result {
            Ok(_) => {
                self.dispatch_succeeded.add(1, &attrs);
                debug!(instance = %instance, "`{operation}` succeeded in {elapsed:.2} ms");
            }
            Err(err) => {
                self.dispatch_failed.add(1, &attrs);
                warn!(instance = %instance, error = %err, "`{operation}` failed in {elapsed:.2} ms");
            }
        }

        tracing::event!(
            target: "request",
            tracing::Level::INFO,
            request = operation,
            instance = instance.get(),
            latency_ms = elapsed,
            status = if result.is_ok() { "ok" } else { "error" },
        );

        result
    }
}

impl Default for DispatchTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DispatchTelemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DispatchTelemetry")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn instrument_passes_the_result_through() {
        let telemetry = DispatchTelemetry::new();

        let ok: Result<u32, String> = telemetry.instrument("isReady", InstanceId(1), || async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));

        let err: Result<u32, String> = telemetry
            .instrument("isReady", InstanceId(1), || async { Err("boom".to_string()) })
            .await;
        assert_eq!(err, Err("boom".to_string()));
    }
}
