//! Tracing and metrics initialization shared by every binary in the
//! workspace, plus the embedding-batch metric helpers the scheduler records.

use actix_web_prom::{PrometheusMetrics, PrometheusMetricsBuilder};
use anyhow::Result;
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use tracing_subscriber::{
    EnvFilter, Layer, Registry as TracingRegistry, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::config::{LogFormat, ObservabilityConfig};

static METRICS_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

struct EmbeddingMetrics {
    batch_duration: HistogramVec,
    batch_texts: IntCounterVec,
    batch_failures: IntCounterVec,
}

static EMBEDDING_METRICS: OnceCell<EmbeddingMetrics> = OnceCell::new();

/// Initialize the tracing subscriber. JSON output for production, a
/// human-readable format for development, selected by config.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let format_layer = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .with_target(true)
            .flatten_event(true)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .boxed(),
    };

    TracingRegistry::default()
        .with(env_filter)
        .with(format_layer)
        .try_init()?;

    Ok(())
}

/// Build the Prometheus HTTP middleware backed by the shared registry, so
/// custom metrics and request metrics are exposed on the same endpoint.
pub fn init_metrics(namespace: &str) -> Result<PrometheusMetrics> {
    let prometheus = PrometheusMetricsBuilder::new(namespace)
        .registry(METRICS_REGISTRY.clone())
        .endpoint("/metrics")
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build prometheus middleware: {e}"))?;

    Ok(prometheus)
}

fn embedding_metrics() -> &'static EmbeddingMetrics {
    EMBEDDING_METRICS.get_or_init(|| {
        let batch_duration = HistogramVec::new(
            HistogramOpts::new(
                "embedding_batch_duration_seconds",
                "Wall-clock duration of one embedding batch dispatch",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["model"],
        )
        .expect("embedding batch duration histogram");

        let batch_texts = IntCounterVec::new(
            Opts::new(
                "embedding_batch_texts_total",
                "Total texts encoded across embedding batches",
            ),
            &["model"],
        )
        .expect("embedding batch texts counter");

        let batch_failures = IntCounterVec::new(
            Opts::new(
                "embedding_batch_failures_total",
                "Total embedding batches that failed",
            ),
            &["model"],
        )
        .expect("embedding batch failures counter");

        // Registration only fails on duplicate names, and this runs once.
        let _ = METRICS_REGISTRY.register(Box::new(batch_duration.clone()));
        let _ = METRICS_REGISTRY.register(Box::new(batch_texts.clone()));
        let _ = METRICS_REGISTRY.register(Box::new(batch_failures.clone()));

        EmbeddingMetrics {
            batch_duration,
            batch_texts,
            batch_failures,
        }
    })
}

/// Record one dispatched embedding batch. Called once per batch with the
/// total duration, not once per request.
pub fn record_embedding_batch(model: &str, duration_secs: f64, text_count: usize, success: bool) {
    let metrics = embedding_metrics();
    metrics
        .batch_duration
        .with_label_values(&[model])
        .observe(duration_secs);
    metrics
        .batch_texts
        .with_label_values(&[model])
        .inc_by(text_count as u64);
    if !success {
        metrics.batch_failures.with_label_values(&[model]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_batch_metrics_accumulate() {
        record_embedding_batch("test-model", 0.05, 3, true);
        record_embedding_batch("test-model", 0.10, 2, false);

        let metrics = embedding_metrics();
        assert_eq!(
            metrics
                .batch_texts
                .with_label_values(&["test-model"])
                .get(),
            5
        );
        assert_eq!(
            metrics
                .batch_failures
                .with_label_values(&["test-model"])
                .get(),
            1
        );
    }
}
