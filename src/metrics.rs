use axum::{routing::get, Router};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and describe the pipeline series.
    pub fn init() -> Result<Self, BuildError> {
        // Use default buckets to avoid API differences across crate versions.
        let handle = PrometheusBuilder::new().install_recorder()?;
        describe();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

fn describe() {
    describe_counter!("sentiment_analyses_total", "Sentiment analyses by fusion method.");
    describe_counter!("sentiment_label_total", "Final sentiment labels (NEG/NEU/POS).");
    describe_histogram!(
        "neural_inference_ms",
        Unit::Milliseconds,
        "Latency of neural classifier calls."
    );
    describe_counter!(
        "neural_fallbacks_total",
        "Analyses that fell back from the neural path, by reason."
    );
    describe_counter!("spam_verdicts_total", "Spam gate verdicts by action.");
    describe_counter!(
        "destination_recalculations_total",
        "Destination score recomputations."
    );
}
