// Run metrics, printed in prometheus text format at the end of a run

use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Registry, TextEncoder};
use std::sync::Arc;

pub struct HarnessMetrics {
    pub transactions_submitted: Counter,
    pub transactions_reverted: Counter,
    pub harvests: Counter,
    pub time_advanced_seconds: Counter,
    pub rpc_errors: Counter,
    pub tx_duration: Histogram,

    registry: Arc<Registry>,
}

impl HarnessMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transactions_submitted = Counter::new(
            "harness_transactions_submitted_total",
            "Transactions submitted by the harness",
        )?;
        let transactions_reverted = Counter::new(
            "harness_transactions_reverted_total",
            "Transactions rejected by the chain",
        )?;
        let harvests = Counter::new("harness_harvests_total", "Strategy harvest calls")?;
        let time_advanced_seconds = Counter::new(
            "harness_time_advanced_seconds_total",
            "Seconds the chain clock was moved forward",
        )?;
        let rpc_errors = Counter::new("harness_rpc_errors_total", "Non-revert chain errors")?;
        let tx_duration = Histogram::with_opts(HistogramOpts::new(
            "harness_tx_duration_seconds",
            "Time from submission to confirmed receipt",
        ))?;

        registry.register(Box::new(transactions_submitted.clone()))?;
        registry.register(Box::new(transactions_reverted.clone()))?;
        registry.register(Box::new(harvests.clone()))?;
        registry.register(Box::new(time_advanced_seconds.clone()))?;
        registry.register(Box::new(rpc_errors.clone()))?;
        registry.register(Box::new(tx_duration.clone()))?;

        Ok(Self {
            transactions_submitted,
            transactions_reverted,
            harvests,
            time_advanced_seconds,
            rpc_errors,
            tx_duration,
            registry,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Prometheus text exposition of every registered metric
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render() {
        let metrics = HarnessMetrics::new().unwrap();

        metrics.transactions_submitted.inc();
        metrics.harvests.inc_by(2.0);
        metrics.time_advanced_seconds.inc_by(604_800.0);
        metrics.tx_duration.observe(0.25);

        assert!(!metrics.registry().gather().is_empty());
        let text = metrics.render().unwrap();
        assert!(text.contains("harness_harvests_total 2"));
        assert!(text.contains("harness_time_advanced_seconds_total 604800"));
    }
}
