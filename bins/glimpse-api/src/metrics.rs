// Prometheus metrics exposed on GET /metrics
use anyhow::{Context, Result};
use glimpse_core::PoolStats;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::time::Duration;

pub struct Metrics {
    registry: Registry,
    executions: IntCounterVec,
    execution_seconds: HistogramVec,
    pool_ready: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let executions = IntCounterVec::new(
            Opts::new("glimpse_executions_total", "Executions by outcome"),
            &["language", "strategy", "outcome"],
        )?;
        let execution_seconds = HistogramVec::new(
            HistogramOpts::new("glimpse_execution_seconds", "End-to-end execution time")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0]),
            &["strategy"],
        )?;
        let pool_ready = IntGauge::new("glimpse_pool_ready", "Ready sandboxes in the pool")?;

        registry.register(Box::new(executions.clone()))?;
        registry.register(Box::new(execution_seconds.clone()))?;
        registry.register(Box::new(pool_ready.clone()))?;

        Ok(Self {
            registry,
            executions,
            execution_seconds,
            pool_ready,
        })
    }

    pub fn observe(&self, language: &str, strategy: &str, outcome: &str, elapsed: Duration) {
        self.executions
            .with_label_values(&[language, strategy, outcome])
            .inc();
        self.execution_seconds
            .with_label_values(&[strategy])
            .observe(elapsed.as_secs_f64());
    }

    pub fn set_pool_stats(&self, stats: &PoolStats) {
        self.pool_ready.set(stats.ready as i64);
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        String::from_utf8(buffer).context("Metrics are not valid UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_observations() {
        let metrics = Metrics::new().unwrap();
        metrics.observe("py", "pooled", "success", Duration::from_millis(120));
        metrics.observe("py", "pooled", "timeout", Duration::from_secs(30));
        metrics.set_pool_stats(&PoolStats {
            capacity: 2,
            ready: 1,
            in_use: 1,
            provisioning: 0,
        });

        let text = metrics.render().unwrap();
        assert!(text.contains(
            "glimpse_executions_total{language=\"py\",outcome=\"success\",strategy=\"pooled\"} 1"
        ));
        assert!(text.contains("glimpse_execution_seconds_count{strategy=\"pooled\"} 2"));
        assert!(text.contains("glimpse_pool_ready 1"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.observe("c", "direct", "compile", Duration::from_millis(5));
        assert!(!b.render().unwrap().contains("language=\"c\""));
    }
}
