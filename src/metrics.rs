use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Process-wide metrics, injected explicitly into the collaborators that
/// need them rather than relied on implicitly: a process-singleton may
/// still be provided for convenience but must not be required by the core.
///
/// Metric names: `waygate_messages_total{channel}`,
/// `waygate_tokens_total{type}`, `waygate_active_sessions`,
/// `waygate_tool_calls_total{tool}`, `waygate_tool_errors_total{tool}`.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Installs the process-wide Prometheus recorder and returns a handle
    /// that can render the current snapshot on demand. Must be called at
    /// most once per process.
    pub fn install() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("failed to install prometheus recorder")?;
        Ok(Self { handle })
    }

    /// Renders the current snapshot as Prometheus exposition text.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    pub fn record_message(&self, channel: &str) {
        metrics::counter!("waygate_messages_total", "channel" => channel.to_string()).increment(1);
    }

    pub fn record_tokens(&self, input: u32, output: u32) {
        metrics::counter!("waygate_tokens_total", "type" => "input").increment(u64::from(input));
        metrics::counter!("waygate_tokens_total", "type" => "output").increment(u64::from(output));
    }

    pub fn set_active_sessions(&self, count: usize) {
        metrics::gauge!("waygate_active_sessions").set(count as f64);
    }

    pub fn record_tool_call(&self, tool: &str) {
        metrics::counter!("waygate_tool_calls_total", "tool" => tool.to_string()).increment(1);
    }

    pub fn record_tool_error(&self, tool: &str) {
        metrics::counter!("waygate_tool_errors_total", "tool" => tool.to_string()).increment(1);
    }

    pub fn record_compaction(&self) {
        metrics::counter!("waygate_compactions_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `PrometheusBuilder::install_recorder` sets the process-wide global
    // recorder, so only one test in this process may call `Metrics::install`.
    #[test]
    fn render_contains_recorded_metric_families() {
        let metrics = Metrics::install().unwrap();
        metrics.record_message("telegram");
        metrics.record_tokens(10, 5);
        metrics.set_active_sessions(3);
        metrics.record_tool_call("exec");
        metrics.record_tool_error("exec");

        let text = metrics.render();
        assert!(text.contains("waygate_messages_total"));
        assert!(text.contains("waygate_tokens_total"));
        assert!(text.contains("waygate_active_sessions"));
        assert!(text.contains("waygate_tool_calls_total"));
        assert!(text.contains("waygate_tool_errors_total"));
    }
}
