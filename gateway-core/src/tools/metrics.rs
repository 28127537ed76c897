//! Tool call telemetry sink (SPEC_FULL §4.3 ADDED).

use std::time::Duration;

use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolCallStatus {
    Success,
    Error,
    Timeout,
}

pub trait ToolMetricsSink: Send + Sync {
    fn record_call(&self, server: &str, tool: &str, status: ToolCallStatus, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ToolCallAggregate {
    pub count: u64,
    pub total_duration: Duration,
}

/// In-memory aggregating metrics sink, the default used outside of an
/// operator-supplied StatsD/Prometheus backend.
#[derive(Default)]
pub struct InMemoryMetrics {
    counters: DashMap<(String, String, &'static str), ToolCallAggregate>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, server: &str, tool: &str, status: ToolCallStatus) -> ToolCallAggregate {
        self.counters
            .get(&(server.to_string(), tool.to_string(), status_label(status)))
            .map(|v| *v)
            .unwrap_or_default()
    }
}

fn status_label(status: ToolCallStatus) -> &'static str {
    match status {
        ToolCallStatus::Success => "success",
        ToolCallStatus::Error => "error",
        ToolCallStatus::Timeout => "timeout",
    }
}

impl ToolMetricsSink for InMemoryMetrics {
    fn record_call(&self, server: &str, tool: &str, status: ToolCallStatus, duration: Duration) {
        let key = (server.to_string(), tool.to_string(), status_label(status));
        let mut entry = self.counters.entry(key).or_default();
        entry.count += 1;
        entry.total_duration += duration;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_reads_back() {
        let sink = InMemoryMetrics::new();
        sink.record_call("local", "web_search", ToolCallStatus::Success, Duration::from_millis(10));
        sink.record_call("local", "web_search", ToolCallStatus::Success, Duration::from_millis(20));
        let agg = sink.get("local", "web_search", ToolCallStatus::Success);
        assert_eq!(agg.count, 2);
        assert_eq!(agg.total_duration, Duration::from_millis(30));
    }

    #[test]
    fn distinguishes_status() {
        let sink = InMemoryMetrics::new();
        sink.record_call("local", "t", ToolCallStatus::Error, Duration::from_millis(1));
        assert_eq!(sink.get("local", "t", ToolCallStatus::Success).count, 0);
        assert_eq!(sink.get("local", "t", ToolCallStatus::Error).count, 1);
    }
}
