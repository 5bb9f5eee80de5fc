use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;

use crate::model::ActivityType;

/// Core OTel metrics for the ingestion scheduler. Created once and shared by
/// the dispatch loops and the stream connection tasks.
pub struct Metrics {
    pub dispatch_calls: Counter<u64>,
    pub dispatch_outcomes: Counter<u64>,
    pub events_recorded: Counter<u64>,
    pub stream_duplicates: Counter<u64>,
    pub stream_reconnects: Counter<u64>,
    pub stream_failures: Counter<u64>,
    pub rotation_length: Gauge<u64>,
    pub budget_remaining: Gauge<u64>,
    pub streams_connected: Gauge<u64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn activity_attr(activity: ActivityType) -> KeyValue {
    KeyValue::new("activity", activity.as_str())
}

impl Metrics {
    /// Create metrics from the global meter provider. If no meter provider
    /// is configured (OTel disabled), the instruments are no-op.
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("cadence");
        Self::from_meter(&meter)
    }

    /// Create metrics from a specific meter (used in tests with in-memory exporter).
    pub fn from_meter(meter: &Meter) -> Self {
        Self {
            dispatch_calls: meter
                .u64_counter("cadence.dispatch.calls")
                .with_description("Upstream fetches issued by the dispatch loops")
                .build(),
            dispatch_outcomes: meter
                .u64_counter("cadence.dispatch.outcomes")
                .with_description("Dispatch ticks by outcome")
                .build(),
            events_recorded: meter
                .u64_counter("cadence.events.recorded")
                .with_description("Activity events handed to the store")
                .build(),
            stream_duplicates: meter
                .u64_counter("cadence.stream.duplicates")
                .with_description("Stream events dropped as already seen")
                .build(),
            stream_reconnects: meter
                .u64_counter("cadence.stream.reconnects")
                .with_description("Stream reconnect attempts scheduled")
                .build(),
            stream_failures: meter
                .u64_counter("cadence.stream.failures")
                .with_description("Streams left disconnected after a terminal failure")
                .build(),
            rotation_length: meter
                .u64_gauge("cadence.rotation.length")
                .with_description("Users in each polling rotation")
                .build(),
            budget_remaining: meter
                .u64_gauge("cadence.budget.remaining")
                .with_description("Calls left in the current rate window")
                .build(),
            streams_connected: meter
                .u64_gauge("cadence.stream.connected")
                .with_description("Streams currently in the Connected state")
                .build(),
        }
    }

    pub fn record_dispatch(&self, activity: ActivityType) {
        self.dispatch_calls.add(1, &[activity_attr(activity)]);
    }

    pub fn record_outcome(&self, activity: ActivityType, outcome: &'static str) {
        self.dispatch_outcomes.add(
            1,
            &[activity_attr(activity), KeyValue::new("outcome", outcome)],
        );
    }

    pub fn record_events(&self, source: &'static str, activity: ActivityType, count: u64) {
        if count == 0 {
            return;
        }
        self.events_recorded.add(
            count,
            &[activity_attr(activity), KeyValue::new("source", source)],
        );
    }

    pub fn record_stream_duplicate(&self) {
        self.stream_duplicates.add(1, &[]);
    }

    pub fn record_stream_reconnect(&self) {
        self.stream_reconnects.add(1, &[]);
    }

    pub fn record_stream_failure(&self) {
        self.stream_failures.add(1, &[]);
    }

    pub fn set_rotation_length(&self, activity: ActivityType, len: usize) {
        self.rotation_length
            .record(len as u64, &[activity_attr(activity)]);
    }

    pub fn set_budget_remaining(&self, activity: ActivityType, remaining: u32) {
        self.budget_remaining
            .record(u64::from(remaining), &[activity_attr(activity)]);
    }

    pub fn set_streams_connected(&self, count: usize) {
        self.streams_connected.record(count as u64, &[]);
    }
}

/// Test harness for asserting OTel metrics using an in-memory exporter.
#[cfg(test)]
pub mod test_harness {
    use std::sync::Arc;

    use opentelemetry::metrics::MeterProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::metrics::data::{AggregatedMetrics, MetricData, ResourceMetrics};
    use opentelemetry_sdk::metrics::in_memory_exporter::InMemoryMetricExporter;
    use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};

    use super::Metrics;

    /// A test setup that wires an in-memory exporter to a meter provider,
    /// creating `Metrics` instruments bound to it.
    pub struct MetricTestHarness {
        pub metrics: Arc<Metrics>,
        pub exporter: InMemoryMetricExporter,
        pub meter_provider: SdkMeterProvider,
    }

    impl Default for MetricTestHarness {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MetricTestHarness {
        pub fn new() -> Self {
            let exporter = InMemoryMetricExporter::default();
            let reader = PeriodicReader::builder(exporter.clone()).build();
            let meter_provider = SdkMeterProvider::builder().with_reader(reader).build();
            let meter = meter_provider.meter("cadence-test");
            let metrics = Arc::new(Metrics::from_meter(&meter));
            Self {
                metrics,
                exporter,
                meter_provider,
            }
        }

        /// Force-flush the meter provider so all recorded metrics are exported
        /// to the in-memory exporter. Call this before making assertions.
        pub fn flush(&self) {
            self.meter_provider.force_flush().expect("flush failed");
        }

        /// Collect finished metrics from the exporter.
        pub fn finished_metrics(&self) -> Vec<ResourceMetrics> {
            self.exporter
                .get_finished_metrics()
                .expect("failed to get finished metrics")
        }

        /// Current value of a u64 counter matching all given labels.
        pub fn counter(
            &self,
            metric_name: &str,
            labels: &[(&'static str, &'static str)],
        ) -> Option<u64> {
            self.flush();
            let attrs = to_attrs(labels);
            counter_value_u64(&self.finished_metrics(), metric_name, &attrs)
        }

        /// Assert a u64 counter matching all given labels has the expected value.
        pub fn assert_counter(
            &self,
            metric_name: &str,
            labels: &[(&'static str, &'static str)],
            expected: u64,
        ) {
            let value = self.counter(metric_name, labels);
            assert_eq!(
                value,
                Some(expected),
                "expected counter {metric_name}{labels:?} = {expected}, got {value:?}"
            );
        }

        /// Assert a u64 gauge matching all given labels has the expected value.
        pub fn assert_gauge(
            &self,
            metric_name: &str,
            labels: &[(&'static str, &'static str)],
            expected: u64,
        ) {
            self.flush();
            let attrs = to_attrs(labels);
            let value = gauge_value_u64(&self.finished_metrics(), metric_name, &attrs);
            assert_eq!(
                value,
                Some(expected),
                "expected gauge {metric_name}{labels:?} = {expected}, got {value:?}"
            );
        }
    }

    fn to_attrs(labels: &[(&'static str, &'static str)]) -> Vec<KeyValue> {
        labels
            .iter()
            .map(|(key, value)| KeyValue::new(*key, *value))
            .collect()
    }

    /// Extract a u64 counter value matching ALL given attributes.
    fn counter_value_u64(
        resource_metrics: &[ResourceMetrics],
        name: &str,
        expected_attrs: &[KeyValue],
    ) -> Option<u64> {
        for rm in resource_metrics {
            for sm in rm.scope_metrics() {
                for metric in sm.metrics() {
                    if metric.name() == name {
                        if let AggregatedMetrics::U64(MetricData::Sum(sum)) = metric.data() {
                            for dp in sum.data_points() {
                                let dp_attrs: Vec<KeyValue> = dp.attributes().cloned().collect();
                                if expected_attrs
                                    .iter()
                                    .all(|expected| dp_attrs.contains(expected))
                                {
                                    return Some(dp.value());
                                }
                            }
                        }
                    }
                }
            }
        }
        None
    }

    /// Extract a u64 gauge value matching ALL given attributes.
    fn gauge_value_u64(
        resource_metrics: &[ResourceMetrics],
        name: &str,
        expected_attrs: &[KeyValue],
    ) -> Option<u64> {
        for rm in resource_metrics {
            for sm in rm.scope_metrics() {
                for metric in sm.metrics() {
                    if metric.name() == name {
                        if let AggregatedMetrics::U64(MetricData::Gauge(gauge)) = metric.data() {
                            for dp in gauge.data_points() {
                                let dp_attrs: Vec<KeyValue> = dp.attributes().cloned().collect();
                                if expected_attrs
                                    .iter()
                                    .all(|expected| dp_attrs.contains(expected))
                                {
                                    return Some(dp.value());
                                }
                            }
                        }
                    }
                }
            }
        }
        None
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::model::ActivityType;

        #[test]
        fn dispatch_counter_is_per_activity() {
            let h = MetricTestHarness::new();
            h.metrics.record_dispatch(ActivityType::Posts);
            h.metrics.record_dispatch(ActivityType::Posts);
            h.metrics.record_dispatch(ActivityType::Mentions);

            h.assert_counter("cadence.dispatch.calls", &[("activity", "posts")], 2);
            h.assert_counter("cadence.dispatch.calls", &[("activity", "mentions")], 1);
        }

        #[test]
        fn outcome_counter_carries_both_labels() {
            let h = MetricTestHarness::new();
            h.metrics.record_outcome(ActivityType::Posts, "fetched");
            h.metrics.record_outcome(ActivityType::Posts, "rate_limited");
            h.metrics.record_outcome(ActivityType::Posts, "fetched");

            h.assert_counter(
                "cadence.dispatch.outcomes",
                &[("activity", "posts"), ("outcome", "fetched")],
                2,
            );
            h.assert_counter(
                "cadence.dispatch.outcomes",
                &[("activity", "posts"), ("outcome", "rate_limited")],
                1,
            );
        }

        #[test]
        fn empty_event_batches_are_not_counted() {
            let h = MetricTestHarness::new();
            h.metrics.record_events("rest", ActivityType::Mentions, 0);
            h.metrics.record_events("stream", ActivityType::Mentions, 4);

            assert_eq!(
                h.counter(
                    "cadence.events.recorded",
                    &[("activity", "mentions"), ("source", "rest")]
                ),
                None
            );
            h.assert_counter(
                "cadence.events.recorded",
                &[("activity", "mentions"), ("source", "stream")],
                4,
            );
        }

        #[test]
        fn gauge_overwrites_previous_value() {
            let h = MetricTestHarness::new();
            h.metrics.set_rotation_length(ActivityType::Posts, 10);
            h.metrics.set_rotation_length(ActivityType::Posts, 3);
            h.assert_gauge("cadence.rotation.length", &[("activity", "posts")], 3);
        }

        #[test]
        fn stream_metrics_are_unlabelled() {
            let h = MetricTestHarness::new();
            h.metrics.record_stream_duplicate();
            h.metrics.record_stream_reconnect();
            h.metrics.record_stream_reconnect();
            h.metrics.set_streams_connected(7);

            h.assert_counter("cadence.stream.duplicates", &[], 1);
            h.assert_counter("cadence.stream.reconnects", &[], 2);
            h.assert_gauge("cadence.stream.connected", &[], 7);
        }
    }
}
