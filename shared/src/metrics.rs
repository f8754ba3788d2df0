use cadence::{Counted, Gauged, MetricError, StatsdClient, Timed, UdpMetricSink};
use chrono::{DateTime, Utc};
use std::net::UdpSocket;
use std::sync::Arc;

/// One time-series sample as handed to a metrics sink.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub name: &'static str,
    pub labels: Vec<(&'static str, String)>,
    pub value: PointValue,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointValue {
    Int(i64),
    Float(f64),
}

enum MetricsBackend {
    Statsd(StatsdClient),
    Noop,
}

/// Thin statsd client used for gauge/counter/timing emission with tags.
#[derive(Clone)]
pub struct Metrics {
    backend: Arc<MetricsBackend>,
}

impl Metrics {
    /// Create a new Metrics client that sends to StatsD
    pub fn new(statsd_host: &str, statsd_port: u16, prefix: &str) -> Result<Self, MetricError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;

        let addr = format!("{statsd_host}:{statsd_port}");
        let sink = UdpMetricSink::from(addr, socket)?;
        let client = StatsdClient::from_sink(prefix, sink);

        Ok(Metrics {
            backend: Arc::new(MetricsBackend::Statsd(client)),
        })
    }

    /// Create a no-op Metrics client that discards all metrics
    pub fn new_noop() -> Self {
        Metrics {
            backend: Arc::new(MetricsBackend::Noop),
        }
    }

    /// Increment a counter metric by 1
    pub fn incr(&self, metric: &str, tags: &[(&str, &str)]) {
        let client = match self.backend.as_ref() {
            MetricsBackend::Statsd(client) => client,
            MetricsBackend::Noop => return,
        };

        let mut counter = client.count_with_tags(metric, 1);
        for (key, value) in tags {
            counter = counter.with_tag(key, value);
        }
        if let Err(e) = counter.try_send() {
            tracing::debug!(error = %e, metric, "failed to send counter");
        }
    }

    /// Record a gauge sample with tags.
    pub fn gauge(&self, metric: &str, value: f64, tags: &[(&str, &str)]) {
        let client = match self.backend.as_ref() {
            MetricsBackend::Statsd(client) => client,
            MetricsBackend::Noop => return,
        };

        let mut gauge = client.gauge_with_tags(metric, value);
        for (key, value) in tags {
            gauge = gauge.with_tag(key, value);
        }
        if let Err(e) = gauge.try_send() {
            tracing::debug!(error = %e, metric, "failed to send gauge");
        }
    }

    /// Record a timing metric in milliseconds
    pub fn timing(&self, metric: &str, value_ms: u64, tags: &[(&str, &str)]) {
        let client = match self.backend.as_ref() {
            MetricsBackend::Statsd(client) => client,
            MetricsBackend::Noop => return,
        };

        let mut timer = client.time_with_tags(metric, value_ms);
        for (key, value) in tags {
            timer = timer.with_tag(key, value);
        }
        if let Err(e) = timer.try_send() {
            tracing::debug!(error = %e, metric, "failed to send timing");
        }
    }
}

impl MetricPoint {
    pub fn int(name: &'static str, labels: Vec<(&'static str, String)>, value: i64) -> Self {
        MetricPoint {
            name,
            labels,
            value: PointValue::Int(value),
            timestamp: Utc::now(),
        }
    }

    pub fn float(name: &'static str, labels: Vec<(&'static str, String)>, value: f64) -> Self {
        MetricPoint {
            name,
            labels,
            value: PointValue::Float(value),
            timestamp: Utc::now(),
        }
    }

    pub fn value_f64(&self) -> f64 {
        match self.value {
            PointValue::Int(v) => v as f64,
            PointValue::Float(v) => v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_client_discards() {
        let metrics = Metrics::new_noop();
        metrics.incr("some.counter", &[("tld", "example")]);
        metrics.gauge("some.gauge", 1.5, &[]);
        metrics.timing("some.timer", 42, &[("status", "200")]);
    }

    #[test]
    fn point_value_conversion() {
        let p = MetricPoint::int("tld_status", vec![("tld", "example".into())], 2);
        assert_eq!(p.value_f64(), 2.0);
        let p = MetricPoint::float("emergency_usage", vec![], 12.5);
        assert_eq!(p.value_f64(), 12.5);
    }
}
