//! Fire-and-forget export of monitoring state as time-series gauges.
//!
//! Publication must never block or fail the request path: submissions go into
//! a bounded queue drained by a small pool of workers, and overflow drops the
//! oldest pending batch. Metric gaps are preferable to request-path latency.

use crate::metrics_defs::{
    EMERGENCY_USAGE, PUBLISH_QUEUE_DROPPED, SERVICE_STATUS, TLD_STATUS,
};
use async_trait::async_trait;
use metrics::counter;
use mosapi_client::dto::monitoring::TldServiceState;
use parking_lot::Mutex;
use shared::metrics::{MetricPoint, Metrics};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Upstream sinks cap time series per request; stay under it.
pub const MAX_POINTS_PER_PUBLISH: usize = 195;

const QUEUE_CAPACITY: usize = 64;

#[derive(thiserror::Error, Debug)]
#[error("metrics publish failed: {0}")]
pub struct PublishError(pub String);

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn publish(&self, points: Vec<MetricPoint>) -> Result<(), PublishError>;
}

/// Sink emitting every point as a tagged statsd gauge.
pub struct StatsdSink {
    client: Metrics,
}

impl StatsdSink {
    pub fn new(client: Metrics) -> Self {
        StatsdSink { client }
    }
}

#[async_trait]
impl MetricsSink for StatsdSink {
    async fn publish(&self, points: Vec<MetricPoint>) -> Result<(), PublishError> {
        for point in &points {
            let tags: Vec<(&str, &str)> =
                point.labels.iter().map(|(k, v)| (*k, v.as_str())).collect();
            self.client.gauge(point.name, point.value_f64(), &tags);
        }
        Ok(())
    }
}

struct PublishQueue {
    batches: Mutex<VecDeque<Vec<MetricPoint>>>,
    notify: Notify,
    capacity: usize,
}

/// Bounded async publisher. `submit` is non-blocking; a fixed worker pool
/// drains the queue and chunks each batch to the sink's size limit.
pub struct MetricsPublisher {
    queue: Arc<PublishQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl MetricsPublisher {
    pub fn new(sink: Arc<dyn MetricsSink>, workers: usize) -> Self {
        Self::with_capacity(sink, workers, QUEUE_CAPACITY)
    }

    pub fn with_capacity(sink: Arc<dyn MetricsSink>, workers: usize, capacity: usize) -> Self {
        let queue = Arc::new(PublishQueue {
            batches: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        });

        let workers = (0..workers.max(1))
            .map(|_| {
                let queue = queue.clone();
                let sink = sink.clone();
                tokio::spawn(async move {
                    loop {
                        let batch = queue.batches.lock().pop_front();
                        match batch {
                            Some(points) => {
                                for chunk in points.chunks(MAX_POINTS_PER_PUBLISH) {
                                    if let Err(e) = sink.publish(chunk.to_vec()).await {
                                        tracing::warn!(error = %e, "async metric publish failed");
                                    }
                                }
                            }
                            None => queue.notify.notified().await,
                        }
                    }
                })
            })
            .collect();

        MetricsPublisher { queue, workers }
    }

    /// Enqueues a batch without blocking. When the queue is full the oldest
    /// pending batch is discarded to make room.
    pub fn submit(&self, points: Vec<MetricPoint>) {
        if points.is_empty() {
            return;
        }
        {
            let mut batches = self.queue.batches.lock();
            if batches.len() >= self.queue.capacity {
                batches.pop_front();
                counter!(PUBLISH_QUEUE_DROPPED.name).increment(1);
                tracing::warn!("publish queue full; dropped the oldest metric batch");
            }
            batches.push_back(points);
        }
        self.queue.notify.notify_one();
    }
}

impl Drop for MetricsPublisher {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

/// Builds the gauge vector for one successfully fetched TLD state.
pub fn points_for_state(state: &TldServiceState) -> Vec<MetricPoint> {
    let mut points = vec![MetricPoint::int(
        TLD_STATUS.name,
        vec![("tld", state.tld.clone())],
        tld_status_value(&state.status),
    )];
    for (service, status) in &state.tested_services {
        let labels = vec![("tld", state.tld.clone()), ("service_type", service.clone())];
        points.push(MetricPoint::int(
            SERVICE_STATUS.name,
            labels.clone(),
            service_status_value(&status.status),
        ));
        points.push(MetricPoint::float(
            EMERGENCY_USAGE.name,
            labels,
            status.emergency_threshold,
        ));
    }
    points
}

/// TLD status to gauge value: 0 down, 2 inconclusive, 1 otherwise.
pub fn tld_status_value(status: &str) -> i64 {
    let status = status.to_ascii_uppercase();
    if status == "DOWN" {
        0
    } else if status.starts_with("UP-INCONCLUSIVE") {
        2
    } else {
        1
    }
}

/// Service status to gauge value; disabled services also map to 2.
pub fn service_status_value(status: &str) -> i64 {
    let status = status.to_ascii_uppercase();
    if status.starts_with("UP-INCONCLUSIVE") {
        return 2;
    }
    match status.as_str() {
        "DOWN" => 0,
        "DISABLED" => 2,
        _ => 1,
    }
}
