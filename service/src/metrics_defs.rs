//! Metrics definitions for the orchestration layer.

use shared::metrics_defs::{MetricDef, MetricType};

pub const TLD_STATUS: MetricDef = MetricDef {
    name: "tld_status",
    metric_type: MetricType::Gauge,
    description: "Overall health of a TLD as reported by ICANN: 1 = up, 0 = down, 2 = disabled/not monitored",
    labels: &["tld"],
};

pub const SERVICE_STATUS: MetricDef = MetricDef {
    name: "service_status",
    metric_type: MetricType::Gauge,
    description: "Health of one monitored service: 1 = up, 0 = down, 2 = disabled/not monitored",
    labels: &["tld", "service_type"],
};

pub const EMERGENCY_USAGE: MetricDef = MetricDef {
    name: "emergency_usage",
    metric_type: MetricType::Gauge,
    description: "Percentage of the emergency downtime threshold consumed by a service",
    labels: &["tld", "service_type"],
};

pub const FAN_OUT_FAILURE: MetricDef = MetricDef {
    name: "fan_out.failure",
    metric_type: MetricType::Counter,
    description: "Per-TLD tasks that failed or were cut off by the batch deadline",
    labels: &["operation"],
};

pub const PUBLISH_QUEUE_DROPPED: MetricDef = MetricDef {
    name: "metrics_publish.dropped",
    metric_type: MetricType::Counter,
    description: "Metric batches discarded because the publish queue was full",
    labels: &[],
};

pub const INGESTED_REPORTS: MetricDef = MetricDef {
    name: "metrica.ingested_reports",
    metric_type: MetricType::Counter,
    description: "Daily METRICA reports successfully persisted",
    labels: &["tld"],
};

pub const ALL_METRICS: &[MetricDef] = &[
    TLD_STATUS,
    SERVICE_STATUS,
    EMERGENCY_USAGE,
    FAN_OUT_FAILURE,
    PUBLISH_QUEUE_DROPPED,
    INGESTED_REPORTS,
];
