//! Metrics definitions for the MoSAPI client.

use shared::metrics_defs::{MetricDef, MetricType};

pub const SESSION_CACHE_HIT: MetricDef = MetricDef {
    name: "session_cache.hit",
    metric_type: MetricType::Counter,
    description: "Cookie lookups answered from the shared session cache",
    labels: &[],
};

pub const SESSION_CACHE_MISS: MetricDef = MetricDef {
    name: "session_cache.miss",
    metric_type: MetricType::Counter,
    description: "Cookie lookups that found no usable session",
    labels: &[],
};

pub const SESSION_RELOGIN: MetricDef = MetricDef {
    name: "session.relogin",
    metric_type: MetricType::Counter,
    description: "Automatic re-logins triggered by an expired session",
    labels: &[],
};

pub const ALL_METRICS: &[MetricDef] = &[SESSION_CACHE_HIT, SESSION_CACHE_MISS, SESSION_RELOGIN];
