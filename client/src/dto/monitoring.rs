//! Service-monitoring response shapes (MoSAPI `v2/monitoring/*`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Overall health of all monitored services for a TLD.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TldServiceState {
    pub tld: String,
    /// Status of the TLD as seen from the monitoring system, e.g. "Up",
    /// "Down" or an "UP-inconclusive-*" variant. Open set, kept as text.
    pub status: String,
    #[serde(rename = "lastUpdateApiDatabase", default)]
    pub last_update_api_database: i64,
    /// Detailed entry per monitored service (dns, rdds, epp, ...).
    #[serde(rename = "testedServices", default)]
    pub tested_services: HashMap<String, ServiceStatus>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServiceStatus {
    pub status: String,
    /// Percentage of the Emergency Threshold currently consumed; 0 means no
    /// incidents affect the threshold.
    #[serde(rename = "emergencyThreshold", default)]
    pub emergency_threshold: f64,
    #[serde(default)]
    pub incidents: Vec<IncidentSummary>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct IncidentSummary {
    #[serde(rename = "incidentID")]
    pub incident_id: String,
    #[serde(rename = "startTime")]
    pub start_time: i64,
    #[serde(rename = "falsePositive", default)]
    pub false_positive: bool,
    pub state: IncidentState,
    #[serde(rename = "endTime", default)]
    pub end_time: Option<i64>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum IncidentState {
    Active,
    Resolved,
}

/// Minutes of downtime of a service during a rolling week period.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServiceDowntime {
    #[serde(default)]
    pub version: i32,
    #[serde(rename = "lastUpdateApiDatabase", default)]
    pub last_update_api_database: i64,
    #[serde(default)]
    pub downtime: i64,
    #[serde(rename = "disabledMonitoring", default)]
    pub disabled_monitoring: bool,
}

impl ServiceDowntime {
    /// Sentinel for services the monitoring system does not cover (the
    /// endpoint answers 404 for them).
    pub fn disabled() -> Self {
        ServiceDowntime {
            version: 2,
            last_update_api_database: 0,
            downtime: 0,
            disabled_monitoring: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServiceAlarm {
    #[serde(default)]
    pub version: i32,
    #[serde(rename = "lastUpdateApiDatabase", default)]
    pub last_update_api_database: i64,
    pub alarmed: Alarmed,
}

impl ServiceAlarm {
    pub fn disabled() -> Self {
        ServiceAlarm {
            version: 2,
            last_update_api_database: 0,
            alarmed: Alarmed::Disabled,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum Alarmed {
    Yes,
    No,
    Disabled,
}

impl std::fmt::Display for Alarmed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Alarmed::Yes => "Yes",
            Alarmed::No => "No",
            Alarmed::Disabled => "Disabled",
        })
    }
}
