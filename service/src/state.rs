//! Service-state summaries across all configured TLDs.

use crate::fanout::{FanOutError, fan_out};
use crate::metrics::{MetricsPublisher, points_for_state};
use crate::metrics_defs::FAN_OUT_FAILURE;
use metrics::counter;
use mosapi_client::dto::monitoring::{IncidentSummary, TldServiceState};
use mosapi_client::error::MosApiError;
use mosapi_client::monitoring::ServiceMonitoring;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

const DOWN_STATUS: &str = "Down";
const FETCH_ERROR_STATUS: &str = "ERROR";

/// Condensed view of one TLD's health. `active_incidents` is present only
/// when the TLD is down (absent is distinguishable from empty).
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ServiceStateSummary {
    pub tld: String,
    pub status: String,
    #[serde(rename = "activeIncidents", skip_serializing_if = "Option::is_none")]
    pub active_incidents: Option<Vec<ActiveServiceIncidents>>,
}

impl ServiceStateSummary {
    fn error(tld: String) -> Self {
        ServiceStateSummary {
            tld,
            status: FETCH_ERROR_STATUS.into(),
            active_incidents: None,
        }
    }
}

/// Incidents of one service, reproduced verbatim under the service name.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActiveServiceIncidents {
    pub service: String,
    #[serde(rename = "emergencyThreshold")]
    pub emergency_threshold: f64,
    pub incidents: Vec<IncidentSummary>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AllServicesStateResponse {
    pub summaries: Vec<ServiceStateSummary>,
}

pub struct StateService {
    monitoring: Arc<ServiceMonitoring>,
    publisher: Arc<MetricsPublisher>,
    tlds: Vec<String>,
    concurrency: usize,
    deadline: Option<Duration>,
}

impl StateService {
    pub fn new(
        monitoring: Arc<ServiceMonitoring>,
        publisher: Arc<MetricsPublisher>,
        tlds: Vec<String>,
        concurrency: usize,
        deadline: Option<Duration>,
    ) -> Self {
        StateService {
            monitoring,
            publisher,
            tlds,
            concurrency,
            deadline,
        }
    }

    /// Fetches and condenses the state of one TLD, publishing its gauges as a
    /// side effect.
    pub async fn summary(&self, tld: &str) -> Result<ServiceStateSummary, MosApiError> {
        let state = self.monitoring.service_state(tld).await?;
        self.publisher.submit(points_for_state(&state));
        Ok(transform_to_summary(state))
    }

    /// Fan-out over every configured TLD. The batch never fails: a TLD whose
    /// fetch errors out gets an `"ERROR"` summary in its slot.
    pub async fn all_summaries(&self) -> AllServicesStateResponse {
        let monitoring = self.monitoring.clone();
        let publisher = self.publisher.clone();

        let results = fan_out(
            self.tlds.clone(),
            self.concurrency,
            self.deadline,
            move |tld: String| {
                let monitoring = monitoring.clone();
                let publisher = publisher.clone();
                async move {
                    let state = monitoring.service_state(&tld).await?;
                    publisher.submit(points_for_state(&state));
                    Ok::<TldServiceState, MosApiError>(state)
                }
            },
        )
        .await;

        let summaries = self
            .tlds
            .iter()
            .zip(results)
            .map(|(tld, result)| match result {
                Ok(state) => transform_to_summary(state),
                Err(e) => {
                    log_batch_failure("state", tld, &e);
                    ServiceStateSummary::error(tld.clone())
                }
            })
            .collect();

        AllServicesStateResponse { summaries }
    }
}

pub(crate) fn log_batch_failure(operation: &'static str, tld: &str, e: &FanOutError<MosApiError>) {
    tracing::warn!(tld, error = %e, "failed to fetch {operation} for TLD");
    counter!(FAN_OUT_FAILURE.name, "operation" => operation).increment(1);
}

/// Keeps each down TLD's services that have incidents; for anything not down
/// the incident list is absent entirely.
fn transform_to_summary(state: TldServiceState) -> ServiceStateSummary {
    let active_incidents = if state.status.eq_ignore_ascii_case(DOWN_STATUS) {
        let mut incidents: Vec<ActiveServiceIncidents> = state
            .tested_services
            .into_iter()
            .filter(|(_, status)| !status.incidents.is_empty())
            .map(|(service, status)| ActiveServiceIncidents {
                service,
                emergency_threshold: status.emergency_threshold,
                incidents: status.incidents,
            })
            .collect();
        incidents.sort_by(|a, b| a.service.cmp(&b.service));
        Some(incidents)
    } else {
        None
    };

    ServiceStateSummary {
        tld: state.tld,
        status: state.status,
        active_incidents,
    }
}
