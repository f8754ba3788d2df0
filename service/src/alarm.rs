//! Alarm status aggregation across (TLD x service).
//!
//! Only the TLD axis is parallel; the services of one TLD are checked
//! sequentially inside a single worker slot so the session cap holds.

use crate::fanout::fan_out;
use crate::state::log_batch_failure;
use mosapi_client::error::MosApiError;
use mosapi_client::monitoring::ServiceMonitoring;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

const FETCH_ERROR_STATUS: &str = "ERROR";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AlarmStatus {
    pub tld: String,
    pub service: String,
    pub status: String,
    #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AlarmResponse {
    pub statuses: Vec<AlarmStatus>,
}

pub struct AlarmService {
    monitoring: Arc<ServiceMonitoring>,
    tlds: Vec<String>,
    services: Vec<String>,
    concurrency: usize,
    deadline: Option<Duration>,
}

impl AlarmService {
    pub fn new(
        monitoring: Arc<ServiceMonitoring>,
        tlds: Vec<String>,
        services: Vec<String>,
        concurrency: usize,
        deadline: Option<Duration>,
    ) -> Self {
        AlarmService {
            monitoring,
            tlds,
            services,
            concurrency,
            deadline,
        }
    }

    /// One row per configured (TLD x service); failures become `"ERROR"`
    /// rows with the message attached, never a failed batch.
    pub async fn check_all(&self) -> AlarmResponse {
        let monitoring = self.monitoring.clone();
        let services = self.services.clone();

        let results = fan_out(
            self.tlds.clone(),
            self.concurrency,
            self.deadline,
            move |tld: String| {
                let monitoring = monitoring.clone();
                let services = services.clone();
                async move {
                    let mut statuses = Vec::with_capacity(services.len());
                    for service in &services {
                        match monitoring.alarmed(&tld, service).await {
                            Ok(alarm) => statuses.push(AlarmStatus {
                                tld: tld.clone(),
                                service: service.clone(),
                                status: alarm.alarmed.to_string(),
                                error_message: None,
                            }),
                            Err(e) => {
                                tracing::warn!(tld, service, error = %e, "failed to get alarm status");
                                statuses.push(AlarmStatus {
                                    tld: tld.clone(),
                                    service: service.clone(),
                                    status: FETCH_ERROR_STATUS.into(),
                                    error_message: Some(e.to_string()),
                                });
                            }
                        }
                    }
                    Ok::<Vec<AlarmStatus>, MosApiError>(statuses)
                }
            },
        )
        .await;

        let statuses = self
            .tlds
            .iter()
            .zip(results)
            .flat_map(|(tld, result)| match result {
                Ok(statuses) => statuses,
                Err(e) => {
                    log_batch_failure("alarm", tld, &e);
                    let message = e.to_string();
                    self.services
                        .iter()
                        .map(|service| AlarmStatus {
                            tld: tld.clone(),
                            service: service.clone(),
                            status: FETCH_ERROR_STATUS.into(),
                            error_message: Some(message.clone()),
                        })
                        .collect()
                }
            })
            .collect();

        AlarmResponse { statuses }
    }
}
