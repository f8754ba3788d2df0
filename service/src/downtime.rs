//! Rolling-week downtime aggregation across (TLD x service).

use crate::fanout::fan_out;
use crate::state::log_batch_failure;
use mosapi_client::dto::monitoring::ServiceDowntime;
use mosapi_client::error::MosApiError;
use mosapi_client::monitoring::ServiceMonitoring;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TldServicesDowntime {
    pub tld: String,
    #[serde(rename = "serviceDowntimes")]
    pub service_downtimes: HashMap<String, ServiceDowntime>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AllTldsDowntime {
    #[serde(rename = "tldDowntimes")]
    pub tld_downtimes: Vec<TldServicesDowntime>,
}

pub struct DowntimeService {
    monitoring: Arc<ServiceMonitoring>,
    tlds: Vec<String>,
    services: Vec<String>,
    concurrency: usize,
    deadline: Option<Duration>,
}

impl DowntimeService {
    pub fn new(
        monitoring: Arc<ServiceMonitoring>,
        tlds: Vec<String>,
        services: Vec<String>,
        concurrency: usize,
        deadline: Option<Duration>,
    ) -> Self {
        DowntimeService {
            monitoring,
            tlds,
            services,
            concurrency,
            deadline,
        }
    }

    /// Downtime of every configured service for one TLD. A service whose
    /// fetch fails is logged and omitted from the map; unmonitored services
    /// appear with the disabled sentinel the facade materialises for them.
    pub async fn downtime_for_tld(&self, tld: &str) -> TldServicesDowntime {
        fetch_tld_downtime(&self.monitoring, tld, &self.services).await
    }

    /// Downtime for every configured TLD, one entry per TLD in input order.
    pub async fn all_tlds(&self) -> AllTldsDowntime {
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
                    Ok::<TldServicesDowntime, MosApiError>(
                        fetch_tld_downtime(&monitoring, &tld, &services).await,
                    )
                }
            },
        )
        .await;

        let tld_downtimes = self
            .tlds
            .iter()
            .zip(results)
            .map(|(tld, result)| match result {
                Ok(downtime) => downtime,
                Err(e) => {
                    log_batch_failure("downtime", tld, &e);
                    TldServicesDowntime {
                        tld: tld.clone(),
                        service_downtimes: HashMap::new(),
                    }
                }
            })
            .collect();

        AllTldsDowntime { tld_downtimes }
    }
}

async fn fetch_tld_downtime(
    monitoring: &ServiceMonitoring,
    tld: &str,
    services: &[String],
) -> TldServicesDowntime {
    let mut service_downtimes = HashMap::new();
    for service in services {
        match monitoring.downtime(tld, service).await {
            Ok(downtime) => {
                service_downtimes.insert(service.clone(), downtime);
            }
            Err(e) => {
                tracing::warn!(tld, service, error = %e, "failed to get service downtime");
            }
        }
    }
    TldServicesDowntime {
        tld: tld.to_string(),
        service_downtimes,
    }
}
