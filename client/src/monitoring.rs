//! Facade for MoSAPI's service monitoring endpoints.

use crate::auth::MosApiClient;
use crate::dto::ErrorEnvelope;
use crate::dto::monitoring::{ServiceAlarm, ServiceDowntime, TldServiceState};
use crate::error::{MosApiError, Result};
use http::{HeaderMap, StatusCode};
use std::sync::Arc;

const STATE_ENDPOINT: &str = "v2/monitoring/state";

pub struct ServiceMonitoring {
    client: Arc<MosApiClient>,
}

impl ServiceMonitoring {
    pub fn new(client: Arc<MosApiClient>) -> Self {
        ServiceMonitoring { client }
    }

    /// Current state of all monitored services for a TLD.
    pub async fn service_state(&self, tld: &str) -> Result<TldServiceState> {
        let response = self
            .client
            .get(tld, STATE_ENDPOINT, &[], HeaderMap::new())
            .await?;
        if !response.status.is_success() {
            return Err(error_from_body(STATE_ENDPOINT, response.status, &response.body));
        }
        Ok(serde_json::from_str(&response.body)?)
    }

    /// Total downtime of one service over the rolling week. A 404 means the
    /// service is not monitored for this TLD and materialises as the
    /// disabled-monitoring sentinel, not an error.
    pub async fn downtime(&self, tld: &str, service: &str) -> Result<ServiceDowntime> {
        let endpoint = format!("v2/monitoring/{service}/downtime");
        let response = self.client.get(tld, &endpoint, &[], HeaderMap::new()).await?;
        match response.status {
            StatusCode::OK => Ok(serde_json::from_str(&response.body)?),
            StatusCode::NOT_FOUND => Ok(ServiceDowntime::disabled()),
            status => Err(error_from_body(&endpoint, status, &response.body)),
        }
    }

    /// Whether one service currently has an active alarm; 404 materialises as
    /// `alarmed = Disabled`.
    pub async fn alarmed(&self, tld: &str, service: &str) -> Result<ServiceAlarm> {
        let endpoint = format!("v2/monitoring/{service}/alarmed");
        let response = self.client.get(tld, &endpoint, &[], HeaderMap::new()).await?;
        match response.status {
            StatusCode::OK => Ok(serde_json::from_str(&response.body)?),
            StatusCode::NOT_FOUND => Ok(ServiceAlarm::disabled()),
            status => Err(error_from_body(&endpoint, status, &response.body)),
        }
    }
}

/// Interprets an unexpected status: a parseable MoSAPI error envelope gets
/// its mapped error, anything else the generic unexpected-status error.
pub(crate) fn error_from_body(path: &str, status: StatusCode, body: &str) -> MosApiError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => MosApiError::from_envelope(&envelope),
        Err(_) => MosApiError::unexpected_status(path, status, body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{EntityType, SecretStoreCredentials};
    use crate::dto::monitoring::Alarmed;
    use crate::secrets::{InMemorySecretStore, SecretStore};
    use crate::session::{InMemorySessionCache, SessionCache};
    use crate::transport::Transport;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn monitoring_for(server: &MockServer) -> ServiceMonitoring {
        let store = Arc::new(InMemorySecretStore::new());
        store.put("mosapi_username_example", "user").await.unwrap();
        store.put("mosapi_password_example", "pass").await.unwrap();
        let cache = Arc::new(InMemorySessionCache::new());
        cache.put("example", "id=abc").await.unwrap();

        let client = MosApiClient::new(
            Transport::without_client_cert().unwrap(),
            &server.uri(),
            EntityType::Registry,
            cache,
            Arc::new(SecretStoreCredentials::new(store)),
        );
        ServiceMonitoring::new(Arc::new(client))
    }

    #[tokio::test]
    async fn state_parses_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ry/example/v2/monitoring/state"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"tld":"example","status":"Up","testedServices":{}}"#,
            ))
            .mount(&server)
            .await;

        let state = monitoring_for(&server).await.service_state("example").await.unwrap();
        assert_eq!(state.tld, "example");
        assert_eq!(state.status, "Up");
    }

    #[tokio::test]
    async fn state_maps_error_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ry/example/v2/monitoring/state"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                r#"{"resultCode":"2001","message":"tld not monitored"}"#,
            ))
            .mount(&server)
            .await;

        let err = monitoring_for(&server)
            .await
            .service_state("example")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("2001"));
        assert!(err.to_string().contains("tld not monitored"));
    }

    #[tokio::test]
    async fn downtime_404_yields_disabled_sentinel() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ry/example/v2/monitoring/dns/downtime"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let downtime = monitoring_for(&server)
            .await
            .downtime("example", "dns")
            .await
            .unwrap();
        assert_eq!(downtime.version, 2);
        assert_eq!(downtime.downtime, 0);
        assert!(downtime.disabled_monitoring);
    }

    #[tokio::test]
    async fn downtime_parses_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ry/example/v2/monitoring/rdds/downtime"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"version":2,"lastUpdateApiDatabase":1422492450,"downtime":125,"disabledMonitoring":false}"#,
            ))
            .mount(&server)
            .await;

        let downtime = monitoring_for(&server)
            .await
            .downtime("example", "rdds")
            .await
            .unwrap();
        assert_eq!(downtime.downtime, 125);
        assert!(!downtime.disabled_monitoring);
    }

    #[tokio::test]
    async fn alarmed_404_yields_disabled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ry/example/v2/monitoring/epp/alarmed"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let alarm = monitoring_for(&server)
            .await
            .alarmed("example", "epp")
            .await
            .unwrap();
        assert_eq!(alarm.alarmed, Alarmed::Disabled);
    }

    #[tokio::test]
    async fn alarmed_unexpected_status_raises() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ry/example/v2/monitoring/dns/alarmed"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = monitoring_for(&server)
            .await
            .alarmed("example", "dns")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unexpected status code: 500"));
    }
}
