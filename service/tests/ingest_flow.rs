//! End-to-end flows against a mock MoSAPI server: report ingestion with its
//! idempotence guarantee, and fan-out error isolation for state summaries.

use mosapi_service::alarm::AlarmService;
use mosapi_service::downtime::DowntimeService;
use mosapi_service::ingest::Ingester;
use mosapi_service::metrics::{MetricsPublisher, StatsdSink};
use mosapi_service::state::StateService;
use mosapi_service::store::{SqliteThreatMatchStore, ThreatMatchStore};
use chrono::NaiveDate;
use mosapi_client::auth::{EntityType, MosApiClient, SecretStoreCredentials};
use mosapi_client::metrica::DomainMetrica;
use mosapi_client::monitoring::ServiceMonitoring;
use mosapi_client::secrets::{InMemorySecretStore, SecretStore};
use mosapi_client::session::{InMemorySessionCache, SessionCache};
use mosapi_client::transport::Transport;
use shared::metrics::Metrics;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mosapi_client_for(server: &MockServer, tlds: &[&str]) -> Arc<MosApiClient> {
    let secrets = Arc::new(InMemorySecretStore::new());
    let session_cache = Arc::new(InMemorySessionCache::new());
    for tld in tlds {
        secrets
            .put(&format!("mosapi_username_{tld}"), "user")
            .await
            .unwrap();
        secrets
            .put(&format!("mosapi_password_{tld}"), "pass")
            .await
            .unwrap();
        session_cache.put(tld, "id=test-session").await.unwrap();
    }

    Arc::new(MosApiClient::new(
        Transport::without_client_cert().unwrap(),
        &server.uri(),
        EntityType::Registry,
        session_cache,
        Arc::new(SecretStoreCredentials::new(secrets)),
    ))
}

const REPORT_2025_01_02: &str = r#"{
    "version": 2,
    "tld": "test",
    "domainListDate": "2025-01-02",
    "uniqueAbuseDomains": 2,
    "domainListData": [
        {"threatType": "malware", "count": 2, "domains": ["a.test", "b.test"]},
        {"threatType": "spam", "count": -1, "domains": []}
    ]
}"#;

#[tokio::test]
async fn cold_start_ingests_latest_report_idempotently() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ry/test/v2/metrica/domainList/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_string(REPORT_2025_01_02))
        .mount(&server)
        .await;
    // After the first run the TLD has data, so the ingester asks for the
    // available range instead; nothing new has been published.
    Mock::given(method("GET"))
        .and(path("/ry/test/v2/metrica/domainLists"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"domainLists":[]}"#))
        .mount(&server)
        .await;

    let client = mosapi_client_for(&server, &["test"]).await;
    let store: Arc<dyn ThreatMatchStore> = Arc::new(SqliteThreatMatchStore::open_in_memory().unwrap());
    let ingester = Ingester::new(
        Arc::new(DomainMetrica::new(client)),
        store.clone(),
        vec!["test".into()],
    );

    let day = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();

    let outcomes = ingester.run().await;
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].1.is_ok());

    let rows = store.load_by_date_and_tld(day, "test").await.unwrap();
    assert_eq!(rows.len(), 2);
    let domains: Vec<&str> = rows.iter().map(|r| r.domain_name.as_str()).collect();
    assert_eq!(domains, vec!["a.test", "b.test"]);
    assert!(rows.iter().all(|r| r.threat_type == "malware"));

    // Second run finds the same state and changes nothing.
    let outcomes = ingester.run().await;
    assert!(outcomes[0].1.is_ok());
    let rows_again = store.load_by_date_and_tld(day, "test").await.unwrap();
    assert_eq!(rows_again, rows);
}

#[tokio::test]
async fn catch_up_processes_each_available_date_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ry/test/v2/metrica/domainLists"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            // Deliberately out of order; ingestion must sort by date.
            r#"{"domainLists":[
                {"domainListDate": "2025-01-03"},
                {"domainListDate": "2025-01-02"}
            ]}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ry/test/v2/metrica/domainList/2025-01-02"))
        .respond_with(ResponseTemplate::new(200).set_body_string(REPORT_2025_01_02))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ry/test/v2/metrica/domainList/2025-01-03"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{
                "version": 2,
                "tld": "test",
                "domainListDate": "2025-01-03",
                "uniqueAbuseDomains": 1,
                "domainListData": [
                    {"threatType": "phishing", "count": 1, "domains": ["c.test"]}
                ]
            }"#,
        ))
        .mount(&server)
        .await;

    let client = mosapi_client_for(&server, &["test"]).await;
    let store: Arc<dyn ThreatMatchStore> = Arc::new(SqliteThreatMatchStore::open_in_memory().unwrap());

    // Pre-existing data up to 2025-01-01.
    let day_one = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    store
        .replace_day(
            "test",
            day_one,
            vec![mosapi_service::store::ThreatMatch {
                tld: "test".into(),
                check_date: day_one,
                domain_name: "seed.test".into(),
                threat_type: "spam".into(),
            }],
        )
        .await
        .unwrap();

    let ingester = Ingester::new(
        Arc::new(DomainMetrica::new(client)),
        store.clone(),
        vec!["test".into()],
    );
    let outcomes = ingester.run().await;
    assert!(outcomes[0].1.is_ok(), "{:?}", outcomes[0].1);

    assert_eq!(
        store.latest_check_date("test").await.unwrap(),
        NaiveDate::from_ymd_opt(2025, 1, 3)
    );
    let day_two = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
    assert_eq!(store.load_by_date_and_tld(day_two, "test").await.unwrap().len(), 2);
    let day_three = NaiveDate::from_ymd_opt(2025, 1, 3).unwrap();
    let rows = store.load_by_date_and_tld(day_three, "test").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].threat_type, "phishing");
    // Seeded day untouched.
    assert_eq!(store.load_by_date_and_tld(day_one, "test").await.unwrap().len(), 1);
}

#[tokio::test]
async fn one_failing_tld_does_not_abort_the_others() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ry/good/v2/monitoring/state"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"tld":"good","status":"Up","testedServices":{}}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ry/bad/v2/monitoring/state"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let client = mosapi_client_for(&server, &["good", "bad"]).await;
    let monitoring = Arc::new(ServiceMonitoring::new(client));
    let publisher = Arc::new(MetricsPublisher::new(
        Arc::new(StatsdSink::new(Metrics::new_noop())),
        1,
    ));

    let state_service = StateService::new(
        monitoring,
        publisher,
        vec!["good".into(), "bad".into()],
        4,
        None,
    );

    let response = state_service.all_summaries().await;
    assert_eq!(response.summaries.len(), 2);
    assert_eq!(response.summaries[0].tld, "good");
    assert_eq!(response.summaries[0].status, "Up");
    assert!(response.summaries[0].active_incidents.is_none());
    assert_eq!(response.summaries[1].tld, "bad");
    assert_eq!(response.summaries[1].status, "ERROR");
    assert!(response.summaries[1].active_incidents.is_none());
}

#[tokio::test]
async fn alarm_aggregation_covers_every_tld_service_pair() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ry/good/v2/monitoring/dns/alarmed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"version":2,"lastUpdateApiDatabase":1422492450,"alarmed":"Yes"}"#,
        ))
        .mount(&server)
        .await;
    // rdds is not monitored for this TLD
    Mock::given(method("GET"))
        .and(path("/ry/good/v2/monitoring/rdds/alarmed"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ry/bad/v2/monitoring/dns/alarmed"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ry/bad/v2/monitoring/rdds/alarmed"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let client = mosapi_client_for(&server, &["good", "bad"]).await;
    let alarm_service = AlarmService::new(
        Arc::new(ServiceMonitoring::new(client)),
        vec!["good".into(), "bad".into()],
        vec!["dns".into(), "rdds".into()],
        4,
        None,
    );

    let response = alarm_service.check_all().await;
    assert_eq!(response.statuses.len(), 4);

    let by_pair: Vec<(&str, &str, &str)> = response
        .statuses
        .iter()
        .map(|s| (s.tld.as_str(), s.service.as_str(), s.status.as_str()))
        .collect();
    assert_eq!(by_pair[0], ("good", "dns", "Yes"));
    assert_eq!(by_pair[1], ("good", "rdds", "Disabled"));
    assert_eq!(by_pair[2], ("bad", "dns", "ERROR"));
    assert_eq!(by_pair[3], ("bad", "rdds", "ERROR"));
    assert!(response.statuses[2].error_message.is_some());
    assert!(response.statuses[0].error_message.is_none());
}

#[tokio::test]
async fn downtime_aggregation_omits_failed_services_only() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ry/good/v2/monitoring/dns/downtime"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"version":2,"lastUpdateApiDatabase":1422492450,"downtime":30,"disabledMonitoring":false}"#,
        ))
        .mount(&server)
        .await;
    // rdds monitoring disabled for this TLD
    Mock::given(method("GET"))
        .and(path("/ry/good/v2/monitoring/rdds/downtime"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ry/bad/v2/monitoring/dns/downtime"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ry/bad/v2/monitoring/rdds/downtime"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"version":2,"lastUpdateApiDatabase":1422492450,"downtime":5,"disabledMonitoring":false}"#,
        ))
        .mount(&server)
        .await;

    let client = mosapi_client_for(&server, &["good", "bad"]).await;
    let downtime_service = DowntimeService::new(
        Arc::new(ServiceMonitoring::new(client)),
        vec!["good".into(), "bad".into()],
        vec!["dns".into(), "rdds".into()],
        4,
        None,
    );

    let response = downtime_service.all_tlds().await;
    assert_eq!(response.tld_downtimes.len(), 2);

    let good = &response.tld_downtimes[0];
    assert_eq!(good.tld, "good");
    assert_eq!(good.service_downtimes["dns"].downtime, 30);
    // unmonitored service materialises as the sentinel, not an omission
    assert!(good.service_downtimes["rdds"].disabled_monitoring);

    let bad = &response.tld_downtimes[1];
    assert_eq!(bad.tld, "bad");
    assert!(!bad.service_downtimes.contains_key("dns"));
    assert_eq!(bad.service_downtimes["rdds"].downtime, 5);
}
