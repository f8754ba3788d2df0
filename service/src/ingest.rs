//! Catch-up ingestion of daily METRICA abuse reports.
//!
//! Per TLD and run: find the newest day already persisted, fetch every report
//! published since (or the latest report on a cold start), and replace each
//! day's rows atomically. One TLD's failure aborts its remaining dates but
//! never touches the other TLDs.

use crate::metrics_defs::INGESTED_REPORTS;
use crate::store::{StoreError, ThreatMatch, ThreatMatchStore};
use chrono::{Days, NaiveDate, Utc};
use metrics::counter;
use mosapi_client::dto::metrica::MetricaReport;
use mosapi_client::error::MosApiError;
use mosapi_client::metrica::DomainMetrica;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    MosApi(#[from] MosApiError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("report carries an invalid domainListDate: {0:?}")]
    BadReportDate(String),
}

pub struct Ingester {
    metrica: Arc<DomainMetrica>,
    store: Arc<dyn ThreatMatchStore>,
    tlds: Vec<String>,
}

impl Ingester {
    pub fn new(
        metrica: Arc<DomainMetrica>,
        store: Arc<dyn ThreatMatchStore>,
        tlds: Vec<String>,
    ) -> Self {
        Ingester {
            metrica,
            store,
            tlds,
        }
    }

    /// Runs the catch-up for every configured TLD, isolating failures.
    /// Returns one `(tld, outcome)` pair per TLD in input order.
    pub async fn run(&self) -> Vec<(String, Result<(), IngestError>)> {
        tracing::info!(tlds = ?self.tlds, "starting METRICA report ingestion");
        let mut outcomes = Vec::with_capacity(self.tlds.len());
        for tld in &self.tlds {
            let outcome = self.ingest_for_tld(tld).await;
            if let Err(e) = &outcome {
                tracing::error!(tld, error = %e, "failed to ingest reports for TLD");
            }
            outcomes.push((tld.clone(), outcome));
        }
        outcomes
    }

    pub async fn ingest_for_tld(&self, tld: &str) -> Result<(), IngestError> {
        match self.store.latest_check_date(tld).await? {
            Some(latest) => self.catch_up(tld, latest).await,
            None => {
                tracing::info!(tld, "no existing data; fetching latest report");
                let report = self.metrica.latest_report(tld).await?;
                let check_date = report
                    .check_date()
                    .map_err(|_| IngestError::BadReportDate(report.domain_list_date.clone()))?;
                self.process_report(&report, check_date).await
            }
        }
    }

    async fn catch_up(&self, tld: &str, latest: NaiveDate) -> Result<(), IngestError> {
        let Some(start_date) = latest.checked_add_days(Days::new(1)) else {
            // latest is NaiveDate::MAX; nothing newer can exist
            return Ok(());
        };
        let end_date = Utc::now().date_naive();

        if start_date > end_date {
            tracing::info!(tld, %latest, "TLD is up to date");
            return Ok(());
        }

        tracing::info!(tld, %start_date, %end_date, "catching up TLD");
        let mut available = self
            .metrica
            .list_available(tld, Some(start_date), Some(end_date))
            .await?;
        // Same-TLD reports are processed strictly in date order.
        available.sort_by_key(|info| info.domain_list_date);

        for info in available {
            let report = self
                .metrica
                .report_for_date(tld, info.domain_list_date)
                .await?;
            self.process_report(&report, info.domain_list_date).await?;
        }
        Ok(())
    }

    /// Replaces the day's rows in one transaction. Threat entries without
    /// named domains (headline-only summaries, or count = -1 for unmonitored
    /// types) contribute nothing.
    async fn process_report(
        &self,
        report: &MetricaReport,
        check_date: NaiveDate,
    ) -> Result<(), IngestError> {
        tracing::info!(
            tld = %report.tld,
            %check_date,
            threat_types = report.threats.len(),
            "processing METRICA report"
        );

        let mut rows = Vec::new();
        for threat in &report.threats {
            if threat.domains.is_empty() {
                tracing::info!(
                    threat_type = %threat.threat_type,
                    count = threat.count,
                    "threat type has no named domains; skipping"
                );
                continue;
            }
            for domain in &threat.domains {
                rows.push(ThreatMatch {
                    tld: report.tld.clone(),
                    check_date,
                    domain_name: domain.clone(),
                    threat_type: threat.threat_type.clone(),
                });
            }
        }

        self.store.replace_day(&report.tld, check_date, rows).await?;
        counter!(INGESTED_REPORTS.name, "tld" => report.tld.clone()).increment(1);
        Ok(())
    }
}
