//! Facade for MoSAPI's Domain METRICA endpoints.
//!
//! Daily reports can be large, so report fetches advertise gzip support and
//! rely on the transport for decompression.

use crate::auth::MosApiClient;
use crate::dto::metrica::{MetricaReport, ReportInfo, ReportListResponse};
use crate::error::{MosApiError, Result};
use crate::monitoring::error_from_body;
use chrono::NaiveDate;
use http::{HeaderMap, StatusCode};
use std::sync::Arc;

const LATEST_ENDPOINT: &str = "v2/metrica/domainList/latest";
const LISTS_ENDPOINT: &str = "v2/metrica/domainLists";
const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct DomainMetrica {
    client: Arc<MosApiClient>,
}

impl DomainMetrica {
    pub fn new(client: Arc<MosApiClient>) -> Self {
        DomainMetrica { client }
    }

    /// The most recent daily report for the TLD; 404 means no report has ever
    /// been produced.
    pub async fn latest_report(&self, tld: &str) -> Result<MetricaReport> {
        self.fetch_report(tld, LATEST_ENDPOINT).await
    }

    /// The daily report for a specific date; 404 means none exists for it.
    pub async fn report_for_date(&self, tld: &str, date: NaiveDate) -> Result<MetricaReport> {
        let endpoint = format!("v2/metrica/domainList/{}", date.format(DATE_FORMAT));
        self.fetch_report(tld, &endpoint).await
    }

    async fn fetch_report(&self, tld: &str, endpoint: &str) -> Result<MetricaReport> {
        let response = self
            .client
            .get_with_decompression(tld, endpoint, &[], HeaderMap::new())
            .await?;
        match response.status {
            StatusCode::OK => Ok(serde_json::from_str(&response.body)?),
            StatusCode::NOT_FOUND => Err(MosApiError::NotFound(format!(
                "no METRICA report available at {endpoint} for {tld}"
            ))),
            status => Err(error_from_body(endpoint, status, &response.body)),
        }
    }

    /// Lists the report dates available within the optional range. A 400 with
    /// result codes 2012/2013/2014 surfaces as the corresponding
    /// date-validation [`MosApiError::BadRequest`].
    pub async fn list_available(
        &self,
        tld: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<ReportInfo>> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(start) = start_date {
            query.push(("startDate", start.format(DATE_FORMAT).to_string()));
        }
        if let Some(end) = end_date {
            query.push(("endDate", end.format(DATE_FORMAT).to_string()));
        }

        let response = self
            .client
            .get(tld, LISTS_ENDPOINT, &query, HeaderMap::new())
            .await?;
        match response.status {
            StatusCode::OK => {
                let listing: ReportListResponse = serde_json::from_str(&response.body)?;
                Ok(listing.domain_lists)
            }
            status => Err(error_from_body(LISTS_ENDPOINT, status, &response.body)),
        }
    }
}
