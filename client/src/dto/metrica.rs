//! Domain METRICA response shapes (MoSAPI `v2/metrica/*`).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A full daily domain-abuse report.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MetricaReport {
    #[serde(default)]
    pub version: i32,
    pub tld: String,
    /// Report date, `YYYY-MM-DD`.
    #[serde(rename = "domainListDate")]
    pub domain_list_date: String,
    /// Total number of unique abuse domains detected for that date.
    #[serde(rename = "uniqueAbuseDomains", default)]
    pub unique_abuse_domains: i64,
    #[serde(rename = "domainListData", default)]
    pub threats: Vec<ThreatData>,
}

impl MetricaReport {
    pub fn check_date(&self) -> Result<NaiveDate, chrono::ParseError> {
        NaiveDate::parse_from_str(&self.domain_list_date, "%Y-%m-%d")
    }
}

/// One entry of the `domainListData` array.
///
/// A `count` of -1 means the threat type is not currently monitored. The
/// `domains` list may be a proper subset of `count`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ThreatData {
    #[serde(rename = "threatType")]
    pub threat_type: String,
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub domains: Vec<String>,
}

/// One entry of the `domainLists` listing.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ReportInfo {
    #[serde(rename = "domainListDate")]
    pub domain_list_date: NaiveDate,
    #[serde(rename = "domainListGenerationDate", default)]
    pub domain_list_generation_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub(crate) struct ReportListResponse {
    #[serde(rename = "domainLists", default)]
    pub domain_lists: Vec<ReportInfo>,
}
