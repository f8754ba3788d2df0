//! Daily abuse report email.
//!
//! Gathers each TLD's most recent day of threat matches and sends one
//! consolidated HTML report. Domains are written as `a[.]example` so the
//! report itself does not trip mail filters.

use crate::store::{StoreError, ThreatMatch, ThreatMatchStore};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;

const REPORT_SUBJECT: &str = "Daily MoSAPI Abuse Report";

#[derive(thiserror::Error, Debug)]
#[error("failed to send mail: {0}")]
pub struct MailError(pub String);

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, subject: &str, html_body: &str, recipient: &str)
    -> Result<(), MailError>;
}

/// Default mailer: logs the report instead of delivering it. Deployments
/// wire in a real delivery implementation.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(
        &self,
        subject: &str,
        html_body: &str,
        recipient: &str,
    ) -> Result<(), MailError> {
        tracing::info!(subject, recipient, body_bytes = html_body.len(), "mail delivery is not configured; logging instead");
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ReportError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Mail(#[from] MailError),
}

pub struct AbuseReportPublisher {
    store: Arc<dyn ThreatMatchStore>,
    mailer: Arc<dyn Mailer>,
    recipient: Option<String>,
    tlds: Vec<String>,
}

impl AbuseReportPublisher {
    pub fn new(
        store: Arc<dyn ThreatMatchStore>,
        mailer: Arc<dyn Mailer>,
        recipient: Option<String>,
        tlds: Vec<String>,
    ) -> Self {
        AbuseReportPublisher {
            store,
            mailer,
            recipient,
            tlds,
        }
    }

    /// Builds and sends the report. Returns `true` when an email went out;
    /// `false` when there was nothing to report or no recipient configured.
    pub async fn publish(&self) -> Result<bool, ReportError> {
        let mut body = String::from(
            "<html><body><h1>MoSAPI Abuse Report</h1>\
             <p>This report contains the latest domain abuse data detected by MoSAPI.</p>",
        );
        let mut has_data = false;

        for tld in &self.tlds {
            let Some(latest) = self.store.latest_check_date(tld).await? else {
                tracing::info!(tld, "no abuse data for TLD");
                continue;
            };
            let matches = self.store.load_by_date_and_tld(latest, tld).await?;
            if matches.is_empty() {
                continue;
            }
            has_data = true;
            append_tld_section(&mut body, tld, latest, &matches);
        }
        body.push_str("</body></html>");

        if !has_data {
            tracing::info!("no new MoSAPI threats found to report");
            return Ok(false);
        }

        let Some(recipient) = self.recipient.as_deref() else {
            tracing::warn!("abuse data present but no report recipient configured");
            return Ok(false);
        };

        self.mailer.send(REPORT_SUBJECT, &body, recipient).await?;
        tracing::info!(recipient, "sent MoSAPI abuse report");
        Ok(true)
    }
}

fn append_tld_section(body: &mut String, tld: &str, date: NaiveDate, matches: &[ThreatMatch]) {
    body.push_str(&format!("<h2>Report for TLD: .{tld} (Date: {date})</h2>"));

    // BTreeMap keeps threat types in a stable order across runs.
    let mut by_type: BTreeMap<&str, Vec<&ThreatMatch>> = BTreeMap::new();
    for m in matches {
        by_type.entry(m.threat_type.as_str()).or_default().push(m);
    }

    for (threat_type, entries) in by_type {
        body.push_str(&format!(
            "<h3>Threat Type: {threat_type} ({} domains)</h3><ul>",
            entries.len()
        ));
        for entry in entries {
            body.push_str(&format!("<li>{}</li>", obfuscate(&entry.domain_name)));
        }
        body.push_str("</ul>");
    }
    body.push_str("<hr>");
}

fn obfuscate(domain: &str) -> String {
    domain.replace('.', "[.]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteThreatMatchStore;
    use parking_lot::Mutex;

    struct CapturingMailer {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl Mailer for CapturingMailer {
        async fn send(
            &self,
            subject: &str,
            html_body: &str,
            recipient: &str,
        ) -> Result<(), MailError> {
            self.sent
                .lock()
                .push((subject.into(), html_body.into(), recipient.into()));
            Ok(())
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn matches_for(tld: &str, day: NaiveDate) -> Vec<ThreatMatch> {
        vec![
            ThreatMatch {
                tld: tld.into(),
                check_date: day,
                domain_name: format!("a.{tld}"),
                threat_type: "malware".into(),
            },
            ThreatMatch {
                tld: tld.into(),
                check_date: day,
                domain_name: format!("b.{tld}"),
                threat_type: "phishing".into(),
            },
        ]
    }

    #[tokio::test]
    async fn publishes_grouped_and_obfuscated_report() {
        let store = Arc::new(SqliteThreatMatchStore::open_in_memory().unwrap());
        let day = date(2025, 1, 2);
        store
            .replace_day("test", day, matches_for("test", day))
            .await
            .unwrap();

        let mailer = Arc::new(CapturingMailer {
            sent: Mutex::new(vec![]),
        });
        let publisher = AbuseReportPublisher::new(
            store,
            mailer.clone(),
            Some("abuse@registry.example".into()),
            vec!["test".into()],
        );

        assert!(publisher.publish().await.unwrap());

        let sent = mailer.sent.lock();
        let (subject, body, recipient) = &sent[0];
        assert_eq!(subject, REPORT_SUBJECT);
        assert_eq!(recipient, "abuse@registry.example");
        assert!(body.contains("Report for TLD: .test (Date: 2025-01-02)"));
        assert!(body.contains("Threat Type: malware (1 domains)"));
        assert!(body.contains("a[.]test"));
        assert!(!body.contains("a.test"));
    }

    #[tokio::test]
    async fn nothing_to_report_sends_nothing() {
        let store = Arc::new(SqliteThreatMatchStore::open_in_memory().unwrap());
        let mailer = Arc::new(CapturingMailer {
            sent: Mutex::new(vec![]),
        });
        let publisher = AbuseReportPublisher::new(
            store,
            mailer.clone(),
            Some("abuse@registry.example".into()),
            vec!["test".into()],
        );

        assert!(!publisher.publish().await.unwrap());
        assert!(mailer.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn missing_recipient_skips_delivery() {
        let store = Arc::new(SqliteThreatMatchStore::open_in_memory().unwrap());
        let day = date(2025, 1, 2);
        store
            .replace_day("test", day, matches_for("test", day))
            .await
            .unwrap();

        let mailer = Arc::new(CapturingMailer {
            sent: Mutex::new(vec![]),
        });
        let publisher = AbuseReportPublisher::new(store, mailer.clone(), None, vec!["test".into()]);

        assert!(!publisher.publish().await.unwrap());
        assert!(mailer.sent.lock().is_empty());
    }
}
