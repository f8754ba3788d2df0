//! Persisted threat matches from daily METRICA reports.
//!
//! The store is the only writer of the `threat_match` table. Replacing a
//! day's rows is one transaction (delete, then inserts), which is what makes
//! re-ingesting the same day idempotent.

use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Arc;
use tokio::task;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// One domain flagged for one threat type on one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreatMatch {
    pub tld: String,
    pub check_date: NaiveDate,
    pub domain_name: String,
    pub threat_type: String,
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored check_date is not a date: {0}")]
    CorruptDate(String),
    #[error("database task failed: {0}")]
    Join(String),
}

#[async_trait]
pub trait ThreatMatchStore: Send + Sync {
    /// Most recent `check_date` present for the TLD, if any.
    async fn latest_check_date(&self, tld: &str) -> Result<Option<NaiveDate>, StoreError>;

    async fn load_by_date_and_tld(
        &self,
        date: NaiveDate,
        tld: &str,
    ) -> Result<Vec<ThreatMatch>, StoreError>;

    /// Atomically replaces all rows of `(tld, date)` with `rows`.
    async fn replace_day(
        &self,
        tld: &str,
        date: NaiveDate,
        rows: Vec<ThreatMatch>,
    ) -> Result<(), StoreError>;
}

/// SQLite-backed store. Calls run on the blocking pool; the connection is
/// shared behind a mutex, which also serialises writers.
pub struct SqliteThreatMatchStore {
    conn: Arc<parking_lot::Mutex<Connection>>,
}

impl SqliteThreatMatchStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS threat_match (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tld TEXT NOT NULL,
                check_date TEXT NOT NULL,
                domain_name TEXT NOT NULL,
                threat_type TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_threat_match_tld_date
                ON threat_match (tld, check_date);",
        )?;
        Ok(SqliteThreatMatchStore {
            conn: Arc::new(parking_lot::Mutex::new(conn)),
        })
    }

    async fn run_blocking<R, F>(&self, f: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: FnOnce(&Connection) -> Result<R, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

#[async_trait]
impl ThreatMatchStore for SqliteThreatMatchStore {
    async fn latest_check_date(&self, tld: &str) -> Result<Option<NaiveDate>, StoreError> {
        let tld = tld.to_string();
        self.run_blocking(move |conn| {
            // ISO dates sort lexicographically, so MAX over TEXT is correct.
            let max: Option<String> = conn.query_row(
                "SELECT MAX(check_date) FROM threat_match WHERE tld = ?1",
                params![tld],
                |row| row.get(0),
            )?;
            max.map(|text| {
                NaiveDate::parse_from_str(&text, DATE_FORMAT)
                    .map_err(|_| StoreError::CorruptDate(text))
            })
            .transpose()
        })
        .await
    }

    async fn load_by_date_and_tld(
        &self,
        date: NaiveDate,
        tld: &str,
    ) -> Result<Vec<ThreatMatch>, StoreError> {
        let tld = tld.to_string();
        self.run_blocking(move |conn| {
            let mut statement = conn.prepare(
                "SELECT tld, check_date, domain_name, threat_type
                 FROM threat_match WHERE check_date = ?1 AND tld = ?2
                 ORDER BY threat_type, domain_name",
            )?;
            let rows = statement.query_map(
                params![date.format(DATE_FORMAT).to_string(), tld],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )?;

            let mut matches = Vec::new();
            for row in rows {
                let (tld, check_date, domain_name, threat_type) = row?;
                let check_date = NaiveDate::parse_from_str(&check_date, DATE_FORMAT)
                    .map_err(|_| StoreError::CorruptDate(check_date))?;
                matches.push(ThreatMatch {
                    tld,
                    check_date,
                    domain_name,
                    threat_type,
                });
            }
            Ok(matches)
        })
        .await
    }

    async fn replace_day(
        &self,
        tld: &str,
        date: NaiveDate,
        rows: Vec<ThreatMatch>,
    ) -> Result<(), StoreError> {
        let tld = tld.to_string();
        self.run_blocking(move |conn| {
            let date_text = date.format(DATE_FORMAT).to_string();
            conn.execute("BEGIN IMMEDIATE", [])?;
            let result = (|| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "DELETE FROM threat_match WHERE check_date = ?1 AND tld = ?2",
                    params![date_text, tld],
                )?;
                let mut insert = conn.prepare(
                    "INSERT INTO threat_match (tld, check_date, domain_name, threat_type)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for row in &rows {
                    insert.execute(params![
                        row.tld,
                        row.check_date.format(DATE_FORMAT).to_string(),
                        row.domain_name,
                        row.threat_type,
                    ])?;
                }
                Ok(())
            })();

            match result {
                Ok(()) => {
                    conn.execute("COMMIT", [])?;
                    Ok(())
                }
                Err(e) => {
                    let _ = conn.execute("ROLLBACK", []);
                    Err(e.into())
                }
            }
        })
        .await
    }
}
