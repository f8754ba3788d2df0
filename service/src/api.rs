//! HTTP action surface.
//!
//! One route per operational task, mirroring the paths the scheduler and
//! operators already hit. MoSAPI failures surface as 503 with a short
//! message; the detailed error chain stays in the log.

use crate::alarm::{AlarmResponse, AlarmService};
use crate::downtime::{AllTldsDowntime, DowntimeService};
use crate::ingest::Ingester;
use crate::report::{AbuseReportPublisher, ReportError};
use crate::state::{AllServicesStateResponse, StateService};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router, extract::Query, extract::State};
use chrono::NaiveDate;
use mosapi_client::dto::metrica::{MetricaReport, ReportInfo};
use mosapi_client::error::MosApiError;
use mosapi_client::metrica::DomainMetrica;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Clone)]
pub struct AppState {
    pub state_service: Arc<StateService>,
    pub alarm_service: Arc<AlarmService>,
    pub downtime_service: Arc<DowntimeService>,
    pub metrica: Arc<DomainMetrica>,
    pub ingester: Arc<Ingester>,
    pub report_publisher: Arc<AbuseReportPublisher>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/mosapi/check", get(check))
        .route("/_dr/mosapi/state", get(all_states))
        .route("/_dr/mosapi/checkalarm", get(check_alarms))
        .route("/_dr/mosapi/downtime", get(all_downtime))
        .route("/_dr/mosapi/listMetricaReports", get(list_metrica_reports))
        .route("/_dr/mosapi/metricaReport", get(metrica_report))
        .route("/_dr/task/ingestMosApiMetricaReport", get(ingest_reports))
        .route("/_dr/task/publishMosApiReport", get(publish_report))
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

impl From<MosApiError> for ApiError {
    fn from(e: MosApiError) -> Self {
        tracing::warn!(error = %e, "MoSAPI request failed");
        ApiError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "MoSAPI is currently unavailable".into(),
        }
    }
}

impl From<ReportError> for ApiError {
    fn from(e: ReportError) -> Self {
        tracing::warn!(error = %e, "abuse report publication failed");
        ApiError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "abuse report publication failed".into(),
        }
    }
}

async fn check() -> &'static str {
    "mosapi endpoints are serving\n"
}

async fn all_states(State(app): State<AppState>) -> Json<AllServicesStateResponse> {
    Json(app.state_service.all_summaries().await)
}

async fn check_alarms(State(app): State<AppState>) -> Json<AlarmResponse> {
    Json(app.alarm_service.check_all().await)
}

async fn all_downtime(State(app): State<AppState>) -> Json<AllTldsDowntime> {
    Json(app.downtime_service.all_tlds().await)
}

async fn list_metrica_reports(
    State(app): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<ReportInfo>>, ApiError> {
    let tld = require_tld(&params)?;
    let start_date = date_param(&params, "startDate");
    let end_date = date_param(&params, "endDate");

    let reports = app.metrica.list_available(tld, start_date, end_date).await?;
    Ok(Json(reports))
}

async fn metrica_report(
    State(app): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<MetricaReport>, ApiError> {
    let tld = require_tld(&params)?;
    let report = match date_param(&params, "date") {
        Some(date) => app.metrica.report_for_date(tld, date).await?,
        None => app.metrica.latest_report(tld).await?,
    };
    Ok(Json(report))
}

#[derive(Serialize)]
struct IngestOutcome {
    tld: String,
    status: &'static str,
}

async fn ingest_reports(State(app): State<AppState>) -> Json<Vec<IngestOutcome>> {
    let outcomes = app
        .ingester
        .run()
        .await
        .into_iter()
        .map(|(tld, result)| IngestOutcome {
            tld,
            status: if result.is_ok() { "ok" } else { "error" },
        })
        .collect();
    Json(outcomes)
}

async fn publish_report(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let sent = app.report_publisher.publish().await?;
    Ok(Json(serde_json::json!({ "sent": sent })))
}

fn require_tld(params: &HashMap<String, String>) -> Result<&str, ApiError> {
    params
        .get("tld")
        .map(String::as_str)
        .filter(|tld| !tld.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing required parameter: tld"))
}

/// `YYYY-MM-DD` query parameter; anything missing or malformed is absent.
fn date_param(params: &HashMap<String, String>, name: &str) -> Option<NaiveDate> {
    params
        .get(name)
        .and_then(|value| NaiveDate::parse_from_str(value, DATE_FORMAT).ok())
}
