//! Data sources behind the façade. One is picked when the service is built:
//! fixtures for development, or the detection backend over HTTP.

pub mod mock;
pub mod remote;

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::{ApiError, ApiResult};
use crate::types::anomaly::{
    Anomaly, AnomalyQuery, AnomalyStatus, CommentAck, DetectionFeedback, DetectionResult,
    FeedbackAck, StatusUpdate,
};
use crate::types::notification::Notification;
use crate::types::report::{
    AuditReport, GeneratedReport, ReportExport, ReportFormat, ReportQuery, ReportRequest,
    UploadReceipt,
};
use crate::types::settings::{AlertSettings, SettingsUpdate};
use crate::types::stats::{AnomalyStats, DashboardStats, RiskScore, Transaction};

pub use mock::MockSource;
pub use remote::RemoteSource;

pub trait DataSource: Send + Sync {
    fn name(&self) -> &'static str;

    fn fetch_anomalies(&self, query: AnomalyQuery) -> BoxFuture<'_, ApiResult<Vec<Anomaly>>>;
    fn fetch_anomaly_by_id(&self, id: String) -> BoxFuture<'_, ApiResult<Option<Anomaly>>>;
    fn detect_anomalies(&self, payload: Value) -> BoxFuture<'_, ApiResult<DetectionResult>>;
    fn update_anomaly_status(
        &self,
        id: String,
        status: AnomalyStatus,
        resolution: Option<Value>,
    ) -> BoxFuture<'_, ApiResult<StatusUpdate>>;
    fn fetch_anomaly_stats(&self, timeframe: String) -> BoxFuture<'_, ApiResult<AnomalyStats>>;
    fn provide_feedback(
        &self,
        id: String,
        feedback: DetectionFeedback,
    ) -> BoxFuture<'_, ApiResult<FeedbackAck>>;
    fn add_anomaly_comment(&self, id: String, comment: String)
        -> BoxFuture<'_, ApiResult<CommentAck>>;

    fn fetch_reports(&self, query: ReportQuery) -> BoxFuture<'_, ApiResult<Vec<AuditReport>>>;
    fn fetch_report_by_id(&self, id: String) -> BoxFuture<'_, ApiResult<Option<AuditReport>>>;
    fn generate_report(&self, request: ReportRequest)
        -> BoxFuture<'_, ApiResult<GeneratedReport>>;
    fn export_report(
        &self,
        id: String,
        format: ReportFormat,
    ) -> BoxFuture<'_, ApiResult<ReportExport>>;
    fn upload_transaction_file(&self, path: PathBuf) -> BoxFuture<'_, ApiResult<UploadReceipt>>;

    fn fetch_notifications(&self) -> BoxFuture<'_, ApiResult<Vec<Notification>>>;
    fn mark_notification_as_read(&self, id: String) -> BoxFuture<'_, ApiResult<()>>;

    fn fetch_dashboard_stats(&self) -> BoxFuture<'_, ApiResult<DashboardStats>>;
    fn fetch_transaction_history(
        &self,
        account_id: Option<String>,
    ) -> BoxFuture<'_, ApiResult<Vec<Transaction>>>;
    fn fetch_risk_score(&self, account_id: String) -> BoxFuture<'_, ApiResult<RiskScore>>;
    fn fetch_alert_settings(&self) -> BoxFuture<'_, ApiResult<AlertSettings>>;
    /// `patch` may be a full settings object or a subset of its fields.
    fn update_alert_settings(&self, patch: Value) -> BoxFuture<'_, ApiResult<SettingsUpdate>>;
}

pub const UPLOAD_REJECTED_MESSAGE: &str = "Please upload a CSV or Excel file";

/// MIME type for an accepted transaction file, or a local rejection.
pub fn upload_mime(path: &Path) -> ApiResult<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("csv") => Ok("text/csv"),
        Some("xlsx") => Ok("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        Some("xls") => Ok("application/vnd.ms-excel"),
        _ => Err(ApiError::new(
            0,
            UPLOAD_REJECTED_MESSAGE,
            Value::String(path.display().to_string()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_accepts_csv_and_excel() {
        assert_eq!(upload_mime(Path::new("ledger.csv")).unwrap(), "text/csv");
        assert_eq!(upload_mime(Path::new("LEDGER.XLS")).unwrap(), "application/vnd.ms-excel");
        assert!(upload_mime(Path::new("q1.xlsx")).unwrap().contains("spreadsheetml"));
    }

    #[test]
    fn upload_rejects_other_files() {
        let err = upload_mime(Path::new("notes.txt")).unwrap_err();
        assert_eq!(err.status, 0);
        assert_eq!(err.message, UPLOAD_REJECTED_MESSAGE);
        assert!(upload_mime(Path::new("no_extension")).is_err());
    }
}
