use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{Local, SecondsFormat, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use tracing::debug;

use super::{upload_mime, DataSource};
use crate::error::{normalize, ApiError, ApiResult, CallError};
use crate::export::{render_csv, render_pdf, to_records};
use crate::filter::{dashboard_stats, summarize};
use crate::types::anomaly::{
    Anomaly, AnomalyQuery, AnomalyStatus, CommentAck, DetectionFeedback, DetectionResult,
    FeedbackAck, Severity, StatusUpdate,
};
use crate::types::notification::Notification;
use crate::types::report::{
    AuditReport, GeneratedReport, ReportExport, ReportFormat, ReportQuery, ReportRequest,
    ReportStatus, UploadReceipt,
};
use crate::types::settings::{AlertSettings, SettingsUpdate};
use crate::types::stats::{AnomalyStats, DashboardStats, RiskScore, Transaction};

const ANOMALY_FIXTURES: &str = include_str!("../../fixtures/anomalies.json");
const REPORT_FIXTURES: &str = include_str!("../../fixtures/reports.json");

const MAX_DETECTED: usize = 5;
const UPLOAD_SUCCESS_MESSAGE: &str = "File uploaded and processed successfully";

/// Simulated round-trip times for the calls that had one in the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockLatency {
    pub notifications: Duration,
    pub mark_read: Duration,
    pub upload: Duration,
}

impl Default for MockLatency {
    fn default() -> Self {
        Self {
            notifications: Duration::from_millis(500),
            mark_read: Duration::from_millis(300),
            upload: Duration::from_millis(2000),
        }
    }
}

impl MockLatency {
    pub fn none() -> Self {
        Self {
            notifications: Duration::ZERO,
            mark_read: Duration::ZERO,
            upload: Duration::ZERO,
        }
    }
}

/// Fixture-backed source for development without the detection backend.
/// Read-only apart from notification read flags and alert settings.
pub struct MockSource {
    anomalies: Vec<Anomaly>,
    reports: Vec<AuditReport>,
    notifications: Mutex<Vec<Notification>>,
    settings: Mutex<AlertSettings>,
    next_upload_id: AtomicU32,
    latency: MockLatency,
}

impl MockSource {
    pub fn new() -> crate::error::Result<Self> {
        let anomalies: Vec<Anomaly> = serde_json::from_str(ANOMALY_FIXTURES)?;
        let reports: Vec<AuditReport> = serde_json::from_str(REPORT_FIXTURES)?;
        debug!(
            anomalies = anomalies.len(),
            reports = reports.len(),
            "Loaded mock fixtures"
        );
        Ok(Self {
            anomalies,
            reports,
            notifications: Mutex::new(seed_notifications()),
            settings: Mutex::new(AlertSettings::default()),
            next_upload_id: AtomicU32::new(1),
            latency: MockLatency::default(),
        })
    }

    pub fn with_latency(mut self, latency: MockLatency) -> Self {
        self.latency = latency;
        self
    }

    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    fn find_report(&self, id: &str) -> Option<&AuditReport> {
        self.reports.iter().find(|r| r.id == id)
    }

    fn render_export(&self, id: &str, format: ReportFormat) -> ApiResult<ReportExport> {
        let report = self.find_report(id).ok_or_else(|| {
            ApiError::new(
                404,
                format!("Report {} not found", id),
                json!({ "message": format!("Report {} not found", id) }),
            )
        })?;
        let records = to_records(std::slice::from_ref(report))
            .map_err(|e| normalize(CallError::exception(e.to_string())))?;
        let content = match format {
            ReportFormat::Csv | ReportFormat::Excel => render_csv(&records).into_bytes(),
            ReportFormat::Pdf => {
                let generated_at = Local::now().format("%-m/%-d/%Y, %-I:%M:%S %p").to_string();
                render_pdf(&records, &report.title, &generated_at)
            }
        };
        Ok(ReportExport {
            report_id: id.to_string(),
            format,
            content,
        })
    }

    fn risk_for(&self, account_id: &str) -> u32 {
        let total: u32 = self
            .anomalies
            .iter()
            .filter(|a| a.account_id.as_deref() == Some(account_id))
            .map(|a| match a.severity {
                Severity::High => 40u32,
                Severity::Medium => 20,
                Severity::Low => 10,
            })
            .sum();
        total.min(100)
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn minutes_ago(minutes: i64) -> String {
    (Utc::now() - chrono::Duration::minutes(minutes)).to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn seed_notifications() -> Vec<Notification> {
    let seed = |id: &str, anomaly_id: &str, title: &str, message: &str, severity: &str, read, ago| {
        Notification {
            id: id.to_string(),
            anomaly_id: anomaly_id.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            severity: severity.to_string(),
            read,
            created_at: minutes_ago(ago),
        }
    };
    vec![
        seed(
            "1",
            "101",
            "High Severity Anomaly Detected",
            "Unusual transaction pattern detected in account #12345",
            "high",
            false,
            30,
        ),
        seed(
            "2",
            "102",
            "Potential Regulatory Violation",
            "Transaction exceeds reporting threshold",
            "medium",
            true,
            2 * 60,
        ),
        seed(
            "3",
            "103",
            "New Fraud Attempt Detected",
            "Multiple failed authentication attempts",
            "high",
            false,
            5 * 60,
        ),
    ]
}

fn transaction_fixtures() -> Vec<Transaction> {
    let tx = |id: &str, amount, date: &str, kind: &str| Transaction {
        id: id.to_string(),
        amount,
        date: date.to_string(),
        kind: kind.to_string(),
    };
    vec![
        tx("1", 1250.00, "2023-05-01T10:30:00Z", "deposit"),
        tx("2", 450.75, "2023-05-03T14:22:00Z", "withdrawal"),
        tx("3", 2000.00, "2023-05-10T09:15:00Z", "transfer"),
    ]
}

/// Overlay a settings patch. Objects on both sides merge key by key; any
/// other incoming value, `null` included, replaces what was there.
fn overlay_settings(settings: &mut Value, patch: &Value) {
    let (Value::Object(target), Value::Object(fields)) = (settings, patch) else {
        return;
    };
    for (key, incoming) in fields {
        match target.get_mut(key) {
            Some(slot) if slot.is_object() && incoming.is_object() => {
                overlay_settings(slot, incoming)
            }
            _ => {
                target.insert(key.clone(), incoming.clone());
            }
        }
    }
}

impl DataSource for MockSource {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn fetch_anomalies(&self, _query: AnomalyQuery) -> BoxFuture<'_, ApiResult<Vec<Anomaly>>> {
        async move { Ok(self.anomalies.clone()) }.boxed()
    }

    fn fetch_anomaly_by_id(&self, id: String) -> BoxFuture<'_, ApiResult<Option<Anomaly>>> {
        async move { Ok(self.anomalies.iter().find(|a| a.id == id).cloned()) }.boxed()
    }

    fn detect_anomalies(&self, _payload: Value) -> BoxFuture<'_, ApiResult<DetectionResult>> {
        async move {
            let anomalies: Vec<Anomaly> = self
                .anomalies
                .iter()
                .filter(|a| a.status == AnomalyStatus::Open)
                .take(MAX_DETECTED)
                .cloned()
                .collect();
            Ok(DetectionResult {
                detected: anomalies.len(),
                anomalies,
            })
        }
        .boxed()
    }

    fn update_anomaly_status(
        &self,
        id: String,
        status: AnomalyStatus,
        _resolution: Option<Value>,
    ) -> BoxFuture<'_, ApiResult<StatusUpdate>> {
        async move {
            Ok(StatusUpdate {
                success: true,
                id,
                status,
            })
        }
        .boxed()
    }

    fn fetch_anomaly_stats(&self, _timeframe: String) -> BoxFuture<'_, ApiResult<AnomalyStats>> {
        async move { Ok(summarize(&self.anomalies)) }.boxed()
    }

    fn provide_feedback(
        &self,
        id: String,
        _feedback: DetectionFeedback,
    ) -> BoxFuture<'_, ApiResult<FeedbackAck>> {
        async move { Ok(FeedbackAck { success: true, id }) }.boxed()
    }

    fn add_anomaly_comment(
        &self,
        id: String,
        comment: String,
    ) -> BoxFuture<'_, ApiResult<CommentAck>> {
        async move {
            Ok(CommentAck {
                success: true,
                id,
                comment,
            })
        }
        .boxed()
    }

    fn fetch_reports(&self, _query: ReportQuery) -> BoxFuture<'_, ApiResult<Vec<AuditReport>>> {
        async move { Ok(self.reports.clone()) }.boxed()
    }

    fn fetch_report_by_id(&self, id: String) -> BoxFuture<'_, ApiResult<Option<AuditReport>>> {
        async move { Ok(self.find_report(&id).cloned()) }.boxed()
    }

    fn generate_report(
        &self,
        request: ReportRequest,
    ) -> BoxFuture<'_, ApiResult<GeneratedReport>> {
        async move {
            let now = Utc::now();
            let name = request
                .name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("Audit Report {}", Local::now().format("%-m/%-d/%Y")));
            Ok(GeneratedReport {
                id: format!("report-{}", now.timestamp_millis()),
                name,
                date: now_iso(),
                status: ReportStatus::Completed,
            })
        }
        .boxed()
    }

    fn export_report(
        &self,
        id: String,
        format: ReportFormat,
    ) -> BoxFuture<'_, ApiResult<ReportExport>> {
        async move { self.render_export(&id, format) }.boxed()
    }

    fn upload_transaction_file(&self, path: PathBuf) -> BoxFuture<'_, ApiResult<UploadReceipt>> {
        async move {
            upload_mime(&path)?;
            tokio::fs::metadata(&path).await.map_err(|e| {
                normalize(CallError::exception(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            })?;
            tokio::time::sleep(self.latency.upload).await;
            Ok(UploadReceipt {
                success: true,
                report_id: self.next_upload_id.fetch_add(1, Ordering::Relaxed),
                message: UPLOAD_SUCCESS_MESSAGE.to_string(),
            })
        }
        .boxed()
    }

    fn fetch_notifications(&self) -> BoxFuture<'_, ApiResult<Vec<Notification>>> {
        async move {
            tokio::time::sleep(self.latency.notifications).await;
            Ok(self
                .notifications
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone())
        }
        .boxed()
    }

    fn mark_notification_as_read(&self, id: String) -> BoxFuture<'_, ApiResult<()>> {
        async move {
            tokio::time::sleep(self.latency.mark_read).await;
            let mut notifications = self.notifications.lock().unwrap_or_else(|e| e.into_inner());
            match notifications.iter_mut().find(|n| n.id == id) {
                Some(n) => n.read = true,
                None => debug!(id = %id, "Mark-read for unknown notification"),
            }
            Ok(())
        }
        .boxed()
    }

    fn fetch_dashboard_stats(&self) -> BoxFuture<'_, ApiResult<DashboardStats>> {
        async move { Ok(dashboard_stats(&self.anomalies)) }.boxed()
    }

    fn fetch_transaction_history(
        &self,
        _account_id: Option<String>,
    ) -> BoxFuture<'_, ApiResult<Vec<Transaction>>> {
        async move { Ok(transaction_fixtures()) }.boxed()
    }

    fn fetch_risk_score(&self, account_id: String) -> BoxFuture<'_, ApiResult<RiskScore>> {
        async move {
            Ok(RiskScore {
                score: self.risk_for(&account_id),
                last_updated: now_iso(),
            })
        }
        .boxed()
    }

    fn fetch_alert_settings(&self) -> BoxFuture<'_, ApiResult<AlertSettings>> {
        async move { Ok(self.settings.lock().unwrap_or_else(|e| e.into_inner()).clone()) }.boxed()
    }

    fn update_alert_settings(&self, patch: Value) -> BoxFuture<'_, ApiResult<SettingsUpdate>> {
        async move {
            let mut settings = self.settings.lock().unwrap_or_else(|e| e.into_inner());
            let mut merged = serde_json::to_value(&*settings)
                .map_err(|e| normalize(CallError::from(e)))?;
            overlay_settings(&mut merged, &patch);
            let updated: AlertSettings = serde_json::from_value(merged).map_err(|e| {
                ApiError::new(400, format!("Invalid alert settings: {}", e), patch.clone())
            })?;
            *settings = updated.clone();
            Ok(SettingsUpdate {
                success: true,
                settings: updated,
            })
        }
        .boxed()
    }
}
