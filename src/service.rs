use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::ApiConfig;
use crate::error::{normalize, ApiError, ApiResult, CallError, Result};
use crate::export::{self, ExportFormat};
use crate::feedback::FeedbackStore;
use crate::filter::{apply_filter, narrow_for_report, AnomalyFilter};
use crate::source::{DataSource, MockSource, RemoteSource};
use crate::state::OperationState;
use crate::storage::LocalStorage;
use crate::types::anomaly::{
    Anomaly, AnomalyQuery, AnomalyStatus, CommentAck, DetectionFeedback, DetectionResult,
    FeedbackAck, FeedbackJudgment, StatusUpdate,
};
use crate::types::notification::Notification;
use crate::types::report::{
    AuditReport, GeneratedReport, ReportExport, ReportFormat, ReportOptions, ReportQuery,
    ReportRequest, UploadReceipt,
};
use crate::types::settings::{AlertSettings, SettingsUpdate};
use crate::types::stats::{AnomalyStats, DashboardStats, RiskScore, Transaction};

pub const DEFAULT_STATS_TIMEFRAME: &str = "week";

/// Operation keys for the loading and error maps.
pub mod keys {
    pub const FETCH_ANOMALIES: &str = "fetchAnomalies";
    pub const DETECT_ANOMALIES: &str = "detectAnomalies";
    pub const FETCH_REPORTS: &str = "fetchReports";
    pub const GENERATE_REPORT: &str = "generateReport";
    pub const UPLOAD_TRANSACTION_FILE: &str = "uploadTransactionFile";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const MARK_READ: &str = "markRead";
    pub const DASHBOARD_STATS: &str = "dashboardStats";
    pub const TRANSACTION_HISTORY: &str = "transactionHistory";
    pub const ALERT_SETTINGS: &str = "alertSettings";
    pub const UPDATE_ALERT_SETTINGS: &str = "updateAlertSettings";

    pub fn fetch_anomaly(id: &str) -> String {
        format!("fetchAnomaly_{}", id)
    }

    pub fn update_status(id: &str) -> String {
        format!("updateStatus_{}", id)
    }

    pub fn stats(timeframe: &str) -> String {
        format!("stats_{}", timeframe)
    }

    pub fn feedback(id: &str) -> String {
        format!("feedback_{}", id)
    }

    pub fn add_comment(id: &str) -> String {
        format!("addComment_{}", id)
    }

    pub fn fetch_report(id: &str) -> String {
        format!("fetchReport_{}", id)
    }

    pub fn export(id: &str, format: &str) -> String {
        format!("export_{}_{}", id, format)
    }

    pub fn risk_score(account_id: &str) -> String {
        format!("riskScore_{}", account_id)
    }
}

/// Single entry point for dashboard data. Every tracked operation records
/// its loading flag and last error under its key and yields `None` on failure.
pub struct ApiService {
    source: Arc<dyn DataSource>,
    state: OperationState,
    feedback: FeedbackStore,
    export_dir: PathBuf,
}

impl ApiService {
    pub fn new(source: Arc<dyn DataSource>, feedback: FeedbackStore, export_dir: PathBuf) -> Self {
        Self {
            source,
            state: OperationState::new(),
            feedback,
            export_dir,
        }
    }

    /// Pick the data source once, from `use_mock_data`.
    pub fn from_config(config: &ApiConfig, storage: LocalStorage) -> Result<Self> {
        let source: Arc<dyn DataSource> = if config.use_mock_data {
            Arc::new(MockSource::new()?)
        } else {
            Arc::new(RemoteSource::from_config(config)?)
        };
        info!(source = source.name(), export_dir = %config.export_dir.display(), "API service ready");
        Ok(Self::new(
            source,
            FeedbackStore::new(storage),
            config.export_dir.clone(),
        ))
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    pub fn state(&self) -> &OperationState {
        &self.state
    }

    pub fn is_loading(&self, key: &str) -> bool {
        self.state.is_loading(key)
    }

    pub fn error(&self, key: &str) -> Option<ApiError> {
        self.state.error(key)
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    async fn tracked<'a, T, M>(&'a self, key: &str, make: M) -> Option<T>
    where
        M: FnOnce() -> BoxFuture<'a, ApiResult<T>>,
    {
        let _guard = self.state.begin(key);

        let outcome = match std::panic::catch_unwind(AssertUnwindSafe(make)) {
            Ok(future) => match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(panic_error(payload)),
            },
            Err(payload) => Err(panic_error(payload)),
        };

        match outcome {
            Ok(data) => Some(data),
            Err(err) => {
                warn!(key, status = err.status, message = %err.message, "API operation failed");
                self.state.set_error(key, err);
                None
            }
        }
    }

    pub async fn fetch_anomalies(&self, query: AnomalyQuery) -> Option<Vec<Anomaly>> {
        self.tracked(keys::FETCH_ANOMALIES, || self.source.fetch_anomalies(query))
            .await
    }

    /// `None` on failure and for unknown ids.
    pub async fn fetch_anomaly_by_id(&self, id: &str) -> Option<Anomaly> {
        self.tracked(&keys::fetch_anomaly(id), || {
            self.source.fetch_anomaly_by_id(id.to_string())
        })
        .await
        .flatten()
    }

    pub async fn detect_anomalies(&self, payload: Value) -> Option<DetectionResult> {
        self.tracked(keys::DETECT_ANOMALIES, || self.source.detect_anomalies(payload))
            .await
    }

    pub async fn update_anomaly_status(
        &self,
        id: &str,
        status: AnomalyStatus,
        resolution: Option<Value>,
    ) -> Option<StatusUpdate> {
        self.tracked(&keys::update_status(id), || {
            self.source
                .update_anomaly_status(id.to_string(), status, resolution)
        })
        .await
    }

    /// Aggregate stats for `timeframe`, `"week"` when not given.
    pub async fn fetch_anomaly_stats(&self, timeframe: Option<&str>) -> Option<AnomalyStats> {
        let timeframe = timeframe.unwrap_or(DEFAULT_STATS_TIMEFRAME);
        self.tracked(&keys::stats(timeframe), || {
            self.source.fetch_anomaly_stats(timeframe.to_string())
        })
        .await
    }

    pub async fn provide_feedback(
        &self,
        id: &str,
        feedback: DetectionFeedback,
    ) -> Option<FeedbackAck> {
        self.tracked(&keys::feedback(id), || {
            self.source.provide_feedback(id.to_string(), feedback)
        })
        .await
    }

    pub async fn add_anomaly_comment(&self, id: &str, comment: &str) -> Option<CommentAck> {
        self.tracked(&keys::add_comment(id), || {
            self.source
                .add_anomaly_comment(id.to_string(), comment.to_string())
        })
        .await
    }

    pub async fn fetch_reports(&self, query: ReportQuery) -> Option<Vec<AuditReport>> {
        self.tracked(keys::FETCH_REPORTS, || self.source.fetch_reports(query))
            .await
    }

    pub async fn fetch_report_by_id(&self, id: &str) -> Option<AuditReport> {
        self.tracked(&keys::fetch_report(id), || {
            self.source.fetch_report_by_id(id.to_string())
        })
        .await
        .flatten()
    }

    pub async fn generate_report(&self, request: ReportRequest) -> Option<GeneratedReport> {
        self.tracked(keys::GENERATE_REPORT, || self.source.generate_report(request))
            .await
    }

    pub async fn export_report(&self, id: &str, format: ReportFormat) -> Option<ReportExport> {
        self.tracked(&keys::export(id, format.as_str()), || {
            self.source.export_report(id.to_string(), format)
        })
        .await
    }

    pub async fn upload_transaction_file(&self, path: impl AsRef<Path>) -> Option<UploadReceipt> {
        let path = path.as_ref().to_path_buf();
        self.tracked(keys::UPLOAD_TRANSACTION_FILE, || {
            self.source.upload_transaction_file(path)
        })
        .await
    }

    pub async fn fetch_notifications(&self) -> Option<Vec<Notification>> {
        self.tracked(keys::NOTIFICATIONS, || self.source.fetch_notifications())
            .await
    }

    /// `true` once the notification is marked read.
    pub async fn mark_notification_as_read(&self, id: &str) -> bool {
        self.tracked(keys::MARK_READ, || {
            self.source.mark_notification_as_read(id.to_string())
        })
        .await
        .is_some()
    }

    pub async fn fetch_dashboard_stats(&self) -> Option<DashboardStats> {
        self.tracked(keys::DASHBOARD_STATS, || self.source.fetch_dashboard_stats())
            .await
    }

    pub async fn fetch_transaction_history(
        &self,
        account_id: Option<&str>,
    ) -> Option<Vec<Transaction>> {
        self.tracked(keys::TRANSACTION_HISTORY, || {
            self.source
                .fetch_transaction_history(account_id.map(str::to_string))
        })
        .await
    }

    pub async fn fetch_risk_score(&self, account_id: &str) -> Option<RiskScore> {
        self.tracked(&keys::risk_score(account_id), || {
            self.source.fetch_risk_score(account_id.to_string())
        })
        .await
    }

    pub async fn fetch_alert_settings(&self) -> Option<AlertSettings> {
        self.tracked(keys::ALERT_SETTINGS, || self.source.fetch_alert_settings())
            .await
    }

    pub async fn update_alert_settings(&self, settings: Value) -> Option<SettingsUpdate> {
        self.tracked(keys::UPDATE_ALERT_SETTINGS, || {
            self.source.update_alert_settings(settings)
        })
        .await
    }

    /// Store a reviewer judgment locally. Not tracked in the operation maps.
    pub async fn submit_anomaly_feedback(
        &self,
        anomaly_id: &str,
        is_true_positive: bool,
        comments: &str,
    ) -> Result<()> {
        self.feedback
            .submit(anomaly_id, is_true_positive, comments)
            .await
            .map_err(|e| {
                error!(error = %e, anomaly_id, "Error submitting anomaly feedback");
                e
            })
    }

    pub fn get_anomaly_feedback(&self, anomaly_id: &str) -> Option<FeedbackJudgment> {
        self.feedback.get(anomaly_id)
    }

    /// Fetch everything and narrow locally with the dashboard filter.
    pub async fn fetch_filtered_anomalies(&self, filter: &AnomalyFilter) -> Option<Vec<Anomaly>> {
        let all = self.fetch_anomalies(AnomalyQuery::default()).await?;
        let filtered = apply_filter(&all, filter);
        debug!(total = all.len(), kept = filtered.len(), "Applied anomaly filter");
        Some(filtered)
    }

    /// Narrow `anomalies` by the report selections, then request the report.
    pub async fn generate_custom_report(
        &self,
        anomalies: &[Anomaly],
        options: ReportOptions,
        name: Option<String>,
    ) -> Option<GeneratedReport> {
        let selected = narrow_for_report(anomalies, &options);
        debug!(selected = selected.len(), format = %options.format, "Generating custom report");
        self.generate_report(ReportRequest {
            name,
            options,
            anomalies: selected,
        })
        .await
    }

    /// Write `anomalies` as `anomalies-export.<ext>` into the export directory.
    pub fn export_anomalies(&self, anomalies: &[Anomaly], format: ExportFormat) -> Result<PathBuf> {
        export::export_anomalies(anomalies, format, &self.export_dir)
    }
}

fn panic_error(payload: Box<dyn Any + Send>) -> ApiError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned());
    let raw = message.clone().unwrap_or_else(|| "panic".to_string());
    normalize(CallError::Exception { message, raw })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UNEXPECTED_ERROR_MESSAGE;
    use crate::retry::RetryPolicy;
    use crate::source::mock::MockLatency;
    use crate::storage::tests::test_storage;
    use crate::types::anomaly::Severity;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::time::Duration;
    use tempfile::TempDir;

    fn service_with(source: Arc<dyn DataSource>) -> (TempDir, ApiService) {
        let (dir, storage) = test_storage();
        let feedback = FeedbackStore::new(storage).with_latency(Duration::ZERO);
        let export_dir = dir.path().join("exports");
        (dir, ApiService::new(source, feedback, export_dir))
    }

    fn mock_service() -> (TempDir, ApiService) {
        let source = MockSource::new().unwrap().with_latency(MockLatency::none());
        service_with(Arc::new(source))
    }

    #[tokio::test]
    async fn success_returns_data_and_clears_loading() {
        let (_dir, service) = mock_service();
        let list = service.fetch_anomalies(AnomalyQuery::default()).await.unwrap();
        assert_eq!(list.len(), 8);
        assert!(!service.is_loading(keys::FETCH_ANOMALIES));
        assert!(service.error(keys::FETCH_ANOMALIES).is_none());
        assert_eq!(service.source_name(), "mock");
    }

    #[tokio::test]
    async fn failure_is_recorded_under_key() {
        let (_dir, service) = mock_service();
        let result: Option<u32> = service
            .tracked("stats_week", || {
                async { Err(ApiError::new(503, "Server error occurred", Value::Null)) }.boxed()
            })
            .await;
        assert!(result.is_none());
        assert_eq!(service.error("stats_week").unwrap().status, 503);
        assert!(!service.is_loading("stats_week"));

        let retried: Option<u32> = service.tracked("stats_week", || async { Ok(7) }.boxed()).await;
        assert_eq!(retried, Some(7));
        assert!(service.error("stats_week").is_none());
    }

    #[tokio::test]
    async fn loading_is_set_while_in_flight() {
        let (_dir, service) = mock_service();
        let (tx, rx) = tokio::sync::oneshot::channel::<u32>();
        let fut = service.tracked("detectAnomalies", move || {
            async move { Ok(rx.await.unwrap_or(0)) }.boxed()
        });
        tokio::pin!(fut);
        assert!(futures::poll!(&mut fut).is_pending());
        assert!(service.is_loading("detectAnomalies"));
        tx.send(3).unwrap();
        assert_eq!(fut.await, Some(3));
        assert!(!service.is_loading("detectAnomalies"));
    }

    async fn panics_after_yield() -> ApiResult<u32> {
        tokio::task::yield_now().await;
        std::panic::panic_any(42u8)
    }

    #[tokio::test]
    async fn panics_are_normalized_and_release_loading() {
        let (_dir, service) = mock_service();

        let sync: Option<u32> = service
            .tracked("export_R1_pdf", || panic!("renderer exploded"))
            .await;
        assert!(sync.is_none());
        let err = service.error("export_R1_pdf").unwrap();
        assert_eq!(err.status, 0);
        assert_eq!(err.message, "renderer exploded");
        assert!(!service.is_loading("export_R1_pdf"));

        let late: Option<u32> = service
            .tracked("generateReport", || panics_after_yield().boxed())
            .await;
        assert!(late.is_none());
        assert_eq!(
            service.error("generateReport").unwrap().message,
            UNEXPECTED_ERROR_MESSAGE
        );
        assert!(!service.state().any_loading());
    }

    #[tokio::test]
    async fn by_id_keys_and_missing_items() {
        let (_dir, service) = mock_service();
        assert!(service.fetch_anomaly_by_id("ANM-1002").await.is_some());
        assert!(service.fetch_anomaly_by_id("ANM-9999").await.is_none());
        assert!(service.error(&keys::fetch_anomaly("ANM-9999")).is_none());

        let loading = service.state().loading_snapshot();
        assert!(loading.contains_key("fetchAnomaly_ANM-1002"));
        assert!(loading.contains_key("fetchAnomaly_ANM-9999"));
    }

    #[tokio::test]
    async fn stats_default_to_week() {
        let (_dir, service) = mock_service();
        service.fetch_anomaly_stats(None).await.unwrap();
        service.fetch_anomaly_stats(Some("month")).await.unwrap();
        let loading = service.state().loading_snapshot();
        assert!(loading.contains_key("stats_week"));
        assert!(loading.contains_key("stats_month"));
    }

    #[tokio::test]
    async fn upload_rejection_is_stored() {
        let (_dir, service) = mock_service();
        assert!(service.upload_transaction_file("statement.docx").await.is_none());
        let err = service.error(keys::UPLOAD_TRANSACTION_FILE).unwrap();
        assert_eq!(err.message, crate::source::UPLOAD_REJECTED_MESSAGE);
    }

    #[tokio::test]
    async fn export_report_uses_format_key() {
        let (_dir, service) = mock_service();
        let export = service.export_report("2", ReportFormat::Excel).await.unwrap();
        assert!(!export.content.is_empty());
        assert!(service.state().loading_snapshot().contains_key("export_2_excel"));

        assert!(service.export_report("99", ReportFormat::Pdf).await.is_none());
        assert_eq!(service.error("export_99_pdf").unwrap().status, 404);
    }

    #[tokio::test]
    async fn mark_read_and_refetch() {
        let (_dir, service) = mock_service();
        assert!(service.mark_notification_as_read("3").await);
        let list = service.fetch_notifications().await.unwrap();
        assert!(list.iter().find(|n| n.id == "3").unwrap().read);
    }

    #[tokio::test]
    async fn feedback_roundtrip_through_service() {
        let (_dir, service) = mock_service();
        assert!(service.get_anomaly_feedback("ANM-1001").is_none());
        service
            .submit_anomaly_feedback("ANM-1001", false, "known promo")
            .await
            .unwrap();
        let judgment = service.get_anomaly_feedback("ANM-1001").unwrap();
        assert!(!judgment.is_true_positive);
        assert_eq!(judgment.comments, "known promo");
    }

    #[tokio::test]
    async fn filtered_fetch_applies_filter() {
        let (_dir, service) = mock_service();
        let filter = AnomalyFilter {
            severity: "HIGH".to_string(),
            category: "suspicious  transaction".to_string(),
            ..Default::default()
        };
        let list = service.fetch_filtered_anomalies(&filter).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "ANM-1004");
    }

    #[tokio::test]
    async fn custom_report_narrows_selection() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audit-reports/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "report-1",
                "name": "High risk review",
                "date": "2024-06-15",
                "status": "Completed",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let remote = RemoteSource::new(
            &server.uri(),
            Duration::from_secs(5),
            RetryPolicy::new(3, Duration::from_millis(5)),
        )
        .unwrap();
        let (_dir, service) = service_with(Arc::new(remote));
        let all = MockSource::new().unwrap().anomalies().to_vec();
        assert!(all.iter().any(|a| a.severity != Severity::High));

        let options = ReportOptions {
            severities: BTreeSet::from(["high".to_string()]),
            ..Default::default()
        };
        let report = service
            .generate_custom_report(&all, options, Some("High risk review".into()))
            .await
            .unwrap();
        assert_eq!(report.name, "High risk review");

        let requests = server.received_requests().await.unwrap();
        let sent: ReportRequest = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(sent.name.as_deref(), Some("High risk review"));
        let ids: Vec<&str> = sent.anomalies.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["ANM-1001", "ANM-1003", "ANM-1004"]);
        assert!(sent.anomalies.iter().all(|a| a.severity == Severity::High));
    }

    #[tokio::test]
    async fn export_anomalies_writes_into_export_dir() {
        let (_dir, service) = mock_service();
        let all = service.fetch_anomalies(AnomalyQuery::default()).await.unwrap();
        let path = service.export_anomalies(&all, ExportFormat::Csv).unwrap();
        assert!(path.starts_with(service.export_dir()));
        let body = std::fs::read_to_string(path).unwrap();
        assert_eq!(body.lines().count(), all.len() + 1);
    }

    #[tokio::test]
    async fn remote_failures_are_recorded() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/audit-reports/5"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "Forbidden"})))
            .expect(1)
            .mount(&server)
            .await;

        let remote = RemoteSource::new(
            &server.uri(),
            Duration::from_secs(5),
            RetryPolicy::new(3, Duration::from_millis(5)),
        )
        .unwrap();
        let (_dir, service) = service_with(Arc::new(remote));
        assert!(service.fetch_report_by_id("5").await.is_none());
        let err = service.error("fetchReport_5").unwrap();
        assert_eq!(err.status, 403);
        assert_eq!(err.message, "Forbidden");
        assert_eq!(service.source_name(), "remote");
    }

    #[test]
    fn from_config_picks_mock() {
        let (dir, storage) = test_storage();
        let config = ApiConfig {
            export_dir: dir.path().join("out"),
            ..ApiConfig::default()
        };
        let service = ApiService::from_config(&config, storage).unwrap();
        assert_eq!(service.source_name(), "mock");
        assert_eq!(service.export_dir(), dir.path().join("out"));
    }
}
