use std::path::PathBuf;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use reqwest::{multipart, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{upload_mime, DataSource};
use crate::config::ApiConfig;
use crate::error::{normalize, ApiResult, CallError};
use crate::retry::{with_retry, RetryPolicy};
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

/// HTTP client for the detection backend. Every call goes through
/// [`with_retry`] with the configured policy.
pub struct RemoteSource {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl RemoteSource {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryPolicy) -> crate::error::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::ACCEPT,
                    reqwest::header::HeaderValue::from_static("application/json"),
                );
                headers
            })
            .build()?;
        info!(base_url = %base_url, timeout_ms = timeout.as_millis() as u64, "Remote source ready");
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    pub fn from_config(config: &ApiConfig) -> crate::error::Result<Self> {
        Self::new(&config.base_url, config.timeout, config.retry)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Build, send and decode one request per attempt.
    async fn execute<T, B>(&self, build: B) -> ApiResult<T>
    where
        T: DeserializeOwned,
        B: Fn(&Client) -> RequestBuilder,
    {
        with_retry(self.retry, || {
            let request = build(&self.client);
            async move { decode(request.send().await?).await }
        })
        .await
    }

    /// Like [`execute`](Self::execute) but the body is ignored.
    async fn execute_empty<B>(&self, build: B) -> ApiResult<()>
    where
        B: Fn(&Client) -> RequestBuilder,
    {
        with_retry(self.retry, || {
            let request = build(&self.client);
            async move {
                checked(request.send().await?).await?;
                Ok(())
            }
        })
        .await
    }
}

/// Turn a non-2xx response into a status failure carrying the decoded body.
async fn checked(response: Response) -> Result<Response, CallError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
    debug!(status = status.as_u16(), "API responded with failure status");
    Err(CallError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, CallError> {
    let bytes = checked(response).await?.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

impl DataSource for RemoteSource {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn fetch_anomalies(&self, query: AnomalyQuery) -> BoxFuture<'_, ApiResult<Vec<Anomaly>>> {
        async move {
            let url = self.url("/anomalies");
            self.execute(|c| c.get(&url).query(&query)).await
        }
        .boxed()
    }

    fn fetch_anomaly_by_id(&self, id: String) -> BoxFuture<'_, ApiResult<Option<Anomaly>>> {
        async move {
            let url = self.url(&format!("/anomalies/{}", id));
            self.execute(|c| c.get(&url)).await
        }
        .boxed()
    }

    fn detect_anomalies(&self, payload: Value) -> BoxFuture<'_, ApiResult<DetectionResult>> {
        async move {
            let url = self.url("/anomalies/detect");
            self.execute(|c| c.post(&url).json(&payload)).await
        }
        .boxed()
    }

    fn update_anomaly_status(
        &self,
        id: String,
        status: AnomalyStatus,
        resolution: Option<Value>,
    ) -> BoxFuture<'_, ApiResult<StatusUpdate>> {
        async move {
            let url = self.url(&format!("/anomalies/{}/status", id));
            let body = json!({ "status": status, "resolution": resolution });
            self.execute(|c| c.patch(&url).json(&body)).await
        }
        .boxed()
    }

    fn fetch_anomaly_stats(&self, timeframe: String) -> BoxFuture<'_, ApiResult<AnomalyStats>> {
        async move {
            let url = self.url("/anomalies/stats");
            self.execute(|c| c.get(&url).query(&[("timeframe", &timeframe)]))
                .await
        }
        .boxed()
    }

    fn provide_feedback(
        &self,
        id: String,
        feedback: DetectionFeedback,
    ) -> BoxFuture<'_, ApiResult<FeedbackAck>> {
        async move {
            let url = self.url(&format!("/anomalies/{}/feedback", id));
            self.execute(|c| c.post(&url).json(&feedback)).await
        }
        .boxed()
    }

    fn add_anomaly_comment(
        &self,
        id: String,
        comment: String,
    ) -> BoxFuture<'_, ApiResult<CommentAck>> {
        async move {
            let url = self.url(&format!("/anomalies/{}/comments", id));
            let body = json!({ "comment": comment });
            self.execute(|c| c.post(&url).json(&body)).await
        }
        .boxed()
    }

    fn fetch_reports(&self, query: ReportQuery) -> BoxFuture<'_, ApiResult<Vec<AuditReport>>> {
        async move {
            let url = self.url("/audit-reports");
            self.execute(|c| c.get(&url).query(&query)).await
        }
        .boxed()
    }

    fn fetch_report_by_id(&self, id: String) -> BoxFuture<'_, ApiResult<Option<AuditReport>>> {
        async move {
            let url = self.url(&format!("/audit-reports/{}", id));
            self.execute(|c| c.get(&url)).await
        }
        .boxed()
    }

    fn generate_report(
        &self,
        request: ReportRequest,
    ) -> BoxFuture<'_, ApiResult<GeneratedReport>> {
        async move {
            let url = self.url("/audit-reports/generate");
            self.execute(|c| c.post(&url).json(&request)).await
        }
        .boxed()
    }

    fn export_report(
        &self,
        id: String,
        format: ReportFormat,
    ) -> BoxFuture<'_, ApiResult<ReportExport>> {
        async move {
            let url = self.url(&format!("/audit-reports/{}/export", id));
            let content = with_retry(self.retry, || {
                let request = self
                    .client
                    .get(&url)
                    .query(&[("format", format.as_str())]);
                async move {
                    let bytes = checked(request.send().await?).await?.bytes().await?;
                    Ok(bytes.to_vec())
                }
            })
            .await?;
            Ok(ReportExport {
                report_id: id,
                format,
                content,
            })
        }
        .boxed()
    }

    fn upload_transaction_file(&self, path: PathBuf) -> BoxFuture<'_, ApiResult<UploadReceipt>> {
        async move {
            let mime = upload_mime(&path)?;
            let bytes = tokio::fs::read(&path).await.map_err(|e| {
                normalize(CallError::exception(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            })?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".to_string());
            let url = self.url("/transactions/upload");
            debug!(file = %file_name, bytes = bytes.len(), "Uploading transaction file");

            with_retry(self.retry, || {
                let part = multipart::Part::bytes(bytes.clone())
                    .file_name(file_name.clone())
                    .mime_str(mime);
                let client = &self.client;
                let url = &url;
                async move {
                    let form = multipart::Form::new().part("file", part?);
                    decode(client.post(url).multipart(form).send().await?).await
                }
            })
            .await
        }
        .boxed()
    }

    fn fetch_notifications(&self) -> BoxFuture<'_, ApiResult<Vec<Notification>>> {
        async move {
            let url = self.url("/notifications");
            self.execute(|c| c.get(&url)).await
        }
        .boxed()
    }

    fn mark_notification_as_read(&self, id: String) -> BoxFuture<'_, ApiResult<()>> {
        async move {
            let url = self.url(&format!("/notifications/{}/read", id));
            self.execute_empty(|c| c.patch(&url)).await
        }
        .boxed()
    }

    fn fetch_dashboard_stats(&self) -> BoxFuture<'_, ApiResult<DashboardStats>> {
        async move {
            let url = self.url("/dashboard/stats");
            self.execute(|c| c.get(&url)).await
        }
        .boxed()
    }

    fn fetch_transaction_history(
        &self,
        account_id: Option<String>,
    ) -> BoxFuture<'_, ApiResult<Vec<Transaction>>> {
        async move {
            let url = self.url("/transactions");
            self.execute(|c| match &account_id {
                Some(id) => c.get(&url).query(&[("accountId", id)]),
                None => c.get(&url),
            })
            .await
        }
        .boxed()
    }

    fn fetch_risk_score(&self, account_id: String) -> BoxFuture<'_, ApiResult<RiskScore>> {
        async move {
            let url = self.url(&format!("/accounts/{}/risk-score", account_id));
            self.execute(|c| c.get(&url)).await
        }
        .boxed()
    }

    fn fetch_alert_settings(&self) -> BoxFuture<'_, ApiResult<AlertSettings>> {
        async move {
            let url = self.url("/settings/alerts");
            self.execute(|c| c.get(&url)).await
        }
        .boxed()
    }

    fn update_alert_settings(&self, patch: Value) -> BoxFuture<'_, ApiResult<SettingsUpdate>> {
        async move {
            let url = self.url("/settings/alerts");
            self.execute(|c| c.put(&url).json(&patch)).await
        }
        .boxed()
    }
}
