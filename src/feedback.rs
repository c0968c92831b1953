use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::LocalStorage;
use crate::types::anomaly::{AnomalyFeedback, FeedbackJudgment};

pub const FEEDBACK_KEY_PREFIX: &str = "anomaly_feedback_";
const SUBMIT_LATENCY: Duration = Duration::from_millis(500);

pub fn feedback_key(anomaly_id: &str) -> String {
    format!("{}{}", FEEDBACK_KEY_PREFIX, anomaly_id)
}

/// Reviewer judgments kept in local storage, one per anomaly.
#[derive(Clone)]
pub struct FeedbackStore {
    storage: LocalStorage,
    latency: Duration,
}

impl FeedbackStore {
    pub fn new(storage: LocalStorage) -> Self {
        Self {
            storage,
            latency: SUBMIT_LATENCY,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Persist a judgment. Storage and serialization failures propagate.
    pub async fn submit(
        &self,
        anomaly_id: &str,
        is_true_positive: bool,
        comments: &str,
    ) -> Result<()> {
        let record = AnomalyFeedback {
            anomaly_id: anomaly_id.to_string(),
            is_true_positive,
            comments: comments.to_string(),
            submitted_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        let json = serde_json::to_string(&record)?;
        self.storage.set_item(&feedback_key(anomaly_id), &json)?;

        tokio::time::sleep(self.latency).await;
        debug!(anomaly_id, is_true_positive, "Feedback stored");
        Ok(())
    }

    /// Stored judgment, or `None` when absent or unreadable.
    pub fn get(&self, anomaly_id: &str) -> Option<FeedbackJudgment> {
        self.record(anomaly_id).map(|fb| FeedbackJudgment {
            is_true_positive: fb.is_true_positive,
            comments: fb.comments,
        })
    }

    /// Full stored record, or `None` when absent or unreadable.
    pub fn record(&self, anomaly_id: &str) -> Option<AnomalyFeedback> {
        let raw = match self.storage.get_item(&feedback_key(anomaly_id)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, anomaly_id, "Failed to read anomaly feedback");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, anomaly_id, "Failed to parse anomaly feedback");
                None
            }
        }
    }
}
