use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::anomaly::Anomaly;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Pdf,
    Csv,
    Excel,
}

impl ReportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFormat::Pdf => "pdf",
            ReportFormat::Csv => "csv",
            ReportFormat::Excel => "excel",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options picked in the report dialog.
///
/// An empty selection set places no restriction on that dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportOptions {
    pub time_range: String,
    pub categories: BTreeSet<String>,
    pub statuses: BTreeSet<String>,
    pub severities: BTreeSet<String>,
    pub format: ReportFormat,
    pub include_details: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            time_range: "all".to_string(),
            categories: BTreeSet::new(),
            statuses: BTreeSet::new(),
            severities: BTreeSet::new(),
            format: ReportFormat::Pdf,
            include_details: true,
        }
    }
}

/// Body of a report-generation request: the options plus the narrowed records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub options: ReportOptions,
    pub anomalies: Vec<Anomaly>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    Completed,
    #[serde(rename = "In Progress")]
    InProgress,
    Scheduled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    #[serde(deserialize_with = "super::string_or_number")]
    pub id: String,
    pub title: String,
    pub date: String,
    pub anomalies: u32,
    pub status: ReportStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactions: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly_rate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub potential_loss: Option<String>,
}

/// Server-side query parameters for listing reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedReport {
    pub id: String,
    pub name: String,
    pub date: String,
    pub status: ReportStatus,
}

/// Rendered report file returned by an export.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportExport {
    pub report_id: String,
    pub format: ReportFormat,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub success: bool,
    pub report_id: u32,
    pub message: String,
}
