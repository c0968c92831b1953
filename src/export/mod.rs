//! Tabular exports. Rendering is pure; the `export_*` functions write the
//! rendered file into a download directory and return its path.

pub mod csv;
pub mod pdf;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::error::{Error, Result};
use crate::filter::parse_timestamp;
use crate::types::anomaly::Anomaly;

pub use self::csv::render_csv;
pub use self::pdf::render_pdf;

pub const ANOMALY_EXPORT_NAME: &str = "anomalies-export";
pub const ANOMALY_REPORT_TITLE: &str = "Financial Anomalies Report";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Pdf,
}

/// Column headers: the key order of the first record.
pub(crate) fn headers(records: &[Map<String, Value>]) -> Vec<String> {
    records
        .first()
        .map(|first| first.keys().cloned().collect())
        .unwrap_or_default()
}

/// Serialize any list of structs into flat JSON records.
pub fn to_records<T: Serialize>(items: &[T]) -> Result<Vec<Map<String, Value>>> {
    items
        .iter()
        .map(|item| match serde_json::to_value(item)? {
            Value::Object(map) => Ok(map),
            other => Err(Error::InvalidInput(format!(
                "expected an object record, got {}",
                other
            ))),
        })
        .collect()
}

/// en-US `toLocaleString` style, e.g. `6/15/2024, 11:00:00 AM`.
pub fn locale_timestamp(iso: &str) -> String {
    match parse_timestamp(iso) {
        Some(dt) => dt
            .with_timezone(&Local)
            .format("%-m/%-d/%Y, %-I:%M:%S %p")
            .to_string(),
        None => "Invalid Date".to_string(),
    }
}

fn write_download(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    fs::write(&path, bytes)?;
    info!(path = %path.display(), bytes = bytes.len(), "Export written");
    Ok(path)
}

pub fn export_to_csv(records: &[Map<String, Value>], filename: &str, dir: &Path) -> Result<PathBuf> {
    let csv = render_csv(records);
    write_download(dir, &format!("{}.csv", filename), csv.as_bytes())
}

pub fn export_to_pdf(
    records: &[Map<String, Value>],
    filename: &str,
    title: &str,
    dir: &Path,
) -> Result<PathBuf> {
    let generated_at = Local::now().format("%-m/%-d/%Y, %-I:%M:%S %p").to_string();
    let pdf = render_pdf(records, title, &generated_at);
    write_download(dir, &format!("{}.pdf", filename), &pdf)
}

/// Export-friendly shape of an anomaly.
pub fn flatten_anomaly(anomaly: &Anomaly) -> Map<String, Value> {
    let or_na = |v: &Option<String>| match v.as_deref() {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => "N/A".to_string(),
    };
    let amount = match anomaly.amount {
        Some(a) if a != 0.0 => format!("${:.2}", a),
        _ => "N/A".to_string(),
    };

    let mut map = Map::new();
    map.insert("id".into(), Value::String(anomaly.id.clone()));
    map.insert("title".into(), Value::String(anomaly.title.clone()));
    map.insert("description".into(), Value::String(anomaly.description.clone()));
    map.insert("severity".into(), Value::String(anomaly.severity.to_string()));
    map.insert("status".into(), Value::String(anomaly.status.to_string()));
    map.insert("category".into(), Value::String(anomaly.category.clone()));
    map.insert("detectedAt".into(), Value::String(locale_timestamp(&anomaly.detected_at)));
    map.insert("amount".into(), Value::String(amount));
    map.insert("accountId".into(), Value::String(or_na(&anomaly.account_id)));
    map.insert("transactionId".into(), Value::String(or_na(&anomaly.transaction_id)));
    map
}

pub fn export_anomalies(anomalies: &[Anomaly], format: ExportFormat, dir: &Path) -> Result<PathBuf> {
    let records: Vec<Map<String, Value>> = anomalies.iter().map(flatten_anomaly).collect();
    match format {
        ExportFormat::Csv => export_to_csv(&records, ANOMALY_EXPORT_NAME, dir),
        ExportFormat::Pdf => export_to_pdf(&records, ANOMALY_EXPORT_NAME, ANOMALY_REPORT_TITLE, dir),
    }
}
