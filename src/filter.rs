//! Client-side narrowing and aggregation over fetched anomaly lists.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Local, Months, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::types::anomaly::{Anomaly, AnomalyStatus, Severity};
use crate::types::notification::Notification;
use crate::types::report::ReportOptions;
use crate::types::stats::{AnomalyStats, DashboardStats};

pub const ALL: &str = "all";

/// Dashboard filter bar state. Every field is `"all"` or a specific value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyFilter {
    pub status: String,
    pub severity: String,
    pub category: String,
    pub time_range: String,
}

impl Default for AnomalyFilter {
    fn default() -> Self {
        Self {
            status: ALL.to_string(),
            severity: ALL.to_string(),
            category: ALL.to_string(),
            time_range: ALL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRange {
    Today,
    Week,
    Month,
    Quarter,
}

impl TimeRange {
    /// `None` for `"all"` and for anything unrecognised.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "today" => Some(TimeRange::Today),
            "week" => Some(TimeRange::Week),
            "month" => Some(TimeRange::Month),
            "quarter" => Some(TimeRange::Quarter),
            _ => None,
        }
    }

    /// Earliest instant still inside the range, relative to `now`.
    pub fn cutoff(&self, now: DateTime<Local>) -> DateTime<Local> {
        match self {
            TimeRange::Today => start_of_day(now),
            TimeRange::Week => now - Duration::days(7),
            TimeRange::Month => now.checked_sub_months(Months::new(1)).unwrap_or(now),
            TimeRange::Quarter => now.checked_sub_months(Months::new(3)).unwrap_or(now),
        }
    }
}

fn start_of_day(now: DateTime<Local>) -> DateTime<Local> {
    let midnight = now.date_naive().and_time(chrono::NaiveTime::MIN);
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .unwrap_or(now)
}

/// Lower-case and collapse whitespace runs to `_`. Edges are not trimmed.
pub fn normalize_category(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_run = false;
    for c in value.to_lowercase().chars() {
        if c.is_whitespace() {
            if !in_run {
                out.push('_');
            }
            in_run = true;
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out
}

/// Parse an ISO-8601 timestamp. Offset-less date-times are local, bare dates UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|d| Utc.from_utc_datetime(&d.and_time(chrono::NaiveTime::MIN)))
}

fn is_all(value: &str) -> bool {
    value.eq_ignore_ascii_case(ALL)
}

impl AnomalyFilter {
    pub fn matches(&self, anomaly: &Anomaly, cutoff: Option<DateTime<Local>>) -> bool {
        if !is_all(&self.status) && !anomaly.status.as_str().eq_ignore_ascii_case(&self.status) {
            return false;
        }
        if !is_all(&self.severity)
            && !anomaly.severity.as_str().eq_ignore_ascii_case(&self.severity)
        {
            return false;
        }
        if !is_all(&self.category)
            && normalize_category(&anomaly.category) != normalize_category(&self.category)
        {
            return false;
        }
        if let Some(cutoff) = cutoff {
            match parse_timestamp(&anomaly.detected_at) {
                Some(detected) if detected >= cutoff.with_timezone(&Utc) => {}
                _ => return false,
            }
        }
        true
    }
}

pub fn apply_filter(anomalies: &[Anomaly], filter: &AnomalyFilter) -> Vec<Anomaly> {
    apply_filter_at(anomalies, filter, Local::now())
}

/// Keep anomalies passing every non-`"all"` field of `filter`, with time
/// ranges measured back from `now`.
pub fn apply_filter_at(
    anomalies: &[Anomaly],
    filter: &AnomalyFilter,
    now: DateTime<Local>,
) -> Vec<Anomaly> {
    let cutoff = TimeRange::parse(&filter.time_range).map(|range| range.cutoff(now));
    anomalies
        .iter()
        .filter(|a| filter.matches(a, cutoff))
        .cloned()
        .collect()
}

/// Narrow an already filtered list by the report dialog's selections.
/// A dimension only excludes when its selection set is non-empty.
pub fn narrow_for_report(anomalies: &[Anomaly], options: &ReportOptions) -> Vec<Anomaly> {
    anomalies
        .iter()
        .filter(|a| options.categories.is_empty() || options.categories.contains(&a.category))
        .filter(|a| options.statuses.is_empty() || options.statuses.contains(a.status.as_str()))
        .filter(|a| {
            options.severities.is_empty() || options.severities.contains(a.severity.as_str())
        })
        .cloned()
        .collect()
}

pub fn summarize(anomalies: &[Anomaly]) -> AnomalyStats {
    let mut by_category = BTreeMap::new();
    for anomaly in anomalies {
        *by_category.entry(anomaly.category.clone()).or_insert(0) += 1;
    }
    AnomalyStats {
        total: anomalies.len(),
        high_severity: anomalies
            .iter()
            .filter(|a| a.severity == Severity::High)
            .count(),
        financial_impact: anomalies.iter().filter_map(|a| a.amount).sum(),
        by_category,
    }
}

pub fn dashboard_stats(anomalies: &[Anomaly]) -> DashboardStats {
    let count_severity = |s: Severity| anomalies.iter().filter(|a| a.severity == s).count();
    DashboardStats {
        total_anomalies: anomalies.len(),
        open_anomalies: anomalies
            .iter()
            .filter(|a| a.status != AnomalyStatus::Resolved)
            .count(),
        resolved_anomalies: anomalies
            .iter()
            .filter(|a| a.status == AnomalyStatus::Resolved)
            .count(),
        high_severity_count: count_severity(Severity::High),
        medium_severity_count: count_severity(Severity::Medium),
        low_severity_count: count_severity(Severity::Low),
    }
}

pub fn unread_count(notifications: &[Notification]) -> usize {
    notifications.iter().filter(|n| !n.read).count()
}

/// High-severity notifications in `current` whose id was not in `previous`.
pub fn new_high_severity<'a>(
    previous: &[Notification],
    current: &'a [Notification],
) -> Vec<&'a Notification> {
    let seen: HashSet<&str> = previous.iter().map(|n| n.id.as_str()).collect();
    current
        .iter()
        .filter(|n| n.is_high_severity() && !seen.contains(n.id.as_str()))
        .collect()
}
