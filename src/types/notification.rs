use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(deserialize_with = "super::string_or_number")]
    pub id: String,
    #[serde(deserialize_with = "super::string_or_number")]
    pub anomaly_id: String,
    pub title: String,
    pub message: String,
    pub severity: String,
    pub read: bool,
    pub created_at: String,
}

impl Notification {
    pub fn is_high_severity(&self) -> bool {
        self.severity.eq_ignore_ascii_case("high")
    }
}
