use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertSettings {
    pub detection_sensitivity: u8,
    pub email_notifications: bool,
    pub push_notifications: bool,
    pub alert_threshold: String,
    pub daily_digest: bool,
    pub auto_resolve_rules: bool,
    /// Days.
    pub data_retention_period: u32,
    pub team_notifications: bool,
    pub risk_score_threshold: u8,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            detection_sensitivity: 50,
            email_notifications: true,
            push_notifications: false,
            alert_threshold: "medium".to_string(),
            daily_digest: true,
            auto_resolve_rules: false,
            data_retention_period: 90,
            team_notifications: true,
            risk_score_threshold: 65,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub success: bool,
    pub settings: AlertSettings,
}
