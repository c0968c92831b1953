pub mod anomaly;
pub mod notification;
pub mod report;
pub mod settings;
pub mod stats;

use serde::{Deserialize, Deserializer};

/// Identifiers arrive as strings from some endpoints and as integers from others.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Int(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Int(n) => n.to_string(),
    })
}
