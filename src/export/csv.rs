use serde_json::{Map, Value};

use super::headers;

/// Render records as CSV. Columns come from the first record's keys.
pub fn render_csv(records: &[Map<String, Value>]) -> String {
    let headers = headers(records);
    if headers.is_empty() {
        return String::new();
    }

    let mut rows = Vec::with_capacity(records.len() + 1);
    rows.push(headers.join(","));
    for record in records {
        let values: Vec<String> = headers
            .iter()
            .map(|h| csv_value(record.get(h.as_str())))
            .collect();
        rows.push(values.join(","));
    }
    rows.join("\n")
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

fn csv_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => quote(s),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(nested) => quote(&nested.to_string()),
    }
}
