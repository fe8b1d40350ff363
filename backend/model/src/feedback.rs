use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::internal_id;

/// Respondent answers keyed by field label.
pub type Responses = BTreeMap<String, Value>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default)]
    pub utm: BTreeMap<String, String>,

    #[serde(default)]
    pub referrer: String,

    #[serde(default)]
    pub page_url: String,

    #[serde(default)]
    pub user_agent: String,

    #[serde(default)]
    pub location_label: String,

    #[serde(default)]
    pub client_ts: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEntry {
    pub id: String,
    pub form_id: String,
    pub form_name: String,
    pub responses: Responses,
    pub metadata: Metadata,

    #[serde(default)]
    pub time_on_page: f64,

    #[serde(default)]
    pub client_ip: String,

    pub created_at: DateTime<Utc>,
}

impl FeedbackEntry {
    pub fn new(form_id: impl Into<String>, form_name: impl Into<String>, responses: Responses) -> Self {
        Self {
            id: internal_id(),
            form_id: form_id.into(),
            form_name: form_name.into(),
            responses,
            metadata: Metadata::default(),
            time_on_page: 0.0,
            client_ip: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Case-insensitive substring match on the `name` and `email` answers.
    pub fn matches_query(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return false;
        }

        ["name", "email"]
            .iter()
            .filter_map(|field| self.responses.get(*field).and_then(Value::as_str))
            .any(|answer| answer.to_lowercase().contains(&needle))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn missing_metadata_fields_default() {
        let entry: FeedbackEntry = serde_json::from_value(json!({
            "id": "abc",
            "formId": "form",
            "formName": "Survey",
            "responses": { "rating": 4 },
            "metadata": { "referrer": "https://example.com" },
            "createdAt": "2025-01-01T00:00:00Z",
        }))
        .unwrap();

        assert_eq!(entry.metadata.referrer, "https://example.com");
        assert!(entry.metadata.utm.is_empty());
        assert_eq!(entry.metadata.client_ts, None);
        assert_eq!(entry.client_ip, "");
        assert_eq!(entry.responses["rating"], json!(4));
    }

    #[test]
    fn query_matches_name_or_email_only() {
        let responses: Responses = serde_json::from_value(json!({
            "name": "Ada Lovelace",
            "email": "ada@example.com",
            "comment": "bob was here",
        }))
        .unwrap();
        let entry = FeedbackEntry::new("form", "Survey", responses);

        assert!(entry.matches_query("LOVE"));
        assert!(entry.matches_query("example.COM"));
        assert!(!entry.matches_query("bob"));
        assert!(!entry.matches_query("  "));
    }
}
