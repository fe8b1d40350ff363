//! Request and response bodies of the HTTP API.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{Field, FormSettings, Metadata, Responses};

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubmitFeedback {
    #[serde(default)]
    pub form_id: String,

    #[serde(default)]
    pub form_name: String,

    #[serde(default)]
    pub responses: Option<Responses>,

    #[serde(default)]
    pub metadata: Option<MetadataPayload>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct MetadataPayload {
    #[serde(default)]
    pub utm: Option<BTreeMap<String, String>>,

    #[serde(default)]
    pub referrer: Option<String>,

    #[serde(default)]
    pub page_url: Option<String>,

    #[serde(default)]
    pub user_agent: Option<String>,

    #[serde(default)]
    pub location_label: Option<String>,

    #[serde(default)]
    pub client_ts: Option<DateTime<Utc>>,

    #[serde(default)]
    pub time_on_page: Option<f64>,
}

impl MetadataPayload {
    /// Stored metadata; absent strings become empty.
    pub fn to_metadata(&self) -> Metadata {
        Metadata {
            utm: self.utm.clone().unwrap_or_default(),
            referrer: self.referrer.clone().unwrap_or_default(),
            page_url: self.page_url.clone().unwrap_or_default(),
            user_agent: self.user_agent.clone().unwrap_or_default(),
            location_label: self.location_label.clone().unwrap_or_default(),
            client_ts: self.client_ts,
        }
    }

    pub fn time_on_page(&self) -> f64 {
        self.time_on_page
            .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
            .unwrap_or(0.0)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateForm {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub uid: String,

    #[serde(default, alias = "fieldType")]
    pub fields: Vec<Field>,

    #[serde(default)]
    pub feedback_limit: Option<u64>,
}

impl CreateForm {
    /// Name and owner present, at least one field, every field typed.
    pub fn is_complete(&self) -> bool {
        !self.name.trim().is_empty()
            && !self.uid.trim().is_empty()
            && !self.fields.is_empty()
            && self.fields.iter().all(|field| !field.kind.trim().is_empty())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateForm {
    #[serde(default)]
    pub paused: Option<bool>,

    /// Absent keeps the limit, `null` clears it.
    #[serde(default, deserialize_with = "present")]
    pub feedback_limit: Option<Option<u64>>,
}

impl From<&UpdateForm> for FormSettings {
    fn from(update: &UpdateForm) -> Self {
        Self {
            paused: update.paused,
            limit: update.feedback_limit,
        }
    }
}

fn present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn limit_absent_null_and_set_are_distinct() {
        let absent: UpdateForm = serde_json::from_value(json!({ "paused": true })).unwrap();
        let cleared: UpdateForm = serde_json::from_value(json!({ "feedbackLimit": null })).unwrap();
        let set: UpdateForm = serde_json::from_value(json!({ "feedbackLimit": 7 })).unwrap();

        assert_eq!(absent.feedback_limit, None);
        assert_eq!(cleared.feedback_limit, Some(None));
        assert_eq!(set.feedback_limit, Some(Some(7)));
        assert!(FormSettings::from(&UpdateForm::default()).is_empty());
    }

    #[test]
    fn form_needs_typed_fields() {
        let bare: CreateForm =
            serde_json::from_value(json!({ "name": "Survey", "uid": "u1" })).unwrap();
        assert!(!bare.is_complete());

        let untyped: CreateForm = serde_json::from_value(json!({
            "name": "Survey",
            "uid": "u1",
            "fields": [{ "type": " ", "label": "Name" }],
        }))
        .unwrap();
        assert!(!untyped.is_complete());

        let complete: CreateForm = serde_json::from_value(json!({
            "name": "Survey",
            "uid": "u1",
            "fields": [{ "type": "text", "label": "Name", "required": true }],
        }))
        .unwrap();
        assert!(complete.is_complete());

        let builder: CreateForm = serde_json::from_value(json!({
            "name": "Survey",
            "uid": "u1",
            "fieldType": [{ "type": "rating" }],
        }))
        .unwrap();
        assert!(builder.is_complete());
        assert_eq!(builder.fields[0].kind, "rating");
    }

    #[test]
    fn negative_limit_is_malformed() {
        let result = serde_json::from_value::<UpdateForm>(json!({ "feedbackLimit": -1 }));
        assert!(result.is_err());
    }

    #[test]
    fn time_on_page_ignores_garbage() {
        let metadata = MetadataPayload {
            time_on_page: Some(-3.0),
            ..Default::default()
        };
        assert_eq!(metadata.time_on_page(), 0.0);

        let metadata = MetadataPayload {
            time_on_page: Some(12.5),
            ..Default::default()
        };
        assert_eq!(metadata.time_on_page(), 12.5);
    }
}
