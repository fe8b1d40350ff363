use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{internal_id, public_id};

/// Capacity policy and usage of a form. The only part of a form the admission path reads.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormState {
    pub paused: bool,

    #[serde(rename = "feedbackLimit")]
    pub limit: Option<u64>,

    #[serde(rename = "feedbackCount")]
    pub count: u64,
}

impl FormState {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn limited(limit: u64, count: u64) -> Self {
        Self {
            paused: false,
            limit: Some(limit),
            count,
        }
    }

    pub fn paused(mut self) -> Self {
        self.paused = true;
        self
    }

    pub fn remaining(&self) -> Option<u64> {
        self.limit.map(|limit| limit.saturating_sub(self.count))
    }
}

/// One input of a form as the builder defined it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Field {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub options: Vec<String>,

    #[serde(default)]
    pub required: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Form {
    pub id: String,
    pub custom_id: String,
    pub name: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,

    #[serde(rename = "fieldType", default)]
    pub fields: Vec<Field>,

    #[serde(flatten)]
    pub state: FormState,

    #[serde(default)]
    pub view_count: u64,

    /// Sum of `timeOnPage` over admitted entries, in seconds.
    #[serde(default)]
    pub total_time_spent: f64,
}

impl Form {
    pub fn new(name: impl Into<String>, user_id: impl Into<String>, state: FormState) -> Self {
        Self {
            id: internal_id(),
            custom_id: public_id(),
            name: name.into(),
            user_id: user_id.into(),
            created_at: Utc::now(),
            fields: Vec::new(),
            state,
            view_count: 0,
            total_time_spent: 0.0,
        }
    }

    pub fn with_fields(mut self, fields: Vec<Field>) -> Self {
        self.fields = fields;
        self
    }
}

/// Owner-side changes to the capacity policy. `limit: Some(None)` clears the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormSettings {
    pub paused: Option<bool>,
    pub limit: Option<Option<u64>>,
}

impl FormSettings {
    pub fn is_empty(&self) -> bool {
        self.paused.is_none() && self.limit.is_none()
    }
}
