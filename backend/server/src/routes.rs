use std::{collections::BTreeMap, sync::Arc};

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use model::{
    FeedbackEntry, Form, FormSettings, FormState,
    payloads::{ApiResponse, CreateForm, SubmitFeedback, UpdateForm},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    error::AppError::{self, FormNotFound, InvalidSettings, MalformedPayload},
    state::AppState,
    store::SettingsUpdate,
    submission::Submission,
    utils::{ClientIp, entry_from_payload},
};

type Shared = State<Arc<AppState>>;

pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn submit_handler(
    State(state): Shared,
    ClientIp(ip): ClientIp,
    payload: Result<Json<SubmitFeedback>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload.map_err(|e| MalformedPayload(e.body_text()))?;
    let form_ref = payload.form_id.trim().to_string();

    let mut entry = entry_from_payload(payload, ip)?;

    if entry.metadata.location_label.is_empty() && !entry.client_ip.is_empty() {
        if let Some(label) = state.locator.label_for(&entry.client_ip).await {
            entry.metadata.location_label = label;
        }
    }

    let response = match state.writer.submit(&form_ref, entry).await? {
        Submission::Created(entry) => {
            (StatusCode::CREATED, Json(ApiResponse::ok(entry))).into_response()
        }
        Submission::Rejected(reason) => (
            StatusCode::FORBIDDEN,
            Json(ApiResponse::<()>::failed(reason.message())),
        )
            .into_response(),
    };

    Ok(response)
}

#[derive(Deserialize)]
pub struct FeedbackQuery {
    form: Option<String>,
    uid: Option<String>,
    query: Option<String>,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GroupedFeedback {
    feedbacks_by_form: BTreeMap<String, Vec<FeedbackEntry>>,
}

impl GroupedFeedback {
    fn add(&mut self, entries: Vec<FeedbackEntry>) {
        for entry in entries {
            self.feedbacks_by_form
                .entry(entry.form_id.clone())
                .or_default()
                .push(entry);
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `?form=` lists one form; `?uid=` and `?query=` group entries by form id.
pub async fn list_feedback_handler(
    State(state): Shared,
    Query(params): Query<FeedbackQuery>,
) -> Result<Response, AppError> {
    if let Some(form_ref) = non_empty(params.form) {
        let form = state.store.find_form(&form_ref).await?.ok_or(FormNotFound)?;
        let entries = state.store.entries_for_form(&form.custom_id).await?;

        return Ok(Json(ApiResponse::ok(entries)).into_response());
    }

    let mut grouped = GroupedFeedback::default();

    if let Some(uid) = non_empty(params.uid) {
        for form in state.store.forms_for_user(&uid).await? {
            grouped.add(state.store.entries_for_form(&form.custom_id).await?);
        }
    } else if let Some(query) = non_empty(params.query) {
        grouped.add(state.store.search_entries(&query).await?);
    }

    Ok(Json(ApiResponse::ok(grouped)).into_response())
}

#[derive(Deserialize)]
pub struct FormsQuery {
    uid: Option<String>,
}

pub async fn list_forms_handler(
    State(state): Shared,
    Query(params): Query<FormsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let forms = match non_empty(params.uid) {
        Some(uid) => state.store.forms_for_user(&uid).await?,
        None => Vec::new(),
    };

    Ok(Json(ApiResponse::ok(forms)))
}

pub async fn create_form_handler(
    State(state): Shared,
    payload: Result<Json<CreateForm>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload.map_err(|e| MalformedPayload(e.body_text()))?;

    if !payload.is_complete() {
        return Err(MalformedPayload(
            "name, uid and at least one typed field are required".to_string(),
        ));
    }

    let state_of_form = match payload.feedback_limit {
        Some(limit) => FormState::limited(limit, 0),
        None => FormState::unlimited(),
    };
    let form = Form::new(payload.name.trim(), payload.uid.trim(), state_of_form)
        .with_fields(payload.fields);

    state.store.insert_form(&form).await?;
    info!(form = %form.custom_id, limit = ?form.state.limit, "Form created");

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(form))))
}

pub async fn get_form_handler(
    State(state): Shared,
    Path(form_ref): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let form = state.store.find_form(&form_ref).await?.ok_or(FormNotFound)?;

    if let Err(e) = state.store.record_view(&form.id).await {
        warn!(form = %form.custom_id, "Failed to record view: {e}");
    }

    Ok(Json(ApiResponse::ok(form)))
}

pub async fn update_form_handler(
    State(state): Shared,
    Path(form_ref): Path<String>,
    payload: Result<Json<UpdateForm>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload.map_err(|e| MalformedPayload(e.body_text()))?;

    let settings = FormSettings::from(&payload);
    if settings.is_empty() {
        return Err(InvalidSettings("No valid fields to update".to_string()));
    }

    let form = state.store.find_form(&form_ref).await?.ok_or(FormNotFound)?;

    match state.store.update_settings(&form.id, &settings).await? {
        SettingsUpdate::Updated(form) => {
            info!(form = %form.custom_id, paused = form.state.paused, limit = ?form.state.limit, "Form settings updated");
            Ok(Json(ApiResponse::ok(form)))
        }
        SettingsUpdate::NotFound => Err(FormNotFound),
        SettingsUpdate::LimitBelowCount { count } => {
            let limit = settings.limit.flatten().unwrap_or_default();
            Err(InvalidSettings(format!(
                "Cannot set feedbackLimit to {limit} because current feedbackCount is {count}"
            )))
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedForm {
    form: Form,
    deleted_feedback_count: u64,
}

pub async fn delete_form_handler(
    State(state): Shared,
    Path(form_ref): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let form = state.store.find_form(&form_ref).await?.ok_or(FormNotFound)?;

    let deleted_feedback_count = state.store.delete_form(&form).await?;
    info!(form = %form.custom_id, deleted_feedback_count, "Form deleted");

    Ok(Json(ApiResponse::ok(DeletedForm {
        form,
        deleted_feedback_count,
    })))
}
