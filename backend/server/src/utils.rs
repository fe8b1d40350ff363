use std::{convert::Infallible, net::SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::request::Parts,
};
use model::{FeedbackEntry, payloads::SubmitFeedback};

use crate::error::AppError::{self, MalformedPayload};

/// First hop of `X-Forwarded-For`, else the peer address, else empty.
pub struct ClientIp(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .find(|hop| !hop.is_empty())
            })
            .map(str::to_string);

        let ip = forwarded
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_default();

        Ok(ClientIp(ip))
    }
}

/// Validated entry, not yet attributed to a stored form.
pub fn entry_from_payload(payload: SubmitFeedback, client_ip: String) -> Result<FeedbackEntry, AppError> {
    let form_id = payload.form_id.trim();
    let form_name = payload.form_name.trim();

    let Some(responses) = payload.responses else {
        return Err(MalformedPayload(
            "formId, formName and responses are required".to_string(),
        ));
    };
    if form_id.is_empty() || form_name.is_empty() {
        return Err(MalformedPayload(
            "formId, formName and responses are required".to_string(),
        ));
    }

    let metadata = payload.metadata.unwrap_or_default();

    let mut entry =
        FeedbackEntry::new(form_id, form_name, responses).with_metadata(metadata.to_metadata());
    entry.time_on_page = metadata.time_on_page();
    entry.client_ip = client_ip;

    Ok(entry)
}
