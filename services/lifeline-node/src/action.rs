//! JSON action envelope and correlation ids

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use lifeline_core::Error;

use crate::error::ApiError;
use crate::handlers;
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;

/// Body of `POST /actions`
///
/// Gateways also send `session_variables` and `request_query`; the node has
/// no use for them and serde skips unknown keys.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionEnvelope {
    /// Action to run, matched after [`normalize`]
    pub action_name: String,
    /// Action arguments; `null` when absent
    #[serde(default)]
    pub input: Value,
    /// Correlation id, used when the header carries none
    #[serde(default)]
    pub request_id: Option<String>,
}

/// `report-distress` and `report_distress` name the same action
pub fn normalize(name: &str) -> String {
    name.trim().replace('-', "_").to_ascii_lowercase()
}

fn usable(id: &str) -> Option<String> {
    let id = id.trim();
    (!id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN).then(|| id.to_string())
}

fn request_id(headers: &HeaderMap, envelope: Option<&ActionEnvelope>) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(usable)
        .or_else(|| envelope.and_then(|e| e.request_id.as_deref()).and_then(usable))
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub async fn handle_action(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    let envelope = serde_json::from_slice::<ActionEnvelope>(&body);
    let request_id = request_id(&headers, envelope.as_ref().ok());

    let mut response = match envelope {
        Ok(envelope) => {
            let action = normalize(&envelope.action_name);
            let span = info_span!("action", action = %action, request_id = %request_id);
            run(&state, &action, envelope.input).instrument(span).await
        }
        Err(e) => ApiError(Error::invalid_field("envelope", e.to_string())).into_response(),
    };

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

async fn run(state: &AppState, action: &str, input: Value) -> Response {
    let cancel = state.shutdown.child_token();
    match handlers::execute(state, &cancel, action, input).await {
        Ok((status, body)) => {
            info!(status = status.as_u16(), "Action completed");
            (status, Json(body)).into_response()
        }
        Err(e) => e.into_response(),
    }
}
