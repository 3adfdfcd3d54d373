//! Error envelope for the action facade

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};
use tracing::{error, warn};

use lifeline_core::{Error, ErrorKind};

/// A core error on its way to the wire
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::OperationFailed | ErrorKind::Internal | ErrorKind::Cancelled => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn body(&self) -> Value {
        let mut body = json!({
            "code": self.0.code(),
            "message": self.0.to_string(),
        });
        if let Some(details) = self.0.details() {
            body["details"] = Value::Object(details);
        }
        body
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self(Error::from(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(code = self.0.code(), error = %self.0, "Action failed");
        } else {
            warn!(code = self.0.code(), error = %self.0, "Action rejected");
        }
        (status, Json(self.body())).into_response()
    }
}
