use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use ptt_core::CoreError;

/// REST error envelope (§7's propagation policy): `{success:false, error,
/// code}` for every rejected request.
#[derive(Debug)]
pub enum ApiError {
    Core(CoreError),
    Auth(anyhow::Error),
    BadRequest(String),
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    code: &'static str,
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        ApiError::Core(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, code) = match &self {
            ApiError::Core(e) => (status_for(e), e.to_string(), e.code()),
            ApiError::Auth(e) => (StatusCode::UNAUTHORIZED, e.to_string(), "unauthorized"),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), "invalid_chunk"),
        };
        (status, Json(ErrorBody { success: false, error, code })).into_response()
    }
}

fn status_for(e: &CoreError) -> StatusCode {
    match e {
        CoreError::ChannelNotFound => StatusCode::NOT_FOUND,
        CoreError::UnknownParticipant | CoreError::ForbiddenEmergency => StatusCode::FORBIDDEN,
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::FatalChannel(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ if e.is_state_conflict() => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
