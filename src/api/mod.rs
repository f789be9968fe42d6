pub mod auth;
pub mod connection;
pub mod mapping_account;
pub mod middleware;
pub mod source_account;

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;

use crate::outputs::OutputError;

/// Maps a reconciliation failure to a user-facing response. The caller can
/// tell apart "connect a mapping account first" (422), "the provider refused"
/// (502) and "the provider is unreachable, retry later" (503).
pub fn output_error_response(err: OutputError) -> Response {
    match &err {
        OutputError::PreconditionFailed(message) => {
            (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"error": message}))).into_response()
        }
        OutputError::ProviderRejected { message, .. } => (
            StatusCode::BAD_GATEWAY,
            Json(json!({"error": format!("the mapping provider rejected the request: {}", message)})),
        )
            .into_response(),
        OutputError::ProviderUnavailable { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "the provider is unreachable, try again later"})),
        )
            .into_response(),
        OutputError::UnknownSourceKind(kind) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("unknown source kind '{}'", kind)})),
        )
            .into_response(),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": err.to_string()})),
        )
            .into_response(),
    }
}
