pub mod health;
pub mod login;
pub mod session;
pub mod verification;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

/// JSON error body carrying a stable failure kind.
#[derive(ToSchema, Serialize, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    #[schema(example = "validation_failure")]
    pub error: String,
}

pub(crate) fn error_response(status: StatusCode, kind: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: kind.to_string(),
        }),
    )
        .into_response()
}

/// Absent, non-JSON or incomplete bodies all answer like a failed field check.
pub(crate) fn validation_failure() -> Response {
    error_response(StatusCode::BAD_REQUEST, "validation_failure")
}

/// Anything that made it past the gate but has no route here.
pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}
