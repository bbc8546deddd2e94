use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::ToSchema;

use super::{error_response, validation_failure, ErrorBody};
use crate::verification::{CodeIssuer, CodeVerifier, IssueError, VerifyOutcome};

#[derive(ToSchema, Deserialize, Debug)]
pub struct SendCode {
    uid: String,
    email: String,
}

#[derive(ToSchema, Deserialize)]
pub struct VerifyCode {
    uid: String,
    code: String,
}

#[derive(ToSchema, Serialize, Debug, PartialEq, Eq)]
pub struct VerifyResponse {
    #[schema(example = "rejected")]
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "expired")]
    reason: Option<String>,
}

#[utoipa::path(
    post,
    path= "/api/verification/send",
    request_body = SendCode,
    responses (
        (status = 200, description = "Code stored and delivered", body = String),
        (status = 400, description = "Missing or malformed uid/email", body = ErrorBody),
        (status = 500, description = "Code could not be stored", body = ErrorBody),
        (status = 502, description = "Code stored but not delivered", body = ErrorBody),
    ),
    tag= "verification"
)]
// axum handler for issuing a code
#[instrument(skip_all)]
pub async fn send_code(
    issuer: Extension<Arc<CodeIssuer>>,
    payload: Option<Json<SendCode>>,
) -> Response {
    let request = match payload {
        Some(Json(payload)) => payload,
        None => return validation_failure(),
    };

    match issuer.issue(&request.uid, &request.email).await {
        Ok(issued) => {
            debug!(uid = %issued.user_id, expires_at = issued.expires_at, "code sent");
            (StatusCode::OK, Json("Sent")).into_response()
        }
        Err(err) => {
            let status = match err {
                IssueError::Validation(_) => StatusCode::BAD_REQUEST,
                IssueError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
                IssueError::Delivery(_) => StatusCode::BAD_GATEWAY,
            };
            error_response(status, err.kind())
        }
    }
}

#[utoipa::path(
    post,
    path= "/api/verification/verify",
    request_body = VerifyCode,
    responses (
        (status = 200, description = "Code accepted", body = VerifyResponse),
        (status = 401, description = "Code rejected: expired, mismatch or not_found", body = VerifyResponse),
        (status = 429, description = "Too many failed attempts", body = VerifyResponse),
        (status = 500, description = "Code store unavailable", body = ErrorBody),
    ),
    tag= "verification"
)]
// axum handler for checking a code
#[instrument(skip_all)]
pub async fn verify_code(
    verifier: Extension<Arc<CodeVerifier>>,
    payload: Option<Json<VerifyCode>>,
) -> Response {
    let request = match payload {
        Some(Json(payload)) => payload,
        None => return validation_failure(),
    };

    let outcome = match verifier.verify(&request.uid, &request.code).await {
        Ok(outcome) => outcome,
        Err(err) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, err.kind()),
    };

    let (status, body) = match outcome {
        VerifyOutcome::Accepted => (
            StatusCode::OK,
            VerifyResponse {
                status: "accepted".to_string(),
                reason: None,
            },
        ),
        VerifyOutcome::Rejected(reason) => (
            StatusCode::UNAUTHORIZED,
            VerifyResponse {
                status: "rejected".to_string(),
                reason: Some(reason.as_str().to_string()),
            },
        ),
        VerifyOutcome::Limited => (
            StatusCode::TOO_MANY_REQUESTS,
            VerifyResponse {
                status: "limited".to_string(),
                reason: None,
            },
        ),
    };

    (status, Json(body)).into_response()
}
