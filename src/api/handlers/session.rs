use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{instrument, warn};
use utoipa::ToSchema;

use super::{error_response, validation_failure, ErrorBody};
use crate::session::{
    AuthContext, AuthEvent, Identity, ResponseCookies, SessionConfig, SessionSynchronizer,
    SyncError,
};

#[derive(ToSchema, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    SignedIn,
    SignedOut,
}

/// Auth state change reported by the browser's identity SDK.
#[derive(ToSchema, Deserialize)]
pub struct SessionEvent {
    event: SessionEventKind,
    #[serde(default)]
    uid: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

impl SessionEvent {
    fn into_auth_event(self) -> Option<AuthEvent> {
        match self.event {
            SessionEventKind::SignedOut => Some(AuthEvent::SignedOut),
            SessionEventKind::SignedIn => {
                let uid = self.uid.filter(|uid| !uid.trim().is_empty())?;
                let token = self.token.filter(|token| !token.trim().is_empty())?;
                Some(AuthEvent::SignedIn(Identity::new(uid.trim(), token)))
            }
        }
    }
}

#[utoipa::path(
    post,
    path= "/api/session",
    request_body = SessionEvent,
    responses (
        (status = 204, description = "Session cookie written or cleared"),
        (status = 400, description = "Malformed event", body = ErrorBody),
        (status = 500, description = "Cookie could not be written", body = ErrorBody),
        (status = 502, description = "Identity provider failed", body = ErrorBody),
    ),
    tag= "session"
)]
// axum handler for auth state changes
#[instrument(skip_all)]
pub async fn session(
    auth: Extension<AuthContext>,
    config: Extension<SessionConfig>,
    payload: Option<Json<SessionEvent>>,
) -> Response {
    let event = match payload {
        Some(Json(payload)) => payload,
        None => return validation_failure(),
    };
    let Some(event) = event.into_auth_event() else {
        return validation_failure();
    };

    let cookies = Arc::new(ResponseCookies::new(config.cookie_secure()));
    let synchronizer =
        SessionSynchronizer::new(auth.0.clone(), cookies.clone()).with_ttl(config.ttl());

    match synchronizer.apply(&event).await {
        Ok(_) => (StatusCode::NO_CONTENT, cookies.take_headers()).into_response(),
        Err(err) => {
            warn!("session sync failed: {err}");
            let status = match err {
                SyncError::Provider(_) => StatusCode::BAD_GATEWAY,
                SyncError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error_response(status, err.kind())
        }
    }
}
