use utoipa::OpenApi;

use crate::api::handlers::{health, session, verification, ErrorBody};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        session::session,
        verification::send_code,
        verification::verify_code,
    ),
    components(schemas(
        health::Health,
        session::SessionEvent,
        session::SessionEventKind,
        verification::SendCode,
        verification::VerifyCode,
        verification::VerifyResponse,
        ErrorBody,
    )),
    tags(
        (name = "health", description = "Service status"),
        (name = "session", description = "Session cookie synchronization"),
        (name = "verification", description = "Second-factor codes"),
    )
)]
pub struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_public_routes() {
        let doc = openapi();
        for path in [
            "/api/health",
            "/api/session",
            "/api/verification/send",
            "/api/verification/verify",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
    }
}
