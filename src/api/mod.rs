pub mod handlers;
pub mod openapi;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware,
    routing::{get, post},
    Extension, Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{debug_span, error, info, Span};
use ulid::Ulid;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    gate::{gate_middleware, TokenGate},
    session::{AuthContext, SessionConfig},
    verification::{CodeIssuer, CodeVerifier},
};
use handlers::{health, login, not_found, session, verification};

/// Everything the handlers need, shared across requests.
#[derive(Clone)]
pub struct Services {
    pub gate: TokenGate,
    pub auth: AuthContext,
    pub session: SessionConfig,
    pub issuer: Arc<CodeIssuer>,
    pub verifier: Arc<CodeVerifier>,
    /// `None` when codes live in memory.
    pub pool: Option<PgPool>,
}

/// Build the application router. The gate wraps every route, the fallback
/// included, so unknown paths still redirect when no session is present.
#[must_use]
pub fn router(services: Services) -> Router {
    let Services {
        gate,
        auth,
        session,
        issuer,
        verifier,
        pool,
    } = services;

    Router::new()
        .route("/login", get(login::login))
        .route(
            "/api/health",
            get(health::health)
                .head(health::health)
                .options(health::health),
        )
        .route("/api/session", post(session::session))
        .route("/api/verification/send", post(verification::send_code))
        .route("/api/verification/verify", post(verification::verify_code))
        .merge(SwaggerUi::new("/api/docs").url("/api/openapi.json", openapi::openapi()))
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(middleware::from_fn_with_state(gate, gate_middleware))
                .layer(Extension(auth))
                .layer(Extension(session))
                .layer(Extension(issuer))
                .layer(Extension(verifier))
                .layer(Extension(pool)),
        )
}

/// Bind `port` on all interfaces and serve until ctrl-c.
///
/// # Errors
/// Returns an error if the server fails to start
pub async fn serve(port: u16, services: Services) -> Result<()> {
    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, router(services).into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, method = %request.method(), request_id)
}
