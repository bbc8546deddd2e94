use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info_span, Instrument};
use utoipa::ToSchema;

use crate::GIT_COMMIT_HASH;

const HEALTH_DB_TIMEOUT_SECONDS: u64 = 2;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    /// `ok`, `error`, or `memory` when no database is configured.
    database: String,
}

#[utoipa::path(
    get,
    path= "/api/health",
    responses (
        (status = 200, description = "Service and code store are healthy", body = Health),
        (status = 503, description = "Code store database is unhealthy", body = Health)
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(method: Method, pool: Extension<Option<PgPool>>) -> impl IntoResponse {
    let database = match &pool.0 {
        Some(pool) => probe_database(pool).await,
        None => Ok("memory"),
    };

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: database.unwrap_or("error").to_string(),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let mut headers = HeaderMap::new();
    match format!("{}:{}:{}", health.name, health.version, short_hash).parse::<HeaderValue>() {
        Ok(x_app) => {
            headers.insert("X-App", x_app);
        }
        Err(err) => error!("Failed to parse X-App header: {}", err),
    }

    if database.is_ok() {
        debug!("Code store is healthy");
        (StatusCode::OK, headers, body)
    } else {
        debug!("Code store is unhealthy");
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

async fn probe_database(pool: &PgPool) -> Result<&'static str, ()> {
    let probe = async {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = pool.acquire().instrument(acquire_span).await.map_err(|error| {
            error!("Failed to acquire database connection: {}", error);
        })?;
        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping().instrument(ping_span).await.map_err(|error| {
            error!("Failed to ping database: {}", error);
        })
    };

    match timeout(Duration::from_secs(HEALTH_DB_TIMEOUT_SECONDS), probe).await {
        Ok(Ok(())) => Ok("ok"),
        Ok(Err(())) => Err(()),
        Err(_) => {
            error!("Database health probe timed out");
            Err(())
        }
    }
}
