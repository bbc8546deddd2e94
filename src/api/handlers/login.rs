use axum::response::{Html, IntoResponse};

/// Landing page for redirected callers. The real sign-in flow is rendered by
/// the front end; this keeps `/login` answering when the service runs alone.
pub async fn login() -> impl IntoResponse {
    Html(
        "<!doctype html><html><head><title>Sign in</title></head>\
         <body><h1>Sign in</h1></body></html>",
    )
}
