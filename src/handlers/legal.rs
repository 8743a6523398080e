use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

pub async fn privacy_policy() -> Response {
    serve_page("privacy_policy.html", "Privacy Policy not available.").await
}

pub async fn terms_of_service() -> Response {
    serve_page("terms.html", "Terms of Service not available.").await
}

async fn serve_page(path: &str, missing: &'static str) -> Response {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Html(contents).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, missing).into_response(),
    }
}
