use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;

use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let store_ok = {
        let db = state.db.lock().unwrap();
        db.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok()
    };

    let body = serde_json::json!({
        "status": if store_ok { "healthy" } else { "degraded" },
        "store": if store_ok { "connected" } else { "disconnected" },
        "timestamp": Utc::now().to_rfc3339(),
    });

    if store_ok {
        (StatusCode::OK, Json(body)).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}
