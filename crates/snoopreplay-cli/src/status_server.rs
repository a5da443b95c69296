use axum::{
    extract::State,
    http::{HeaderValue, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use snoopreplay_core::Emulator;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

#[derive(Clone)]
pub struct StatusState {
    pub emulator: Arc<Emulator>,
    pub port: u16,
}

pub fn router(state: StatusState) -> Router {
    // CORS: localhost only, the status view is read-only and local
    let origins = [
        "http://localhost".to_string(),
        format!("http://localhost:{}", state.port),
        format!("http://127.0.0.1:{}", state.port),
    ]
    .into_iter()
    .filter_map(|origin| origin.parse::<HeaderValue>().ok());
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/log", get(get_log))
        .layer(cors)
        .with_state(state)
}

async fn get_status(State(state): State<StatusState>) -> impl IntoResponse {
    let snap = state.emulator.snapshot();
    Json(json!({
        "status": "ok",
        "capture": snap.capture,
        "exchanges": snap.exchanges,
        "policy": snap.policy,
        "stats": snap.stats,
    }))
}

async fn get_log(State(state): State<StatusState>) -> impl IntoResponse {
    Json(state.emulator.snapshot().log)
}

pub async fn start(emulator: Arc<Emulator>, port: u16) -> anyhow::Result<()> {
    let app = router(StatusState { emulator, port });
    // Bind to localhost only
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "status server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
