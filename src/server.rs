//! Liveness endpoint and Telegram webhook receiver.

use crate::commands::Dispatcher;
use crate::security::webhook_secret_matches;
use crate::telegram::Update;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;

pub const HEALTH_RESPONSE: &str = "Bot is running";

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    /// Set only in webhook mode
    pub webhook_secret: Option<Arc<str>>,
}

/// Build the HTTP router. `/webhook` is mounted only when a secret is configured.
pub fn router(state: AppState) -> Router {
    let mut app = Router::new().route("/", get(health));
    if state.webhook_secret.is_some() {
        app = app.route("/webhook", post(webhook));
    }
    app.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn health() -> &'static str {
    HEALTH_RESPONSE
}

/// Acknowledges as soon as the update is parsed and handles it in the
/// background. Errors are logged, never surfaced: a non-2xx or late answer
/// makes Telegram redeliver the same update.
async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<Update>, JsonRejection>,
) -> StatusCode {
    let Some(secret) = state.webhook_secret.as_deref() else {
        return StatusCode::NOT_FOUND;
    };
    if !webhook_secret_matches(&headers, secret) {
        warn!("Rejected webhook call with missing or invalid secret token");
        return StatusCode::UNAUTHORIZED;
    }

    match payload {
        Ok(Json(update)) => {
            let dispatcher = state.dispatcher.clone();
            tokio::spawn(async move { dispatcher.dispatch(update).await });
        }
        Err(e) => warn!("Ignoring unparseable webhook payload: {}", e),
    }
    StatusCode::OK
}
