//! `GET /get-messages` long-poll endpoint.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chatov_core::protocol::{Token, WireBatch};
use serde::Deserialize;

use crate::queue::ChatQueue;

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<ChatQueue>,
    pub session_id: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Default, Deserialize)]
pub struct GetMessagesParams {
    pub sid: Option<String>,
    pub mid: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/get-messages", get(get_messages))
        .with_state(state)
}

pub async fn get_messages(
    State(state): State<AppState>,
    Query(params): Query<GetMessagesParams>,
) -> Json<WireBatch> {
    // A cursor from another session (or an unparsable one) is ignored.
    let after = match params.sid.as_deref() {
        Some(sid) if sid == state.session_id => params
            .mid
            .as_deref()
            .and_then(|m| m.trim().parse::<i64>().ok()),
        _ => None,
    };

    let messages = state
        .queue
        .get_new_messages(after, state.request_timeout)
        .await;
    tracing::debug!(?after, count = messages.len(), "get-messages");

    Json(WireBatch {
        sid: Token::Text(state.session_id.clone()),
        messages,
    })
}
