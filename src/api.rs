use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{Message, Status};
use crate::scheduler::Scheduler;
use crate::service::MessageService;

const DEFAULT_PAGE: usize = 1;
const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MessageService>,
    pub scheduler: Scheduler,
    pub name: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/messages", post(handle_create_message))
        .route("/messages/sent", get(handle_sent_messages))
        .route("/scheduler", post(handle_scheduler_control).get(handle_scheduler_status))
        .with_state(state)
}

#[derive(Serialize)]
struct MessageView {
    id: Uuid,
    to: String,
    content: String,
    status: Status,
    #[serde(skip_serializing_if = "String::is_empty")]
    message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<Message> for MessageView {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            to: m.to,
            content: m.content,
            status: m.status,
            message_id: m.message_id,
            sent_at: m.sent_at,
            created_at: m.created_at,
        }
    }
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

async fn handle_index() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "kurye message dispatch service" }))
}

async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "name": state.name,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Deserialize)]
struct CreateMessageRequest {
    to: String,
    content: String,
}

async fn handle_create_message(
    State(state): State<AppState>,
    Json(req): Json<CreateMessageRequest>,
) -> Response {
    let message = match Message::new(&req.to, &req.content) {
        Ok(message) => message,
        Err(e) => return error_body(StatusCode::BAD_REQUEST, e.to_string()),
    };

    match state.service.enqueue(&message).await {
        Ok(()) => (StatusCode::CREATED, Json(MessageView::from(message))).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to enqueue message");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[derive(Deserialize)]
struct SentQuery {
    page: Option<usize>,
    limit: Option<usize>,
}

/// Out-of-range values fall back to the defaults rather than erroring.
fn clamp_paging(page: Option<usize>, limit: Option<usize>) -> (usize, usize) {
    let page = match page {
        Some(p) if p > 0 => p,
        _ => DEFAULT_PAGE,
    };
    let limit = match limit {
        Some(l) if l > 0 && l <= MAX_LIMIT => l,
        _ => DEFAULT_LIMIT,
    };
    (page, limit)
}

async fn handle_sent_messages(
    State(state): State<AppState>,
    Query(query): Query<SentQuery>,
) -> Response {
    let (page, limit) = clamp_paging(query.page, query.limit);

    match state.service.delivered(page, limit).await {
        Ok((items, total)) => Json(serde_json::json!({
            "items": items.into_iter().map(MessageView::from).collect::<Vec<_>>(),
            "total": total,
            "page": page,
            "limit": limit,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to list sent messages");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[derive(Deserialize)]
struct SchedulerRequest {
    action: String,
}

async fn handle_scheduler_control(
    State(state): State<AppState>,
    Json(req): Json<SchedulerRequest>,
) -> Response {
    match req.action.as_str() {
        "start" => match state.scheduler.start().await {
            Ok(()) => Json(serde_json::json!({ "message": "scheduler started" })).into_response(),
            Err(e) => error_body(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
        },
        "stop" => match state.scheduler.stop().await {
            Ok(()) => Json(serde_json::json!({ "message": "scheduler stopped" })).into_response(),
            Err(e) => error_body(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
        },
        _ => error_body(StatusCode::BAD_REQUEST, "action must be 'start' or 'stop'"),
    }
}

async fn handle_scheduler_status(State(state): State<AppState>) -> Response {
    match state.scheduler.is_running().await {
        Ok(running) => Json(serde_json::json!({ "running": running })).into_response(),
        Err(e) => error_body(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}
