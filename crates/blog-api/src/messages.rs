use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::warn;

use blog_db::models::{MessageRow, NotificationRow};
use blog_types::api::{
    Claims, MessageResponse, NotificationQuery, NotificationResponse, PageQuery, SendMessageRequest,
};
use blog_types::models::{Page, PageRequest};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::posts::validate_body;
use crate::store;

const UNREAD_MESSAGE_COUNT: &str = "unread_message_count";

fn message_response(row: MessageRow) -> MessageResponse {
    MessageResponse {
        id: row.id,
        sender_id: row.sender_id,
        sender_username: row.sender_username,
        recipient_id: row.recipient_id,
        body: row.body,
        timestamp: row.timestamp,
    }
}

fn notification_response(row: NotificationRow) -> NotificationResponse {
    let data = serde_json::from_str(&row.payload_json).unwrap_or_else(|e| {
        warn!("Corrupt payload on notification {}: {}", row.id, e);
        serde_json::Value::Null
    });
    NotificationResponse {
        name: row.name,
        data,
        timestamp: row.timestamp,
    }
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(recipient): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let body = validate_body(&req.body)?;
    let sender_id = claims.sub;

    let message = store::transact(&state, move |session| {
        let user = session
            .user_by_username(&recipient)?
            .ok_or_else(|| ApiError::NotFound(format!("user {} not found", recipient)))?;

        let now = chrono::Utc::now();
        let message = session.send_message(sender_id, user.id, &body, now)?;
        let unread = session.new_message_count(user.id)?;
        session.add_notification(user.id, UNREAD_MESSAGE_COUNT, &unread.to_string(), now)?;
        Ok(message)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(message_response(message))))
}

/// The caller's inbox, newest first. Reading it marks everything read.
pub async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Page<MessageResponse>>, ApiError> {
    let req = PageRequest::new(query.page, state.config.posts_per_page);
    let user_id = claims.sub;

    store::transact(&state, move |session| {
        let now = chrono::Utc::now();
        session.mark_messages_read(user_id, now)?;
        session.add_notification(user_id, UNREAD_MESSAGE_COUNT, "0", now)
    })
    .await?;

    let page = store::read(&state, move |db| db.received_messages(user_id, req)).await?;
    Ok(Json(page.map(message_response)))
}

pub async fn notifications(
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<NotificationResponse>>, ApiError> {
    let user_id = claims.sub;
    let since = query.since;
    let rows = store::read(&state, move |db| db.notifications_since(user_id, since)).await?;
    Ok(Json(rows.into_iter().map(notification_response).collect()))
}
