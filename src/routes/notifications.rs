use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
    analytics,
    audit,
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Notification, User},
    notifications as queue,
    schema::{notifications, users},
    state::AppState,
};

#[derive(Serialize)]
pub struct NotificationResponse {
    pub id: Uuid,
    pub channel: String,
    pub event: String,
    pub subject: String,
    pub body: String,
    pub status: String,
    pub attempts: i32,
    pub is_read: bool,
    pub created_at: String,
}

impl From<&Notification> for NotificationResponse {
    fn from(notification: &Notification) -> Self {
        Self {
            id: notification.id,
            channel: notification.channel.clone(),
            event: notification.event.clone(),
            subject: notification.subject.clone(),
            body: notification.body.clone(),
            status: notification.status.clone(),
            attempts: notification.attempts,
            is_read: notification.is_read,
            created_at: notification.created_at.and_utc().to_rfc3339(),
        }
    }
}

#[derive(Deserialize)]
pub struct InAppQuery {
    pub unread_only: Option<bool>,
    pub limit: Option<i64>,
}

/// In-app feed on the client dashboard.
pub async fn list_in_app(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<InAppQuery>,
) -> AppResult<Json<Vec<NotificationResponse>>> {
    let mut conn = state.db()?;

    let mut db_query = notifications::table
        .filter(notifications::user_id.eq(user.user_id))
        .filter(notifications::channel.eq(queue::CHANNEL_IN_APP))
        .into_boxed();

    if query.unread_only.unwrap_or(false) {
        db_query = db_query.filter(notifications::is_read.eq(false));
    }

    let rows: Vec<Notification> = db_query
        .order(notifications::created_at.desc())
        .limit(query.limit.unwrap_or(50).clamp(1, 200))
        .load(&mut conn)?;

    Ok(Json(rows.iter().map(NotificationResponse::from).collect()))
}

#[derive(Serialize)]
pub struct UnreadCountResponse {
    pub unread: i64,
}

pub async fn unread_count(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<UnreadCountResponse>> {
    let mut conn = state.db()?;
    let unread: i64 = notifications::table
        .filter(notifications::user_id.eq(user.user_id))
        .filter(notifications::channel.eq(queue::CHANNEL_IN_APP))
        .filter(notifications::is_read.eq(false))
        .count()
        .first(&mut conn)?;
    Ok(Json(UnreadCountResponse { unread }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(notification_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let updated = diesel::update(
        notifications::table
            .find(notification_id)
            .filter(notifications::user_id.eq(user.user_id))
            .filter(notifications::channel.eq(queue::CHANNEL_IN_APP)),
    )
    .set((
        notifications::is_read.eq(true),
        notifications::read_at.eq(now),
        notifications::updated_at.eq(now),
    ))
    .execute(&mut conn)?;

    if updated == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    diesel::update(
        notifications::table
            .filter(notifications::user_id.eq(user.user_id))
            .filter(notifications::channel.eq(queue::CHANNEL_IN_APP))
            .filter(notifications::is_read.eq(false)),
    )
    .set((
        notifications::is_read.eq(true),
        notifications::read_at.eq(now),
        notifications::updated_at.eq(now),
    ))
    .execute(&mut conn)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct AdminListQuery {
    pub status: Option<String>,
    pub channel: Option<String>,
    pub event: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Serialize)]
pub struct AdminNotificationResponse {
    #[serde(flatten)]
    pub notification: NotificationResponse,
    pub recipient: String,
    pub last_error: Option<String>,
    pub next_attempt_at: String,
    pub sent_at: Option<String>,
}

impl From<&Notification> for AdminNotificationResponse {
    fn from(notification: &Notification) -> Self {
        Self {
            recipient: notification.recipient.clone(),
            last_error: notification.last_error.clone(),
            next_attempt_at: notification.next_attempt_at.and_utc().to_rfc3339(),
            sent_at: notification.sent_at.map(|at| at.and_utc().to_rfc3339()),
            notification: NotificationResponse::from(notification),
        }
    }
}

#[derive(Serialize)]
pub struct AdminListResponse {
    pub notifications: Vec<AdminNotificationResponse>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

pub async fn admin_list(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<AdminListQuery>,
) -> AppResult<Json<AdminListResponse>> {
    user.require_admin()?;
    let mut conn = state.db()?;

    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(25).clamp(1, 100);

    let mut rows_query = notifications::table.into_boxed();
    let mut count_query = notifications::table.into_boxed();
    if let Some(status) = &query.status {
        rows_query = rows_query.filter(notifications::status.eq(status.clone()));
        count_query = count_query.filter(notifications::status.eq(status.clone()));
    }
    if let Some(channel) = &query.channel {
        rows_query = rows_query.filter(notifications::channel.eq(channel.clone()));
        count_query = count_query.filter(notifications::channel.eq(channel.clone()));
    }
    if let Some(event) = &query.event {
        rows_query = rows_query.filter(notifications::event.eq(event.clone()));
        count_query = count_query.filter(notifications::event.eq(event.clone()));
    }

    let total: i64 = count_query.count().first(&mut conn)?;
    let rows: Vec<Notification> = rows_query
        .order(notifications::created_at.desc())
        .limit(per_page)
        .offset((page - 1) * per_page)
        .load(&mut conn)?;

    Ok(Json(AdminListResponse {
        notifications: rows.iter().map(AdminNotificationResponse::from).collect(),
        page,
        per_page,
        total,
    }))
}

pub async fn admin_retry(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(notification_id): Path<Uuid>,
) -> AppResult<Json<AdminNotificationResponse>> {
    user.require_admin()?;
    let mut conn = state.db()?;

    let notification: Notification = notifications::table.find(notification_id).first(&mut conn)?;
    if notification.status != queue::STATUS_FAILED {
        return Err(AppError::conflict(
            "only failed notifications can be retried",
        ));
    }

    let refreshed = queue::reset_for_retry(&mut conn, notification_id)?;
    audit::record(
        &mut conn,
        Some(user.user_id),
        audit::ACTION_NOTIFICATION_RETRIED,
        audit::ENTITY_NOTIFICATION,
        Some(notification_id),
        format!(
            "notification to {} requeued after failure",
            refreshed.recipient
        ),
        json!({ "channel": refreshed.channel, "event": refreshed.event }),
    )?;

    info!(notification_id = %notification_id, "notification requeued by staff");
    Ok(Json(AdminNotificationResponse::from(&refreshed)))
}

pub async fn admin_stats(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<analytics::NotificationStats>> {
    user.require_admin()?;
    let mut conn = state.db()?;
    Ok(Json(analytics::notification_stats(&mut conn)?))
}

#[derive(Deserialize)]
pub struct BulkRequest {
    pub subject: String,
    pub body: String,
    /// Explicit recipients; when empty the message goes to every active
    /// client account.
    #[serde(default)]
    pub user_ids: Vec<Uuid>,
    #[serde(default)]
    pub in_app: bool,
}

#[derive(Serialize)]
pub struct BulkResponse {
    pub queued: usize,
}

pub async fn admin_bulk(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<BulkRequest>,
) -> AppResult<(StatusCode, Json<BulkResponse>)> {
    user.require_admin()?;
    if payload.subject.trim().is_empty() || payload.body.trim().is_empty() {
        return Err(AppError::bad_request("subject and body are required"));
    }

    let mut conn = state.db()?;
    let mut targets_query = users::table
        .filter(users::is_active.eq(true))
        .filter(users::role.eq(crate::auth::ROLE_CLIENT))
        .into_boxed();
    if !payload.user_ids.is_empty() {
        targets_query = targets_query.filter(users::id.eq_any(payload.user_ids.clone()));
    }
    let targets: Vec<User> = targets_query.load(&mut conn)?;

    if targets.is_empty() {
        return Err(AppError::bad_request("no matching recipients"));
    }

    let mut queued = 0;
    for target in &targets {
        queue::queue_direct(
            &mut conn,
            queue::CHANNEL_EMAIL,
            queue::EVENT_BULK_COMMUNICATION,
            &target.email,
            Some(target.id),
            &payload.subject,
            &payload.body,
        )?;
        queued += 1;

        if payload.in_app {
            queue::queue_direct(
                &mut conn,
                queue::CHANNEL_IN_APP,
                queue::EVENT_BULK_COMMUNICATION,
                &target.email,
                Some(target.id),
                &payload.subject,
                &payload.body,
            )?;
            queued += 1;
        }
    }

    audit::record(
        &mut conn,
        Some(user.user_id),
        audit::ACTION_BULK_COMMUNICATION,
        audit::ENTITY_NOTIFICATION,
        None,
        format!("bulk communication '{}' queued", payload.subject.trim()),
        json!({ "recipients": targets.len(), "in_app": payload.in_app }),
    )?;

    info!(recipients = targets.len(), "bulk communication queued");
    Ok((StatusCode::ACCEPTED, Json(BulkResponse { queued })))
}
