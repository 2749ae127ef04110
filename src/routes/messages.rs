use std::collections::HashMap;

use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Message, NewMessage, User},
    schema::{messages, users},
    state::AppState,
};

#[derive(Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub subject: String,
    pub content: String,
    pub is_read: bool,
    pub created_at: String,
}

impl From<&Message> for MessageResponse {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            sender_id: message.sender_id,
            recipient_id: message.recipient_id,
            subject: message.subject.clone(),
            content: message.content.clone(),
            is_read: message.is_read,
            created_at: message.created_at.and_utc().to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct ConversationSummary {
    pub counterpart_id: Uuid,
    pub counterpart_name: String,
    pub last_message: MessageResponse,
    pub unread_count: i64,
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub subject: String,
    pub content: String,
}

pub async fn conversations(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<ConversationSummary>>> {
    let mut conn = state.db()?;

    let involving: Vec<Message> = messages::table
        .filter(
            messages::sender_id
                .eq(user.user_id)
                .or(messages::recipient_id.eq(user.user_id)),
        )
        .order(messages::created_at.desc())
        .load(&mut conn)?;

    // Newest-first, so the first message seen per counterpart is the latest.
    let mut summaries: Vec<(Uuid, Message, i64)> = Vec::new();
    let mut seen: HashMap<Uuid, usize> = HashMap::new();
    for message in involving {
        let counterpart = if message.sender_id == user.user_id {
            message.recipient_id
        } else {
            message.sender_id
        };
        let unread = (message.recipient_id == user.user_id && !message.is_read) as i64;
        match seen.get(&counterpart) {
            Some(&index) => summaries[index].2 += unread,
            None => {
                seen.insert(counterpart, summaries.len());
                summaries.push((counterpart, message, unread));
            }
        }
    }

    let counterpart_ids: Vec<Uuid> = summaries.iter().map(|(id, _, _)| *id).collect();
    let names: HashMap<Uuid, String> = users::table
        .filter(users::id.eq_any(&counterpart_ids))
        .select((users::id, users::first_name, users::last_name))
        .load::<(Uuid, String, String)>(&mut conn)?
        .into_iter()
        .map(|(id, first, last)| (id, format!("{first} {last}")))
        .collect();

    Ok(Json(
        summaries
            .into_iter()
            .map(|(counterpart_id, last, unread_count)| ConversationSummary {
                counterpart_name: names
                    .get(&counterpart_id)
                    .cloned()
                    .unwrap_or_else(|| "Unknown".to_string()),
                counterpart_id,
                last_message: MessageResponse::from(&last),
                unread_count,
            })
            .collect(),
    ))
}

/// Full thread with one counterpart, oldest first. Viewing marks the
/// incoming half as read.
pub async fn thread(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(counterpart_id): Path<Uuid>,
) -> AppResult<Json<Vec<MessageResponse>>> {
    let mut conn = state.db()?;

    let thread: Vec<Message> = messages::table
        .filter(
            messages::sender_id
                .eq(user.user_id)
                .and(messages::recipient_id.eq(counterpart_id))
                .or(messages::sender_id
                    .eq(counterpart_id)
                    .and(messages::recipient_id.eq(user.user_id))),
        )
        .order(messages::created_at.asc())
        .load(&mut conn)?;

    let now = Utc::now().naive_utc();
    diesel::update(
        messages::table
            .filter(messages::recipient_id.eq(user.user_id))
            .filter(messages::sender_id.eq(counterpart_id))
            .filter(messages::is_read.eq(false)),
    )
    .set((messages::is_read.eq(true), messages::read_at.eq(now)))
    .execute(&mut conn)?;

    Ok(Json(thread.iter().map(MessageResponse::from).collect()))
}

pub async fn send(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(recipient_id): Path<Uuid>,
    Json(payload): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    if payload.subject.trim().is_empty() || payload.content.trim().is_empty() {
        return Err(AppError::bad_request("subject and content are required"));
    }

    let mut conn = state.db()?;
    let recipient: User = users::table
        .find(recipient_id)
        .first(&mut conn)
        .map_err(|_| AppError::bad_request("unknown recipient"))?;
    if !recipient.is_active {
        return Err(AppError::bad_request("recipient account is deactivated"));
    }
    // Clients only talk to staff; staff can reach anyone.
    if !user.is_admin() && recipient.role != crate::auth::ROLE_ADMIN {
        return Err(AppError::forbidden());
    }

    let new_message = NewMessage {
        id: Uuid::new_v4(),
        sender_id: user.user_id,
        recipient_id: recipient.id,
        subject: payload.subject.trim().to_string(),
        content: payload.content.trim().to_string(),
    };
    diesel::insert_into(messages::table)
        .values(&new_message)
        .execute(&mut conn)?;

    let inserted: Message = messages::table.find(new_message.id).first(&mut conn)?;
    Ok((StatusCode::CREATED, Json(MessageResponse::from(&inserted))))
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
    let unread: i64 = messages::table
        .filter(messages::recipient_id.eq(user.user_id))
        .filter(messages::is_read.eq(false))
        .count()
        .first(&mut conn)?;
    Ok(Json(UnreadCountResponse { unread }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(message_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let updated = diesel::update(
        messages::table
            .find(message_id)
            .filter(messages::recipient_id.eq(user.user_id)),
    )
    .set((messages::is_read.eq(true), messages::read_at.eq(now)))
    .execute(&mut conn)?;

    if updated == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}
