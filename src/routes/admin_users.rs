use axum::extract::{Json, Path, Query, State};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
    audit,
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::User,
    schema::{refresh_tokens, users},
    state::AppState,
};

#[derive(Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub created_at: String,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            phone: user.phone.clone(),
            role: user.role.clone(),
            is_active: user.is_active,
            created_at: user.created_at.and_utc().to_rfc3339(),
        }
    }
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub role: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Serialize)]
pub struct ListResponse {
    pub users: Vec<UserResponse>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

pub async fn list(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ListResponse>> {
    user.require_admin()?;
    let mut conn = state.db()?;

    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(25).clamp(1, 100);

    let mut rows_query = users::table.into_boxed();
    let mut count_query = users::table.into_boxed();

    if let Some(role) = &query.role {
        rows_query = rows_query.filter(users::role.eq(role.clone()));
        count_query = count_query.filter(users::role.eq(role.clone()));
    }
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search.to_lowercase());
        let filter = users::email
            .ilike(pattern.clone())
            .or(users::first_name.ilike(pattern.clone()))
            .or(users::last_name.ilike(pattern.clone()));
        rows_query = rows_query.filter(filter);
        let filter = users::email
            .ilike(pattern.clone())
            .or(users::first_name.ilike(pattern.clone()))
            .or(users::last_name.ilike(pattern));
        count_query = count_query.filter(filter);
    }

    let total: i64 = count_query.count().first(&mut conn)?;
    let rows: Vec<User> = rows_query
        .order(users::created_at.desc())
        .limit(per_page)
        .offset((page - 1) * per_page)
        .load(&mut conn)?;

    Ok(Json(ListResponse {
        users: rows.iter().map(UserResponse::from).collect(),
        page,
        per_page,
        total,
    }))
}

/// Toggles account activation. Deactivating also revokes every live refresh
/// token so the account cannot mint new access tokens.
pub async fn toggle_activation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(target_id): Path<Uuid>,
) -> AppResult<Json<UserResponse>> {
    user.require_admin()?;
    if target_id == user.user_id {
        return Err(AppError::bad_request("cannot deactivate your own account"));
    }

    let mut conn = state.db()?;
    let target: User = users::table.find(target_id).first(&mut conn)?;
    let now = Utc::now().naive_utc();
    let activate = !target.is_active;

    let updated: User = conn.transaction::<_, AppError, _>(|conn| {
        diesel::update(users::table.find(target_id))
            .set((users::is_active.eq(activate), users::updated_at.eq(now)))
            .execute(conn)?;

        if !activate {
            diesel::update(
                refresh_tokens::table
                    .filter(refresh_tokens::user_id.eq(target_id))
                    .filter(refresh_tokens::revoked_at.is_null()),
            )
            .set((
                refresh_tokens::revoked_at.eq(now),
                refresh_tokens::updated_at.eq(now),
            ))
            .execute(conn)?;
        }

        let action = if activate {
            audit::ACTION_USER_UPDATED
        } else {
            audit::ACTION_USER_DEACTIVATED
        };
        audit::record(
            conn,
            Some(user.user_id),
            action,
            audit::ENTITY_USER,
            Some(target_id),
            format!(
                "account {} {}",
                target.email,
                if activate { "reactivated" } else { "deactivated" }
            ),
            json!({ "is_active": activate }),
        )?;

        let updated = users::table.find(target_id).first(conn)?;
        Ok(updated)
    })?;

    info!(user_id = %target_id, is_active = activate, "account activation toggled");
    Ok(Json(UserResponse::from(&updated)))
}
