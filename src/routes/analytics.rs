use axum::extract::{Json, Query, State};
use serde::{Deserialize, Serialize};

use crate::{
    analytics,
    audit,
    auth::AuthenticatedUser,
    error::AppResult,
    models::AuditLog,
    state::AppState,
};

pub async fn kpis(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<analytics::Kpis>> {
    user.require_admin()?;
    let mut conn = state.db()?;
    Ok(Json(analytics::kpis(&mut conn)?))
}

pub async fn loan_stats(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<analytics::LoanStats>> {
    user.require_admin()?;
    let mut conn = state.db()?;
    Ok(Json(analytics::loan_stats(&mut conn)?))
}

#[derive(Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct AuditEntryResponse {
    pub id: String,
    pub actor_id: Option<String>,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub action: String,
    pub description: Option<String>,
    pub created_at: String,
}

impl From<&AuditLog> for AuditEntryResponse {
    fn from(entry: &AuditLog) -> Self {
        Self {
            id: entry.id.to_string(),
            actor_id: entry.user_id.map(|id| id.to_string()),
            entity_type: entry.entity_type.clone(),
            entity_id: entry.entity_id.map(|id| id.to_string()),
            action: entry.action.clone(),
            description: entry.description.clone(),
            created_at: entry.created_at.and_utc().to_rfc3339(),
        }
    }
}

pub async fn recent_activity(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<AuditQuery>,
) -> AppResult<Json<Vec<AuditEntryResponse>>> {
    user.require_admin()?;
    let mut conn = state.db()?;
    let entries = audit::recent(&mut conn, query.limit.unwrap_or(50))?;
    Ok(Json(entries.iter().map(AuditEntryResponse::from).collect()))
}
