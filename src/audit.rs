use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{AuditLog, NewAuditLog};
use crate::schema::audit_logs;

pub const ENTITY_LOAN: &str = "loan";
pub const ENTITY_MEDIA: &str = "media";
pub const ENTITY_USER: &str = "user";
pub const ENTITY_NOTIFICATION: &str = "notification";

pub const ACTION_LOAN_CREATED: &str = "loan.created";
pub const ACTION_LOAN_APPROVED: &str = "loan.approved";
pub const ACTION_LOAN_REJECTED: &str = "loan.rejected";
pub const ACTION_LOAN_DOCUMENTS_REQUESTED: &str = "loan.docs_requested";
pub const ACTION_LOAN_ARCHIVED: &str = "loan.archived";
pub const ACTION_LOAN_DELETED: &str = "loan.deleted";
pub const ACTION_MEDIA_UPLOADED: &str = "media.uploaded";
pub const ACTION_MEDIA_VALIDATED: &str = "media.validated";
pub const ACTION_MEDIA_REJECTED: &str = "media.rejected";
pub const ACTION_MEDIA_DELETED: &str = "media.deleted";
pub const ACTION_USER_CREATED: &str = "user.created";
pub const ACTION_USER_UPDATED: &str = "user.updated";
pub const ACTION_USER_DEACTIVATED: &str = "user.deactivated";
pub const ACTION_NOTIFICATION_RETRIED: &str = "notif.retried";
pub const ACTION_BULK_COMMUNICATION: &str = "notif.bulk_sent";
pub const ACTION_PASSWORD_RESET: &str = "user.password_reset";

/// Appends an audit entry. Audit writes ride the caller's connection so they
/// commit with the action they describe.
pub fn record(
    conn: &mut PgConnection,
    actor_id: Option<Uuid>,
    action: &str,
    entity_type: &str,
    entity_id: Option<Uuid>,
    description: impl Into<String>,
    metadata: Value,
) -> AppResult<()> {
    let entry = NewAuditLog {
        id: Uuid::new_v4(),
        user_id: actor_id,
        entity_type: entity_type.to_string(),
        entity_id,
        action: action.to_string(),
        description: Some(description.into()),
        metadata,
    };

    diesel::insert_into(audit_logs::table)
        .values(&entry)
        .execute(conn)?;
    Ok(())
}

pub fn recent(conn: &mut PgConnection, limit: i64) -> AppResult<Vec<AuditLog>> {
    let entries = audit_logs::table
        .order(audit_logs::created_at.desc())
        .limit(limit.clamp(1, 200))
        .load(conn)?;
    Ok(entries)
}
