use std::time::Duration;

use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    audit,
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    media as media_rules,
    models::{Loan, Media},
    routes::loans::MediaResponse,
    schema::{loan_media, loans, media as media_table},
    state::AppState,
};

const DOWNLOAD_URL_TTL: Duration = Duration::from_secs(300);

#[derive(Serialize)]
pub struct DownloadResponse {
    pub url: String,
    pub expires_in: u64,
    pub filename: String,
    pub content_type: Option<String>,
}

/// Loads the media row and checks the caller may touch it. Clients only see
/// documents attached to their own loans.
fn load_accessible_media(
    conn: &mut diesel::PgConnection,
    media_id: Uuid,
    user: &AuthenticatedUser,
) -> AppResult<(Media, Option<Loan>)> {
    let media: Media = media_table::table.find(media_id).first(conn)?;

    let parent: Option<Loan> = loan_media::table
        .inner_join(loans::table)
        .filter(loan_media::media_id.eq(media_id))
        .select(loans::all_columns)
        .first(conn)
        .optional()?;

    if !user.is_admin() {
        match &parent {
            Some(loan) if loan.user_id == Some(user.user_id) => {}
            _ => return Err(AppError::not_found()),
        }
    }

    Ok((media, parent))
}

pub async fn download(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(media_id): Path<Uuid>,
) -> AppResult<Json<DownloadResponse>> {
    let mut conn = state.db()?;
    let (media, _) = load_accessible_media(&mut conn, media_id, &user)?;
    drop(conn);

    let url = state
        .storage
        .presign_get_object(&media.storage_key, DOWNLOAD_URL_TTL)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(DownloadResponse {
        url,
        expires_in: DOWNLOAD_URL_TTL.as_secs(),
        filename: media.original_name,
        content_type: media.mime_type,
    }))
}

pub async fn delete(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(media_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let (media, parent) = load_accessible_media(&mut conn, media_id, &user)?;

    // Clients can only withdraw documents while the dossier is still open.
    if !user.is_admin() {
        if let Some(loan) = &parent {
            if !loan.status().is_open() {
                return Err(AppError::conflict(
                    "documents cannot be removed from a closed loan",
                ));
            }
        }
        if media.status == media_rules::STATUS_VALIDATED {
            return Err(AppError::conflict("validated documents cannot be removed"));
        }
    }

    conn.transaction::<_, AppError, _>(|conn| {
        diesel::delete(loan_media::table.filter(loan_media::media_id.eq(media_id)))
            .execute(conn)?;
        diesel::delete(media_table::table.find(media_id)).execute(conn)?;
        audit::record(
            conn,
            Some(user.user_id),
            audit::ACTION_MEDIA_DELETED,
            audit::ENTITY_MEDIA,
            Some(media_id),
            format!("document '{}' deleted", media.original_name),
            json!({ "storage_key": media.storage_key }),
        )?;
        Ok(())
    })?;
    drop(conn);

    // Storage cleanup is best effort; an orphaned object is preferable to a
    // dangling database row.
    if let Err(err) = state.storage.delete_object(&media.storage_key).await {
        warn!(error = %err, key = %media.storage_key, "failed to delete stored object");
    }

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ReviewRequest {
    pub comment: Option<String>,
}

pub async fn validate(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(media_id): Path<Uuid>,
    payload: Option<Json<ReviewRequest>>,
) -> AppResult<Json<MediaResponse>> {
    user.require_admin()?;
    review(state, user, media_id, media_rules::STATUS_VALIDATED, payload).await
}

pub async fn reject(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(media_id): Path<Uuid>,
    payload: Option<Json<ReviewRequest>>,
) -> AppResult<Json<MediaResponse>> {
    user.require_admin()?;
    review(state, user, media_id, media_rules::STATUS_REJECTED, payload).await
}

async fn review(
    state: AppState,
    user: AuthenticatedUser,
    media_id: Uuid,
    new_status: &str,
    payload: Option<Json<ReviewRequest>>,
) -> AppResult<Json<MediaResponse>> {
    let mut conn = state.db()?;
    let media: Media = media_table::table.find(media_id).first(&mut conn)?;

    if media.status != media_rules::STATUS_PENDING {
        return Err(AppError::conflict(format!(
            "document already reviewed as '{}'",
            media.status
        )));
    }

    let comment = payload.and_then(|Json(body)| body.comment);
    let now = Utc::now().naive_utc();

    let updated: Media = conn.transaction::<_, AppError, _>(|conn| {
        diesel::update(media_table::table.find(media_id))
            .set((
                media_table::status.eq(new_status),
                media_table::description.eq(comment.as_deref().or(media.description.as_deref())),
                media_table::updated_at.eq(now),
            ))
            .execute(conn)?;

        let action = if new_status == media_rules::STATUS_VALIDATED {
            audit::ACTION_MEDIA_VALIDATED
        } else {
            audit::ACTION_MEDIA_REJECTED
        };
        audit::record(
            conn,
            Some(user.user_id),
            action,
            audit::ENTITY_MEDIA,
            Some(media_id),
            format!("document '{}' marked {new_status}", media.original_name),
            json!({ "comment": comment }),
        )?;

        let updated = media_table::table.find(media_id).first(conn)?;
        Ok(updated)
    })?;

    info!(media_id = %media_id, status = %new_status, "document reviewed");
    Ok(Json(MediaResponse::from(&updated)))
}
