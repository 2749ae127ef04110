use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use chrono::{Datelike, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    audit,
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    loan::{
        self, document_checklist, loan_progress, repayment_schedule, risk_level,
        DocumentChecklist, LoanProgress, LoanStatus, RiskLevel,
    },
    models::{Loan, Media},
    notifications,
    routes::loans::{loan_documents, LoanResponse, MediaResponse},
    schema::{loan_media, loans, media as media_table},
    state::AppState,
};

#[derive(Deserialize)]
pub struct AdminListQuery {
    pub search: Option<String>,
    pub status: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Serialize)]
pub struct AdminListResponse {
    pub loans: Vec<LoanResponse>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

pub async fn list(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<AdminListQuery>,
) -> AppResult<Json<AdminListResponse>> {
    user.require_admin()?;
    let mut conn = state.db()?;

    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(25).clamp(1, 100);

    let status_filter = match &query.status {
        Some(raw) => Some(
            LoanStatus::parse(raw)
                .ok_or_else(|| AppError::bad_request(format!("unknown status '{raw}'")))?,
        ),
        None => None,
    };

    let mut rows_query = loans::table.into_boxed();
    let mut count_query = loans::table.into_boxed();

    if let Some(status) = status_filter {
        rows_query = rows_query.filter(loans::status.eq(status.as_str()));
        count_query = count_query.filter(loans::status.eq(status.as_str()));
    }
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search.to_lowercase());
        let filter = loans::email
            .ilike(pattern.clone())
            .or(loans::first_name.ilike(pattern.clone()))
            .or(loans::last_name.ilike(pattern.clone()));
        rows_query = rows_query.filter(filter);
        let filter = loans::email
            .ilike(pattern.clone())
            .or(loans::first_name.ilike(pattern.clone()))
            .or(loans::last_name.ilike(pattern));
        count_query = count_query.filter(filter);
    }

    let total: i64 = count_query.count().first(&mut conn)?;
    let rows: Vec<Loan> = rows_query
        .order(loans::created_at.desc())
        .limit(per_page)
        .offset((page - 1) * per_page)
        .load(&mut conn)?;

    Ok(Json(AdminListResponse {
        loans: rows.iter().map(LoanResponse::from).collect(),
        page,
        per_page,
        total,
    }))
}

#[derive(Serialize)]
pub struct AdminLoanDetail {
    pub loan: LoanResponse,
    pub address: Option<String>,
    pub profession: Option<String>,
    pub employer: Option<String>,
    pub monthly_income: Option<f64>,
    pub monthly_charges: Option<f64>,
    pub admin_comments: Option<String>,
    pub progress: LoanProgress,
    pub documents: Vec<MediaResponse>,
    pub checklist: DocumentChecklist,
    pub risk: RiskLevel,
    pub days_since_submission: i64,
}

pub async fn detail(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(loan_id): Path<Uuid>,
) -> AppResult<Json<AdminLoanDetail>> {
    user.require_admin()?;
    let mut conn = state.db()?;

    let loan: Loan = loans::table.find(loan_id).first(&mut conn)?;
    let documents = loan_documents(&mut conn, loan.id)?;
    let now = Utc::now().naive_utc();

    Ok(Json(AdminLoanDetail {
        address: loan.address.clone(),
        profession: loan.profession.clone(),
        employer: loan.employer.clone(),
        monthly_income: loan.monthly_income.as_ref().map(loan::money_to_f64),
        monthly_charges: loan.monthly_charges.as_ref().map(loan::money_to_f64),
        admin_comments: loan.admin_comments.clone(),
        progress: loan_progress(loan.status()),
        checklist: document_checklist(&documents),
        documents: documents.iter().map(MediaResponse::from).collect(),
        risk: risk_level(&loan, now),
        days_since_submission: loan::days_since(loan.created_at),
        loan: LoanResponse::from(&loan),
    }))
}

#[derive(Deserialize, Default)]
pub struct ApproveRequest {
    pub interest_rate: Option<f64>,
    pub comment: Option<String>,
}

pub async fn approve(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(loan_id): Path<Uuid>,
    payload: Option<Json<ApproveRequest>>,
) -> AppResult<Json<LoanResponse>> {
    user.require_admin()?;
    let mut conn = state.db()?;
    let loan: Loan = loans::table.find(loan_id).first(&mut conn)?;

    if !loan.status().can_approve() {
        return Err(AppError::conflict(format!(
            "a loan in status '{}' cannot be approved",
            loan.status
        )));
    }

    let documents = loan_documents(&mut conn, loan.id)?;
    let checklist = document_checklist(&documents);
    if !checklist.missing.is_empty() {
        return Err(AppError::conflict(format!(
            "required documents are missing: {}",
            checklist.missing.join(", ")
        )));
    }

    let body = payload.map(|Json(body)| body).unwrap_or_default();
    let now = Utc::now().naive_utc();

    let updated: Loan = conn.transaction::<_, AppError, _>(|conn| {
        let mut loan = loan.clone();
        if let Some(rate) = body.interest_rate {
            if !(0.0..=30.0).contains(&rate) {
                return Err(AppError::bad_request("interest rate must be between 0 and 30"));
            }
            loan.interest_rate = loan::to_money(rate);
        }
        let (monthly, total) = repayment_schedule(&loan);

        diesel::update(loans::table.find(loan.id))
            .set((
                loans::status.eq(LoanStatus::Approved.as_str()),
                loans::interest_rate.eq(&loan.interest_rate),
                loans::monthly_payment.eq(&monthly),
                loans::total_amount.eq(&total),
                loans::admin_comments.eq(body.comment.as_deref().or(loan.admin_comments.as_deref())),
                loans::approved_at.eq(now),
                loans::updated_at.eq(now),
            ))
            .execute(conn)?;

        audit::record(
            conn,
            Some(user.user_id),
            audit::ACTION_LOAN_APPROVED,
            audit::ENTITY_LOAN,
            Some(loan.id),
            format!("loan for {} approved", loan.email),
            json!({ "monthly_payment": loan::money_to_f64(&monthly) }),
        )?;

        let updated = loans::table.find(loan.id).first(conn)?;
        Ok(updated)
    })?;

    notifications::notify_loan_event(
        &mut conn,
        &updated,
        notifications::EVENT_LOAN_APPROVED,
        json!({}),
    )?;

    info!(loan_id = %loan_id, "loan approved");
    Ok(Json(LoanResponse::from(&updated)))
}

#[derive(Deserialize)]
pub struct RejectRequest {
    pub reason: String,
    pub comment: Option<String>,
}

pub async fn reject(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(loan_id): Path<Uuid>,
    Json(payload): Json<RejectRequest>,
) -> AppResult<Json<LoanResponse>> {
    user.require_admin()?;
    if payload.reason.trim().is_empty() {
        return Err(AppError::bad_request("a rejection reason is required"));
    }

    let mut conn = state.db()?;
    let loan: Loan = loans::table.find(loan_id).first(&mut conn)?;

    if !loan.status().can_reject() {
        return Err(AppError::conflict(format!(
            "a loan in status '{}' cannot be rejected",
            loan.status
        )));
    }

    let now = Utc::now().naive_utc();
    let updated: Loan = conn.transaction::<_, AppError, _>(|conn| {
        diesel::update(loans::table.find(loan.id))
            .set((
                loans::status.eq(LoanStatus::Rejected.as_str()),
                loans::rejection_reason.eq(payload.reason.trim()),
                loans::admin_comments
                    .eq(payload.comment.as_deref().or(loan.admin_comments.as_deref())),
                loans::rejected_at.eq(now),
                loans::updated_at.eq(now),
            ))
            .execute(conn)?;

        audit::record(
            conn,
            Some(user.user_id),
            audit::ACTION_LOAN_REJECTED,
            audit::ENTITY_LOAN,
            Some(loan.id),
            format!("loan for {} rejected", loan.email),
            json!({ "reason": payload.reason.trim() }),
        )?;

        let updated = loans::table.find(loan.id).first(conn)?;
        Ok(updated)
    })?;

    notifications::notify_loan_event(
        &mut conn,
        &updated,
        notifications::EVENT_LOAN_REJECTED,
        json!({ "reason": payload.reason.trim() }),
    )?;

    info!(loan_id = %loan_id, "loan rejected");
    Ok(Json(LoanResponse::from(&updated)))
}

#[derive(Deserialize, Default)]
pub struct RequestDocumentsRequest {
    #[serde(default)]
    pub document_types: Vec<String>,
    pub message: Option<String>,
}

pub async fn request_documents(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(loan_id): Path<Uuid>,
    payload: Option<Json<RequestDocumentsRequest>>,
) -> AppResult<Json<LoanResponse>> {
    user.require_admin()?;
    let mut conn = state.db()?;
    let loan: Loan = loans::table.find(loan_id).first(&mut conn)?;

    if !loan.status().can_request_documents() {
        return Err(AppError::conflict(format!(
            "documents cannot be requested for a loan in status '{}'",
            loan.status
        )));
    }

    let body = payload.map(|Json(body)| body).unwrap_or_default();
    let requested = if body.document_types.is_empty() {
        let documents = loan_documents(&mut conn, loan.id)?;
        document_checklist(&documents)
            .missing
            .iter()
            .map(|t| t.to_string())
            .collect()
    } else {
        body.document_types.clone()
    };

    let now = Utc::now().naive_utc();
    let updated: Loan = conn.transaction::<_, AppError, _>(|conn| {
        diesel::update(loans::table.find(loan.id))
            .set((
                loans::status.eq(LoanStatus::DocumentsRequested.as_str()),
                loans::updated_at.eq(now),
            ))
            .execute(conn)?;

        audit::record(
            conn,
            Some(user.user_id),
            audit::ACTION_LOAN_DOCUMENTS_REQUESTED,
            audit::ENTITY_LOAN,
            Some(loan.id),
            format!("documents requested for loan of {}", loan.email),
            json!({ "document_types": requested }),
        )?;

        let updated = loans::table.find(loan.id).first(conn)?;
        Ok(updated)
    })?;

    notifications::notify_loan_event(
        &mut conn,
        &updated,
        notifications::EVENT_DOCUMENTS_REQUESTED,
        json!({
            "document_types": requested,
            "message": body.message,
        }),
    )?;

    info!(loan_id = %loan_id, "documents requested");
    Ok(Json(LoanResponse::from(&updated)))
}

pub async fn archive(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(loan_id): Path<Uuid>,
) -> AppResult<Json<LoanResponse>> {
    user.require_admin()?;
    let mut conn = state.db()?;
    let loan: Loan = loans::table.find(loan_id).first(&mut conn)?;

    if loan.status() == LoanStatus::Archived {
        return Err(AppError::conflict("loan is already archived"));
    }

    let now = Utc::now().naive_utc();
    let updated: Loan = conn.transaction::<_, AppError, _>(|conn| {
        diesel::update(loans::table.find(loan.id))
            .set((
                loans::status.eq(LoanStatus::Archived.as_str()),
                loans::archived_at.eq(now),
                loans::updated_at.eq(now),
            ))
            .execute(conn)?;

        audit::record(
            conn,
            Some(user.user_id),
            audit::ACTION_LOAN_ARCHIVED,
            audit::ENTITY_LOAN,
            Some(loan.id),
            format!("loan of {} archived", loan.email),
            json!({ "previous_status": loan.status }),
        )?;

        let updated = loans::table.find(loan.id).first(conn)?;
        Ok(updated)
    })?;

    info!(loan_id = %loan_id, "loan archived");
    Ok(Json(LoanResponse::from(&updated)))
}

pub async fn delete(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(loan_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    user.require_admin()?;
    let mut conn = state.db()?;
    let loan: Loan = loans::table.find(loan_id).first(&mut conn)?;
    let documents = loan_documents(&mut conn, loan.id)?;

    conn.transaction::<_, AppError, _>(|conn| {
        diesel::delete(loan_media::table.filter(loan_media::loan_id.eq(loan.id)))
            .execute(conn)?;
        let media_ids: Vec<Uuid> = documents.iter().map(|m| m.id).collect();
        diesel::delete(media_table::table.filter(media_table::id.eq_any(media_ids)))
            .execute(conn)?;
        diesel::delete(loans::table.find(loan.id)).execute(conn)?;

        audit::record(
            conn,
            Some(user.user_id),
            audit::ACTION_LOAN_DELETED,
            audit::ENTITY_LOAN,
            Some(loan.id),
            format!("loan of {} deleted with {} documents", loan.email, documents.len()),
            json!({ "status": loan.status }),
        )?;
        Ok(())
    })?;
    drop(conn);

    for document in &documents {
        if let Err(err) = state.storage.delete_object(&document.storage_key).await {
            warn!(error = %err, key = %document.storage_key, "failed to delete stored object");
        }
    }

    info!(loan_id = %loan_id, "loan deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct BatchRequest {
    pub action: String,
    pub loan_ids: Vec<Uuid>,
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct BatchResponse {
    pub processed: usize,
    pub skipped: usize,
}

/// Bulk decisioning from the staff list view. Approve/reject only move
/// loans still in `pending`; anything else is counted as skipped.
pub async fn batch(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<BatchRequest>,
) -> AppResult<Json<BatchResponse>> {
    user.require_admin()?;
    if payload.loan_ids.is_empty() {
        return Err(AppError::bad_request("loan_ids must not be empty"));
    }

    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let mut processed = 0;
    let mut skipped = 0;

    for loan_id in &payload.loan_ids {
        let loan: Option<Loan> = loans::table.find(loan_id).first(&mut conn).optional()?;
        let Some(loan) = loan else {
            skipped += 1;
            continue;
        };

        match payload.action.as_str() {
            "approve" => {
                if loan.status() != LoanStatus::Pending {
                    skipped += 1;
                    continue;
                }
                // Same precondition as the single-loan endpoint: an
                // incomplete dossier is skipped, not approved.
                let documents = loan_documents(&mut conn, loan.id)?;
                if !document_checklist(&documents).missing.is_empty() {
                    skipped += 1;
                    continue;
                }
                let (monthly, total) = repayment_schedule(&loan);
                diesel::update(loans::table.find(loan.id))
                    .set((
                        loans::status.eq(LoanStatus::Approved.as_str()),
                        loans::monthly_payment.eq(&monthly),
                        loans::total_amount.eq(&total),
                        loans::approved_at.eq(now),
                        loans::updated_at.eq(now),
                    ))
                    .execute(&mut conn)?;
                let updated: Loan = loans::table.find(loan.id).first(&mut conn)?;
                notifications::notify_loan_event(
                    &mut conn,
                    &updated,
                    notifications::EVENT_LOAN_APPROVED,
                    json!({}),
                )?;
                audit::record(
                    &mut conn,
                    Some(user.user_id),
                    audit::ACTION_LOAN_APPROVED,
                    audit::ENTITY_LOAN,
                    Some(loan.id),
                    format!("loan for {} approved in batch", loan.email),
                    json!({}),
                )?;
                processed += 1;
            }
            "reject" => {
                if loan.status() != LoanStatus::Pending {
                    skipped += 1;
                    continue;
                }
                let reason = payload
                    .reason
                    .as_deref()
                    .unwrap_or("batch rejection")
                    .trim()
                    .to_string();
                diesel::update(loans::table.find(loan.id))
                    .set((
                        loans::status.eq(LoanStatus::Rejected.as_str()),
                        loans::rejection_reason.eq(&reason),
                        loans::rejected_at.eq(now),
                        loans::updated_at.eq(now),
                    ))
                    .execute(&mut conn)?;
                let updated: Loan = loans::table.find(loan.id).first(&mut conn)?;
                notifications::notify_loan_event(
                    &mut conn,
                    &updated,
                    notifications::EVENT_LOAN_REJECTED,
                    json!({ "reason": reason }),
                )?;
                audit::record(
                    &mut conn,
                    Some(user.user_id),
                    audit::ACTION_LOAN_REJECTED,
                    audit::ENTITY_LOAN,
                    Some(loan.id),
                    format!("loan for {} rejected in batch", loan.email),
                    json!({}),
                )?;
                processed += 1;
            }
            "archive" => {
                if loan.status() == LoanStatus::Archived {
                    skipped += 1;
                    continue;
                }
                diesel::update(loans::table.find(loan.id))
                    .set((
                        loans::status.eq(LoanStatus::Archived.as_str()),
                        loans::archived_at.eq(now),
                        loans::updated_at.eq(now),
                    ))
                    .execute(&mut conn)?;
                audit::record(
                    &mut conn,
                    Some(user.user_id),
                    audit::ACTION_LOAN_ARCHIVED,
                    audit::ENTITY_LOAN,
                    Some(loan.id),
                    format!("loan of {} archived in batch", loan.email),
                    json!({}),
                )?;
                processed += 1;
            }
            other => {
                return Err(AppError::bad_request(format!(
                    "unknown batch action '{other}'"
                )))
            }
        }
    }

    info!(processed, skipped, action = %payload.action, "batch action completed");
    Ok(Json(BatchResponse { processed, skipped }))
}

#[derive(Serialize)]
pub struct QuickStats {
    pub pending: i64,
    pub under_review: i64,
    pub documents_requested: i64,
    pub approved_this_month: i64,
    pub rejected_this_month: i64,
}

pub async fn quick_stats(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<QuickStats>> {
    user.require_admin()?;
    let mut conn = state.db()?;

    let count_for = |conn: &mut PgConnection, status: LoanStatus| -> AppResult<i64> {
        let count = loans::table
            .filter(loans::status.eq(status.as_str()))
            .count()
            .first(conn)?;
        Ok(count)
    };

    let pending = count_for(&mut conn, LoanStatus::Pending)?;
    let under_review = count_for(&mut conn, LoanStatus::UnderReview)?;
    let documents_requested = count_for(&mut conn, LoanStatus::DocumentsRequested)?;

    let now = Utc::now().naive_utc();
    let month_start = now
        .date()
        .with_day(1)
        .unwrap_or(now.date())
        .and_hms_opt(0, 0, 0)
        .unwrap_or(now);

    let approved_this_month: i64 = loans::table
        .filter(loans::approved_at.ge(month_start))
        .count()
        .first(&mut conn)?;
    let rejected_this_month: i64 = loans::table
        .filter(loans::rejected_at.ge(month_start))
        .count()
        .first(&mut conn)?;

    Ok(Json(QuickStats {
        pending,
        under_review,
        documents_requested,
        approved_this_month,
        rejected_this_month,
    }))
}
