use axum::extract::{Json, Multipart, Path, State};
use axum::http::StatusCode;
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    audit,
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    loan::{
        self, document_checklist, loan_progress, repayment_schedule, DocumentChecklist,
        LoanProgress, LoanStatus,
    },
    media,
    models::{Loan, Media, NewLoan, NewLoanMedia, NewMedia},
    notifications,
    schema::{loan_media, loans, media as media_table},
    state::AppState,
};

#[derive(Serialize)]
pub struct LoanResponse {
    pub id: Uuid,
    pub status: String,
    pub amount: f64,
    pub interest_rate: f64,
    pub duration_months: i32,
    pub purpose: Option<String>,
    pub monthly_payment: Option<f64>,
    pub total_amount: Option<f64>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Loan> for LoanResponse {
    fn from(loan: &Loan) -> Self {
        Self {
            id: loan.id,
            status: loan.status.clone(),
            amount: loan::money_to_f64(&loan.amount),
            interest_rate: loan::money_to_f64(&loan.interest_rate),
            duration_months: loan.duration_months,
            purpose: loan.purpose.clone(),
            monthly_payment: loan.monthly_payment.as_ref().map(loan::money_to_f64),
            total_amount: loan.total_amount.as_ref().map(loan::money_to_f64),
            first_name: loan.first_name.clone(),
            last_name: loan.last_name.clone(),
            email: loan.email.clone(),
            phone: loan.phone.clone(),
            rejection_reason: loan.rejection_reason.clone(),
            created_at: loan.created_at.and_utc().to_rfc3339(),
            updated_at: loan.updated_at.and_utc().to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct MediaResponse {
    pub id: Uuid,
    pub original_name: String,
    pub media_type: String,
    pub mime_type: Option<String>,
    pub file_size: Option<i64>,
    pub status: String,
    pub description: Option<String>,
    pub uploaded_at: String,
}

impl From<&Media> for MediaResponse {
    fn from(media: &Media) -> Self {
        Self {
            id: media.id,
            original_name: media.original_name.clone(),
            media_type: media.media_type.clone(),
            mime_type: media.mime_type.clone(),
            file_size: media.file_size,
            status: media.status.clone(),
            description: media.description.clone(),
            uploaded_at: media.created_at.and_utc().to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct LoanDetailResponse {
    pub loan: LoanResponse,
    pub progress: LoanProgress,
    pub documents: Vec<MediaResponse>,
    pub checklist: DocumentChecklist,
}

#[derive(Deserialize)]
pub struct ApplyRequest {
    pub amount: f64,
    pub duration_months: i32,
    pub interest_rate: Option<f64>,
    pub purpose: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub profession: Option<String>,
    pub employer: Option<String>,
    pub monthly_income: Option<f64>,
    pub monthly_charges: Option<f64>,
}

const MIN_AMOUNT: f64 = 500.0;
const MAX_AMOUNT: f64 = 1_000_000.0;
const MIN_DURATION_MONTHS: i32 = 6;
const MAX_DURATION_MONTHS: i32 = 120;

fn validate_terms(amount: f64, duration_months: i32) -> AppResult<()> {
    if !(MIN_AMOUNT..=MAX_AMOUNT).contains(&amount) {
        return Err(AppError::bad_request(format!(
            "amount must be between {MIN_AMOUNT} and {MAX_AMOUNT}"
        )));
    }
    if !(MIN_DURATION_MONTHS..=MAX_DURATION_MONTHS).contains(&duration_months) {
        return Err(AppError::bad_request(format!(
            "duration must be between {MIN_DURATION_MONTHS} and {MAX_DURATION_MONTHS} months"
        )));
    }
    Ok(())
}

pub async fn list_own_loans(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<LoanResponse>>> {
    let mut conn = state.db()?;
    let rows: Vec<Loan> = loans::table
        .filter(loans::user_id.eq(user.user_id))
        .order(loans::created_at.desc())
        .load(&mut conn)?;

    Ok(Json(rows.iter().map(LoanResponse::from).collect()))
}

pub async fn apply(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<ApplyRequest>,
) -> AppResult<(StatusCode, Json<LoanResponse>)> {
    validate_terms(payload.amount, payload.duration_months)?;

    let mut conn = state.db()?;
    let account: crate::models::User = crate::schema::users::table
        .find(user.user_id)
        .first(&mut conn)?;

    let interest_rate = payload
        .interest_rate
        .unwrap_or(state.config.default_interest_rate);
    if !(0.0..=30.0).contains(&interest_rate) {
        return Err(AppError::bad_request("interest rate must be between 0 and 30"));
    }

    let new_loan = NewLoan {
        id: Uuid::new_v4(),
        user_id: Some(account.id),
        amount: loan::to_money(payload.amount),
        interest_rate: loan::to_money(interest_rate),
        duration_months: payload.duration_months,
        status: LoanStatus::Pending.as_str().to_string(),
        purpose: payload.purpose,
        first_name: payload.first_name.unwrap_or_else(|| account.first_name.clone()),
        last_name: payload.last_name.unwrap_or_else(|| account.last_name.clone()),
        email: account.email.clone(),
        phone: payload.phone.or_else(|| account.phone.clone()),
        address: payload.address,
        profession: payload.profession,
        employer: payload.employer,
        monthly_income: payload.monthly_income.map(loan::to_money),
        monthly_charges: payload.monthly_charges.map(loan::to_money),
    };

    diesel::insert_into(loans::table)
        .values(&new_loan)
        .execute(&mut conn)?;

    let mut inserted: Loan = loans::table.find(new_loan.id).first(&mut conn)?;

    // Repayment columns derive from the requested terms at submission time.
    let (monthly, total) = repayment_schedule(&inserted);
    diesel::update(loans::table.find(inserted.id))
        .set((
            loans::monthly_payment.eq(&monthly),
            loans::total_amount.eq(&total),
        ))
        .execute(&mut conn)?;
    inserted.monthly_payment = Some(monthly);
    inserted.total_amount = Some(total);

    notifications::notify_loan_event(
        &mut conn,
        &inserted,
        notifications::EVENT_LOAN_SUBMITTED,
        json!({}),
    )?;

    // Staff get a heads-up email for every new application.
    notifications::queue_direct(
        &mut conn,
        notifications::CHANNEL_EMAIL,
        notifications::EVENT_ADMIN_ALERT,
        &state.config.admin_alert_email,
        None,
        "[ADMIN ALERT] New loan application",
        &format!(
            "{} applied for {:.2} over {} months.",
            account.full_name(),
            payload.amount,
            payload.duration_months
        ),
    )?;

    audit::record(
        &mut conn,
        Some(account.id),
        audit::ACTION_LOAN_CREATED,
        audit::ENTITY_LOAN,
        Some(inserted.id),
        format!("loan application submitted by {}", account.email),
        json!({ "amount": payload.amount, "duration_months": payload.duration_months }),
    )?;

    info!(loan_id = %inserted.id, user_id = %account.id, "loan application submitted");
    Ok((StatusCode::CREATED, Json(LoanResponse::from(&inserted))))
}

fn load_owned_loan(
    conn: &mut diesel::PgConnection,
    loan_id: Uuid,
    user: &AuthenticatedUser,
) -> AppResult<Loan> {
    let loan: Loan = loans::table.find(loan_id).first(conn)?;
    if !user.is_admin() && loan.user_id != Some(user.user_id) {
        // Hide other clients' loans entirely.
        return Err(AppError::not_found());
    }
    Ok(loan)
}

pub fn loan_documents(
    conn: &mut diesel::PgConnection,
    loan_id: Uuid,
) -> AppResult<Vec<Media>> {
    let documents: Vec<Media> = loan_media::table
        .inner_join(media_table::table)
        .filter(loan_media::loan_id.eq(loan_id))
        .select(media_table::all_columns)
        .order(media_table::created_at.desc())
        .load(conn)?;
    Ok(documents)
}

pub async fn loan_detail(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(loan_id): Path<Uuid>,
) -> AppResult<Json<LoanDetailResponse>> {
    let mut conn = state.db()?;
    let loan = load_owned_loan(&mut conn, loan_id, &user)?;
    let documents = loan_documents(&mut conn, loan.id)?;

    Ok(Json(LoanDetailResponse {
        progress: loan_progress(loan.status()),
        checklist: document_checklist(&documents),
        documents: documents.iter().map(MediaResponse::from).collect(),
        loan: LoanResponse::from(&loan),
    }))
}

pub async fn loan_progress_view(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(loan_id): Path<Uuid>,
) -> AppResult<Json<LoanProgress>> {
    let mut conn = state.db()?;
    let loan = load_owned_loan(&mut conn, loan_id, &user)?;
    Ok(Json(loan_progress(loan.status())))
}

pub async fn list_documents(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(loan_id): Path<Uuid>,
) -> AppResult<Json<Vec<MediaResponse>>> {
    let mut conn = state.db()?;
    let loan = load_owned_loan(&mut conn, loan_id, &user)?;
    let documents = loan_documents(&mut conn, loan.id)?;
    Ok(Json(documents.iter().map(MediaResponse::from).collect()))
}

pub async fn upload_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(loan_id): Path<Uuid>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<MediaResponse>)> {
    let mut conn = state.db()?;
    let loan = load_owned_loan(&mut conn, loan_id, &user)?;
    if !loan.status().is_open() {
        return Err(AppError::conflict(format!(
            "cannot attach documents to a loan in status '{}'",
            loan.status
        )));
    }
    drop(conn);

    let mut file_bytes: Option<Vec<u8>> = None;
    let mut original_name: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut media_type: Option<String> = None;
    let mut description: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        let msg = format!("invalid multipart data: {err}");
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(msg)
    })? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                original_name = field.file_name().map(|n| n.to_string());
                content_type = field.content_type().map(|mime| mime.to_string());
                let data = field.bytes().await.map_err(|err| {
                    let msg = format!("failed to read file bytes: {err}");
                    error!(error = %err, "failed to read file bytes");
                    AppError::bad_request(msg)
                })?;
                file_bytes = Some(data.to_vec());
            }
            Some("media_type") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(format!("invalid media_type: {err}")))?;
                media_type = Some(value.trim().to_string());
            }
            Some("description") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(format!("invalid description: {err}")))?;
                if !value.trim().is_empty() {
                    description = Some(value.trim().to_string());
                }
            }
            _ => {}
        }
    }

    let file_bytes = file_bytes.ok_or_else(|| AppError::bad_request("file field is required"))?;
    if file_bytes.is_empty() {
        return Err(AppError::bad_request("file field must not be empty"));
    }
    if file_bytes.len() > media::MAX_UPLOAD_BYTES {
        return Err(AppError::bad_request("file exceeds the 10 MiB upload limit"));
    }
    let original_name =
        original_name.ok_or_else(|| AppError::bad_request("filename is required"))?;
    let media_type = media_type.ok_or_else(|| AppError::bad_request("media_type is required"))?;

    if !media::is_allowed_type(&media_type) {
        return Err(AppError::bad_request(format!(
            "unknown document type '{media_type}'"
        )));
    }
    if let Some(mime) = content_type.as_deref() {
        if !media::is_allowed_mime(mime) {
            return Err(AppError::bad_request(format!(
                "unsupported file format '{mime}'"
            )));
        }
    }

    let media_id = Uuid::new_v4();
    let file_name = media::sanitize_file_name(&original_name);
    let storage_key = media::storage_key(media_id, &file_name);

    state
        .storage
        .put_object(&storage_key, file_bytes.clone(), content_type.clone())
        .await
        .map_err(AppError::internal)?;

    let mut conn = state.db()?;
    let new_media = NewMedia {
        id: media_id,
        file_name,
        original_name: original_name.clone(),
        media_type: media_type.clone(),
        mime_type: content_type,
        file_size: Some(file_bytes.len() as i64),
        storage_key,
        status: media::STATUS_PENDING.to_string(),
        description,
    };

    let inserted: Media = conn.transaction::<_, AppError, _>(|conn| {
        diesel::insert_into(media_table::table)
            .values(&new_media)
            .execute(conn)?;
        diesel::insert_into(loan_media::table)
            .values(&NewLoanMedia {
                loan_id: loan.id,
                media_id,
            })
            .execute(conn)?;

        // A dossier answering a document request goes back into the review
        // queue once something new arrives.
        if loan.status() == LoanStatus::DocumentsRequested {
            diesel::update(loans::table.find(loan.id))
                .set((
                    loans::status.eq(LoanStatus::Pending.as_str()),
                    loans::updated_at.eq(Utc::now().naive_utc()),
                ))
                .execute(conn)?;
        }

        audit::record(
            conn,
            Some(user.user_id),
            audit::ACTION_MEDIA_UPLOADED,
            audit::ENTITY_MEDIA,
            Some(media_id),
            format!("document '{original_name}' uploaded for loan {}", loan.id),
            json!({ "loan_id": loan.id, "media_type": media_type }),
        )?;

        let inserted = media_table::table.find(media_id).first(conn)?;
        Ok(inserted)
    })?;

    if loan.status() == LoanStatus::DocumentsRequested {
        notifications::notify_loan_event(
            &mut conn,
            &loan,
            notifications::EVENT_DOCUMENTS_RECEIVED,
            json!({}),
        )?;
    }

    info!(
        media_id = %inserted.id,
        loan_id = %loan.id,
        media_type = %inserted.media_type,
        "document uploaded"
    );
    Ok((StatusCode::CREATED, Json(MediaResponse::from(&inserted))))
}

#[derive(Deserialize)]
pub struct SimulateRequest {
    pub amount: f64,
    pub duration_months: i32,
    pub interest_rate: Option<f64>,
}

#[derive(Serialize)]
pub struct SimulateResponse {
    pub amount: f64,
    pub duration_months: i32,
    pub interest_rate: f64,
    pub monthly_payment: f64,
    pub total_repayment: f64,
    pub total_interest: f64,
}

/// Public calculator behind the landing page; no account required.
pub async fn simulate(
    State(state): State<AppState>,
    Json(query): Json<SimulateRequest>,
) -> AppResult<Json<SimulateResponse>> {
    validate_terms(query.amount, query.duration_months)?;
    let interest_rate = query
        .interest_rate
        .unwrap_or(state.config.default_interest_rate);
    if !(0.0..=30.0).contains(&interest_rate) {
        return Err(AppError::bad_request("interest rate must be between 0 and 30"));
    }

    let monthly = loan::monthly_payment(query.amount, interest_rate, query.duration_months);
    let total = loan::total_repayment(query.amount, interest_rate, query.duration_months);

    let round2 = |value: f64| (value * 100.0).round() / 100.0;
    Ok(Json(SimulateResponse {
        amount: query.amount,
        duration_months: query.duration_months,
        interest_rate,
        monthly_payment: round2(monthly),
        total_repayment: round2(total),
        total_interest: round2(total - query.amount),
    }))
}
