use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = loans)]
#[diesel(belongs_to(User))]
pub struct Loan {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub interest_rate: BigDecimal,
    pub duration_months: i32,
    pub status: String,
    pub purpose: Option<String>,
    pub monthly_payment: Option<BigDecimal>,
    pub total_amount: Option<BigDecimal>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub profession: Option<String>,
    pub employer: Option<String>,
    pub monthly_income: Option<BigDecimal>,
    pub monthly_charges: Option<BigDecimal>,
    pub rejection_reason: Option<String>,
    pub admin_comments: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub approved_at: Option<NaiveDateTime>,
    pub rejected_at: Option<NaiveDateTime>,
    pub archived_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = loans)]
pub struct NewLoan {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub interest_rate: BigDecimal,
    pub duration_months: i32,
    pub status: String,
    pub purpose: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub profession: Option<String>,
    pub employer: Option<String>,
    pub monthly_income: Option<BigDecimal>,
    pub monthly_charges: Option<BigDecimal>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = media)]
pub struct Media {
    pub id: Uuid,
    pub file_name: String,
    pub original_name: String,
    pub media_type: String,
    pub mime_type: Option<String>,
    pub file_size: Option<i64>,
    pub storage_key: String,
    pub status: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = media)]
pub struct NewMedia {
    pub id: Uuid,
    pub file_name: String,
    pub original_name: String,
    pub media_type: String,
    pub mime_type: Option<String>,
    pub file_size: Option<i64>,
    pub storage_key: String,
    pub status: String,
    pub description: Option<String>,
}

#[allow(dead_code)]
#[derive(Debug, Clone, Queryable, Associations)]
#[diesel(table_name = loan_media)]
#[diesel(belongs_to(Loan))]
#[diesel(belongs_to(Media))]
#[diesel(primary_key(loan_id, media_id))]
pub struct LoanMedia {
    pub loan_id: Uuid,
    pub media_id: Uuid,
    pub attached_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = loan_media)]
pub struct NewLoanMedia {
    pub loan_id: Uuid,
    pub media_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = notifications)]
#[diesel(belongs_to(Loan))]
#[diesel(belongs_to(User))]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub loan_id: Option<Uuid>,
    pub channel: String,
    pub event: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub status: String,
    pub attempts: i32,
    pub next_attempt_at: NaiveDateTime,
    pub last_error: Option<String>,
    pub is_read: bool,
    pub read_at: Option<NaiveDateTime>,
    pub metadata: serde_json::Value,
    pub sent_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub loan_id: Option<Uuid>,
    pub channel: String,
    pub event: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub status: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = messages)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub subject: String,
    pub content: String,
    pub is_read: bool,
    pub read_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub subject: String,
    pub content: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = password_reset_tokens)]
#[diesel(belongs_to(User))]
pub struct PasswordResetToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: NaiveDateTime,
    pub used_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = password_reset_tokens)]
pub struct NewPasswordResetToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_tokens)]
#[diesel(belongs_to(User))]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = audit_logs)]
pub struct AuditLog {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub action: String,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = audit_logs)]
pub struct NewAuditLog {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub action: String,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
}
