use std::collections::HashMap;

use chrono::{Duration as ChronoDuration, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::loan::money_to_f64;
use crate::models::{Loan, NewNotification, Notification};
use crate::schema::notifications;

pub const CHANNEL_EMAIL: &str = "email";
pub const CHANNEL_SMS: &str = "sms";
pub const CHANNEL_IN_APP: &str = "in_app";

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_SENT: &str = "sent";
pub const STATUS_DELIVERED: &str = "delivered";
pub const STATUS_FAILED: &str = "failed";

pub const EVENT_LOAN_SUBMITTED: &str = "loan_submitted";
pub const EVENT_LOAN_APPROVED: &str = "loan_approved";
pub const EVENT_LOAN_REJECTED: &str = "loan_rejected";
pub const EVENT_DOCUMENTS_REQUESTED: &str = "documents_requested";
pub const EVENT_DOCUMENTS_RECEIVED: &str = "documents_received";
pub const EVENT_CONTRACT_READY: &str = "contract_ready";
pub const EVENT_PAYMENT_REMINDER: &str = "payment_reminder";
pub const EVENT_BULK_COMMUNICATION: &str = "bulk_communication";
pub const EVENT_ADMIN_ALERT: &str = "admin_alert";

pub const MAX_ATTEMPTS: i32 = 3;
const RETRY_BACKOFF_SECONDS: i64 = 60;
/// How long a reserved notification stays invisible to other dispatchers.
const RESERVE_LEASE_SECONDS: i64 = 120;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("no {channel} template for event '{event}'")]
    UnknownTemplate { event: String, channel: String },
}

pub type NotificationResult<T> = Result<T, NotificationError>;

fn email_template(event: &str) -> Option<(&'static str, &'static str)> {
    match event {
        EVENT_LOAN_SUBMITTED => Some((
            "Your loan application has been received",
            "<h2>Application received</h2>\
             <p>Hello {first_name} {last_name},</p>\
             <p>We have received your application for a loan of {amount} over \
             {duration} months (reference {loan_id}). Our team will review it \
             shortly.</p>\
             <p>Best regards,<br>The LoanPro team</p>",
        )),
        EVENT_LOAN_APPROVED => Some((
            "Congratulations! Your loan has been approved",
            "<h2>Loan approved</h2>\
             <p>Hello {first_name} {last_name},</p>\
             <p>Your loan of {amount} has been approved. Your monthly payment \
             will be {monthly_payment} over {duration} months.</p>\
             <p>Best regards,<br>The LoanPro team</p>",
        )),
        EVENT_LOAN_REJECTED => Some((
            "An update on your loan application",
            "<h2>Application update</h2>\
             <p>Hello {first_name} {last_name},</p>\
             <p>After review we are unable to approve your application \
             {loan_id} at this time. Check your client area for details.</p>\
             <p>Best regards,<br>The LoanPro team</p>",
        )),
        EVENT_DOCUMENTS_REQUESTED => Some((
            "Additional documents required",
            "<h2>Documents required</h2>\
             <p>Hello {first_name} {last_name},</p>\
             <p>We need additional documents to continue processing your \
             application {loan_id}. Please upload them from your client \
             area.</p>\
             <p>Best regards,<br>The LoanPro team</p>",
        )),
        EVENT_DOCUMENTS_RECEIVED => Some((
            "Documents received - application under review",
            "<h2>Documents received</h2>\
             <p>Hello {first_name} {last_name},</p>\
             <p>Your documents for application {loan_id} were received and \
             are being processed.</p>\
             <p>Best regards,<br>The LoanPro team</p>",
        )),
        EVENT_CONTRACT_READY => Some((
            "Your loan contract is ready",
            "<h2>Contract ready</h2>\
             <p>Hello {first_name} {last_name},</p>\
             <p>Your contract for loan {loan_id} is ready for signature in \
             your client area.</p>\
             <p>Best regards,<br>The LoanPro team</p>",
        )),
        _ => None,
    }
}

fn sms_template(event: &str) -> Option<&'static str> {
    match event {
        EVENT_LOAN_SUBMITTED => {
            Some("LoanPro: your loan application has been received. Reference: {loan_id}")
        }
        EVENT_LOAN_APPROVED => Some(
            "LoanPro: congratulations! Your loan of {amount} has been approved. See your client area.",
        ),
        EVENT_LOAN_REJECTED => {
            Some("LoanPro: your loan application needs review. See your client area.")
        }
        EVENT_DOCUMENTS_REQUESTED => {
            Some("LoanPro: documents required for application {loan_id}. See your client area.")
        }
        EVENT_DOCUMENTS_RECEIVED => {
            Some("LoanPro: documents received for application {loan_id}.")
        }
        EVENT_PAYMENT_REMINDER => {
            Some("LoanPro: payment reminder for loan {loan_id} - {amount} due on {due_date}")
        }
        _ => None,
    }
}

fn in_app_template(event: &str) -> Option<(&'static str, &'static str)> {
    match event {
        EVENT_LOAN_SUBMITTED => Some((
            "Application received",
            "Your loan application {loan_id} has been received.",
        )),
        EVENT_LOAN_APPROVED => Some((
            "Loan approved",
            "Your loan of {amount} has been approved. Monthly payment: {monthly_payment}.",
        )),
        EVENT_LOAN_REJECTED => Some((
            "Application update",
            "Your application {loan_id} could not be approved.",
        )),
        EVENT_DOCUMENTS_REQUESTED => Some((
            "Documents required",
            "Additional documents are required for application {loan_id}.",
        )),
        EVENT_DOCUMENTS_RECEIVED => Some((
            "Documents received",
            "Your documents for application {loan_id} are being processed.",
        )),
        EVENT_CONTRACT_READY => Some((
            "Contract ready",
            "Your contract for loan {loan_id} is ready for signature.",
        )),
        _ => None,
    }
}

/// `{placeholder}` substitution over a rendered template.
fn render(template: &str, placeholders: &HashMap<String, String>) -> String {
    let mut rendered = template.to_string();
    for (key, value) in placeholders {
        rendered = rendered.replace(&format!("{{{key}}}"), value);
    }
    rendered
}

fn loan_placeholders(loan: &Loan, metadata: &Value) -> HashMap<String, String> {
    let mut placeholders = HashMap::new();
    placeholders.insert("loan_id".into(), loan.id.to_string());
    placeholders.insert("first_name".into(), loan.first_name.clone());
    placeholders.insert("last_name".into(), loan.last_name.clone());
    placeholders.insert(
        "amount".into(),
        format!("{:.2}", money_to_f64(&loan.amount)),
    );
    placeholders.insert("duration".into(), loan.duration_months.to_string());
    placeholders.insert(
        "monthly_payment".into(),
        loan.monthly_payment
            .as_ref()
            .map(|payment| format!("{:.2}", money_to_f64(payment)))
            .unwrap_or_else(|| "-".into()),
    );
    placeholders.insert("status".into(), loan.status.clone());
    placeholders.insert(
        "created_at".into(),
        loan.created_at.format("%d/%m/%Y").to_string(),
    );

    if let Value::Object(map) = metadata {
        for (key, value) in map {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            placeholders.insert(key.clone(), rendered);
        }
    }

    placeholders
}

fn build_for_channel(
    loan: &Loan,
    channel: &str,
    event: &str,
    recipient: &str,
    metadata: &Value,
) -> NotificationResult<NewNotification> {
    let placeholders = loan_placeholders(loan, metadata);

    let (subject, body) = match channel {
        CHANNEL_EMAIL => {
            let (subject, body) =
                email_template(event).ok_or_else(|| NotificationError::UnknownTemplate {
                    event: event.to_string(),
                    channel: channel.to_string(),
                })?;
            (subject.to_string(), render(body, &placeholders))
        }
        CHANNEL_SMS => {
            let body = sms_template(event).ok_or_else(|| NotificationError::UnknownTemplate {
                event: event.to_string(),
                channel: channel.to_string(),
            })?;
            // SMS carries no separate subject; the event tag fills the slot.
            (event.to_string(), render(body, &placeholders))
        }
        CHANNEL_IN_APP => {
            let (subject, body) =
                in_app_template(event).ok_or_else(|| NotificationError::UnknownTemplate {
                    event: event.to_string(),
                    channel: channel.to_string(),
                })?;
            (subject.to_string(), render(body, &placeholders))
        }
        _ => {
            return Err(NotificationError::UnknownTemplate {
                event: event.to_string(),
                channel: channel.to_string(),
            })
        }
    };

    Ok(NewNotification {
        id: Uuid::new_v4(),
        user_id: loan.user_id,
        loan_id: Some(loan.id),
        channel: channel.to_string(),
        event: event.to_string(),
        recipient: recipient.to_string(),
        subject,
        body,
        status: STATUS_PENDING.to_string(),
        metadata: metadata.clone(),
    })
}

/// Queues the notifications a loan lifecycle event fans out to: an email to
/// the applicant, an SMS when a phone number is on file, and an in-app entry
/// when the loan belongs to a registered user.
pub fn notify_loan_event(
    conn: &mut PgConnection,
    loan: &Loan,
    event: &str,
    metadata: Value,
) -> NotificationResult<Vec<Notification>> {
    let mut queued = Vec::new();

    queued.push(build_for_channel(
        loan,
        CHANNEL_EMAIL,
        event,
        &loan.email,
        &metadata,
    )?);

    if let Some(phone) = loan.phone.as_deref().filter(|p| !p.trim().is_empty()) {
        if sms_template(event).is_some() {
            queued.push(build_for_channel(loan, CHANNEL_SMS, event, phone, &metadata)?);
        }
    }

    if loan.user_id.is_some() {
        queued.push(build_for_channel(
            loan,
            CHANNEL_IN_APP,
            event,
            &loan.email,
            &metadata,
        )?);
    }

    diesel::insert_into(notifications::table)
        .values(&queued)
        .execute(conn)?;

    let ids: Vec<Uuid> = queued.iter().map(|n| n.id).collect();
    let inserted = notifications::table
        .filter(notifications::id.eq_any(ids))
        .load(conn)?;
    Ok(inserted)
}

/// Staff-originated sends (bulk communications, admin alerts) carry their
/// subject and body verbatim.
pub fn queue_direct(
    conn: &mut PgConnection,
    channel: &str,
    event: &str,
    recipient: &str,
    user_id: Option<Uuid>,
    subject: &str,
    body: &str,
) -> NotificationResult<Notification> {
    let new_notification = NewNotification {
        id: Uuid::new_v4(),
        user_id,
        loan_id: None,
        channel: channel.to_string(),
        event: event.to_string(),
        recipient: recipient.to_string(),
        subject: subject.to_string(),
        body: body.to_string(),
        status: STATUS_PENDING.to_string(),
        metadata: Value::Object(Default::default()),
    };

    diesel::insert_into(notifications::table)
        .values(&new_notification)
        .execute(conn)?;

    let inserted = notifications::table.find(new_notification.id).first(conn)?;
    Ok(inserted)
}

/// Reserves the next due pending notification. The row keeps its `pending`
/// status but its attempt counter is bumped and `next_attempt_at` is pushed
/// out as a lease, so concurrent dispatchers skip it.
pub fn reserve_pending(conn: &mut PgConnection) -> NotificationResult<Option<Notification>> {
    let now = Utc::now().naive_utc();
    let lease_until = now + ChronoDuration::seconds(RESERVE_LEASE_SECONDS);

    conn.transaction(|conn| {
        let candidate = notifications::table
            .filter(notifications::status.eq(STATUS_PENDING))
            .filter(notifications::next_attempt_at.le(now))
            .order(notifications::next_attempt_at.asc())
            .for_update()
            .skip_locked()
            .first::<Notification>(conn)
            .optional()?;

        if let Some(notification) = candidate {
            diesel::update(notifications::table.find(notification.id))
                .set((
                    notifications::attempts.eq(notification.attempts + 1),
                    notifications::next_attempt_at.eq(lease_until),
                    notifications::updated_at.eq(now),
                ))
                .execute(conn)?;

            let refreshed = notifications::table.find(notification.id).first(conn)?;
            Ok::<Option<Notification>, diesel::result::Error>(Some(refreshed))
        } else {
            Ok::<Option<Notification>, diesel::result::Error>(None)
        }
    })
    .map_err(NotificationError::from)
}

pub fn mark_sent(conn: &mut PgConnection, id: Uuid) -> NotificationResult<()> {
    let now = Utc::now().naive_utc();
    diesel::update(notifications::table.find(id))
        .set((
            notifications::status.eq(STATUS_SENT),
            notifications::sent_at.eq(now),
            notifications::last_error.eq::<Option<String>>(None),
            notifications::updated_at.eq(now),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn mark_delivered(conn: &mut PgConnection, id: Uuid) -> NotificationResult<()> {
    let now = Utc::now().naive_utc();
    diesel::update(notifications::table.find(id))
        .set((
            notifications::status.eq(STATUS_DELIVERED),
            notifications::sent_at.eq(now),
            notifications::last_error.eq::<Option<String>>(None),
            notifications::updated_at.eq(now),
        ))
        .execute(conn)?;
    Ok(())
}

/// Records a failed delivery attempt: requeues with backoff while attempts
/// remain, otherwise parks the notification as failed.
pub fn record_failure(
    conn: &mut PgConnection,
    notification: &Notification,
    error_message: &str,
) -> NotificationResult<()> {
    let now = Utc::now().naive_utc();

    if notification.attempts >= MAX_ATTEMPTS {
        diesel::update(notifications::table.find(notification.id))
            .set((
                notifications::status.eq(STATUS_FAILED),
                notifications::last_error.eq(Some(error_message.to_string())),
                notifications::updated_at.eq(now),
            ))
            .execute(conn)?;
    } else {
        let backoff = ChronoDuration::seconds(RETRY_BACKOFF_SECONDS * notification.attempts as i64);
        diesel::update(notifications::table.find(notification.id))
            .set((
                notifications::status.eq(STATUS_PENDING),
                notifications::next_attempt_at.eq(now + backoff),
                notifications::last_error.eq(Some(error_message.to_string())),
                notifications::updated_at.eq(now),
            ))
            .execute(conn)?;
    }

    Ok(())
}

/// Admin retry button: put a failed notification back in the queue with a
/// fresh attempt budget.
pub fn reset_for_retry(conn: &mut PgConnection, id: Uuid) -> NotificationResult<Notification> {
    let now = Utc::now().naive_utc();
    diesel::update(notifications::table.find(id))
        .set((
            notifications::status.eq(STATUS_PENDING),
            notifications::attempts.eq(0),
            notifications::next_attempt_at.eq(now),
            notifications::updated_at.eq(now),
        ))
        .execute(conn)?;

    let refreshed = notifications::table.find(id).first(conn)?;
    Ok(refreshed)
}

/// Drops read in-app entries and terminal email/SMS records older than the
/// cutoff. Returns how many rows went away.
pub fn delete_older_than(conn: &mut PgConnection, days: i64) -> NotificationResult<usize> {
    let cutoff = Utc::now().naive_utc() - ChronoDuration::days(days);
    let deleted = diesel::delete(
        notifications::table
            .filter(notifications::created_at.lt(cutoff))
            .filter(notifications::status.ne(STATUS_PENDING))
            // Unread in-app rows stay until the user has seen them.
            .filter(
                notifications::channel
                    .ne(CHANNEL_IN_APP)
                    .or(notifications::is_read.eq(true)),
            ),
    )
    .execute(conn)?;
    Ok(deleted)
}
