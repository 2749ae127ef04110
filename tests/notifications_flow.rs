mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::http::StatusCode;
use chrono::Utc;
use common::{acquire_db_lock, body_to_json, TestApp};
use diesel::prelude::*;
use loanpro::notifications as queue;
use loanpro::Dispatcher;
use serde_json::json;
use uuid::Uuid;

fn dispatcher(app: &TestApp) -> Dispatcher {
    Dispatcher::new(Arc::new(app.state.clone()), Duration::from_millis(10))
}

async fn drain(dispatcher: &Dispatcher) -> Result<()> {
    while dispatcher.tick().await? {}
    Ok(())
}

/// Pulls the next_attempt_at lease back so the row is immediately due again.
async fn rewind_backoff(app: &TestApp) -> Result<()> {
    app.with_conn(|conn| {
        use loanpro::schema::notifications;
        diesel::update(notifications::table)
            .set(notifications::next_attempt_at.eq(Utc::now().naive_utc()))
            .execute(conn)?;
        Ok(())
    })
    .await
}

async fn queue_email(app: &TestApp, recipient: &str) -> Result<Uuid> {
    let recipient = recipient.to_string();
    app.with_conn(move |conn| {
        let queued = queue::queue_direct(
            conn,
            queue::CHANNEL_EMAIL,
            queue::EVENT_ADMIN_ALERT,
            &recipient,
            None,
            "Subject",
            "Body",
        )?;
        Ok(queued.id)
    })
    .await
}

async fn notification_row(app: &TestApp, id: Uuid) -> Result<(String, i32, Option<String>)> {
    app.with_conn(move |conn| {
        use loanpro::schema::notifications;
        Ok(notifications::table
            .find(id)
            .select((
                notifications::status,
                notifications::attempts,
                notifications::last_error,
            ))
            .first(conn)?)
    })
    .await
}

#[tokio::test]
async fn dispatcher_settles_every_channel() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("client@example.com", "pass-word-1", "client").await?;
    let token = app.login_token("client@example.com", "pass-word-1").await?;
    let response = app
        .post_json(
            "/api/loans",
            &json!({ "amount": 10000.0, "duration_months": 24 }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    drain(&dispatcher(&app)).await?;

    let rows: Vec<(String, String)> = app
        .with_conn(|conn| {
            use loanpro::schema::notifications;
            Ok(notifications::table
                .select((notifications::channel, notifications::status))
                .order(notifications::channel.asc())
                .load(conn)?)
        })
        .await?;
    // Two emails: the applicant confirmation and the staff alert.
    assert_eq!(
        rows,
        vec![
            ("email".to_string(), "sent".to_string()),
            ("email".to_string(), "sent".to_string()),
            ("in_app".to_string(), "delivered".to_string()),
            ("sms".to_string(), "delivered".to_string()),
        ]
    );

    let gateway = app.gateway();
    let emails = gateway.emails.lock().await;
    assert_eq!(emails.len(), 2);
    let mut recipients: Vec<&str> = emails.iter().map(|mail| mail.to.as_str()).collect();
    recipients.sort();
    assert_eq!(recipients, vec!["admin@test", "client@example.com"]);
    let confirmation = emails
        .iter()
        .find(|mail| mail.to == "client@example.com")
        .expect("applicant confirmation email");
    assert!(confirmation.subject.contains("received"));
    drop(emails);

    let sms = gateway.sms.lock().await;
    assert_eq!(sms.len(), 1);
    assert_eq!(sms[0].to, "+33600000000");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn failed_sends_back_off_then_exhaust() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let id = queue_email(&app, "someone@example.com").await?;
    app.gateway().set_failing(true);
    let dispatcher = dispatcher(&app);

    // First failure stays pending with a recorded error.
    assert!(dispatcher.tick().await?);
    let (status, attempts, last_error) = notification_row(&app, id).await?;
    assert_eq!(status, "pending");
    assert_eq!(attempts, 1);
    assert_eq!(last_error.as_deref(), Some("gateway down"));

    // The backoff keeps the row out of reach until its next attempt is due.
    assert!(!dispatcher.tick().await?);

    rewind_backoff(&app).await?;
    assert!(dispatcher.tick().await?);
    rewind_backoff(&app).await?;
    assert!(dispatcher.tick().await?);

    let (status, attempts, _) = notification_row(&app, id).await?;
    assert_eq!(status, "failed");
    assert_eq!(attempts, 3);

    // Exhausted rows are never reserved again.
    rewind_backoff(&app).await?;
    assert!(!dispatcher.tick().await?);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn staff_retry_requeues_a_failed_notification() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("staff@example.com", "admin-pass-1", "admin").await?;
    let staff = app.login_token("staff@example.com", "admin-pass-1").await?;

    let id = queue_email(&app, "someone@example.com").await?;

    // Still pending: retry refuses.
    let response = app
        .post_empty(&format!("/api/admin/notifications/{id}/retry"), Some(&staff))
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    app.gateway().set_failing(true);
    let dispatcher = dispatcher(&app);
    for _ in 0..queue::MAX_ATTEMPTS {
        rewind_backoff(&app).await?;
        dispatcher.tick().await?;
    }
    let (status, _, _) = notification_row(&app, id).await?;
    assert_eq!(status, "failed");

    let response = app
        .post_empty(&format!("/api/admin/notifications/{id}/retry"), Some(&staff))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["status"], "pending");
    assert_eq!(body["attempts"], 0);

    // Gateway back up: the requeued row goes straight through.
    app.gateway().set_failing(false);
    assert!(dispatcher.tick().await?);
    let (status, attempts, last_error) = notification_row(&app, id).await?;
    assert_eq!(status, "sent");
    assert_eq!(attempts, 1);
    assert_eq!(last_error, None);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn in_app_feed_and_read_tracking() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("client@example.com", "pass-word-1", "client").await?;
    let token = app.login_token("client@example.com", "pass-word-1").await?;
    app.post_json(
        "/api/loans",
        &json!({ "amount": 10000.0, "duration_months": 24 }),
        Some(&token),
    )
    .await?;

    let response = app.get("/api/notifications", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    let feed = body.as_array().unwrap();
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0]["channel"], "in_app");
    assert_eq!(feed[0]["event"], "loan_submitted");
    assert_eq!(feed[0]["is_read"], false);
    let notification_id = feed[0]["id"].as_str().unwrap().to_string();

    let response = app.get("/api/notifications/unread", Some(&token)).await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["unread"], 1);

    let response = app
        .post_empty(&format!("/api/notifications/{notification_id}/read"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .get("/api/notifications?unread_only=true", Some(&token))
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert!(body.as_array().unwrap().is_empty());

    // Other users cannot mark it.
    app.insert_user("other@example.com", "pass-word-2", "client").await?;
    let other = app.login_token("other@example.com", "pass-word-2").await?;
    let response = app
        .post_empty(&format!("/api/notifications/{notification_id}/read"), Some(&other))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn bulk_communication_targets_active_clients() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("one@example.com", "pass-word-1", "client").await?;
    app.insert_user("two@example.com", "pass-word-2", "client").await?;
    app.insert_user("staff@example.com", "admin-pass-1", "admin").await?;
    let staff = app.login_token("staff@example.com", "admin-pass-1").await?;

    let response = app
        .post_json(
            "/api/admin/notifications/bulk",
            &json!({ "subject": "Maintenance window", "body": "Saturday 02:00 UTC", "in_app": true }),
            Some(&staff),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_to_json(response.into_body()).await?;
    // One email and one in-app row per client; staff are not targeted.
    assert_eq!(body["queued"], 4);

    drain(&dispatcher(&app)).await?;
    let emails = app.gateway();
    let emails = emails.emails.lock().await;
    let mut targets: Vec<String> = emails.iter().map(|mail| mail.to.clone()).collect();
    targets.sort();
    assert_eq!(targets, vec!["one@example.com", "two@example.com"]);
    drop(emails);

    let response = app
        .post_json(
            "/api/admin/notifications/bulk",
            &json!({ "subject": "x", "body": "" }),
            Some(&staff),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn admin_list_and_stats_reflect_the_queue() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("staff@example.com", "admin-pass-1", "admin").await?;
    let staff = app.login_token("staff@example.com", "admin-pass-1").await?;

    queue_email(&app, "a@example.com").await?;
    let failed_id = queue_email(&app, "b@example.com").await?;
    app.with_conn(move |conn| {
        use loanpro::schema::notifications;
        diesel::update(notifications::table.find(failed_id))
            .set((
                notifications::status.eq("failed"),
                notifications::attempts.eq(3),
            ))
            .execute(conn)?;
        Ok(())
    })
    .await?;

    let response = app
        .get("/api/admin/notifications?status=pending", Some(&staff))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["total"], 1);
    assert_eq!(body["notifications"][0]["recipient"], "a@example.com");

    let response = app.get("/api/admin/notifications/stats", Some(&staff)).await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["total"], 2);
    assert_eq!(body["by_status"]["pending"], 1);
    assert_eq!(body["by_status"]["failed"], 1);
    assert_eq!(body["by_channel"]["email"], 2);
    assert_eq!(body["failed_last_24h"], 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn purge_spares_pending_and_unread_in_app_rows() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let user_id = app
        .insert_user("client@example.com", "pass-word-1", "client")
        .await?;

    let (deleted, survivors, kept_unread, kept_pending) = app
        .with_conn(move |conn| {
            use loanpro::schema::notifications;

            let stale = Utc::now().naive_utc() - chrono::Duration::days(120);
            let mut seed = |channel: &str, status: &str, read: bool| -> Result<Uuid> {
                let queued = queue::queue_direct(
                    conn,
                    channel,
                    queue::EVENT_ADMIN_ALERT,
                    "client@example.com",
                    Some(user_id),
                    "Subject",
                    "Body",
                )?;
                diesel::update(notifications::table.find(queued.id))
                    .set((
                        notifications::status.eq(status),
                        notifications::is_read.eq(read),
                        notifications::created_at.eq(stale),
                    ))
                    .execute(conn)?;
                Ok(queued.id)
            };

            seed(queue::CHANNEL_EMAIL, queue::STATUS_SENT, false)?;
            seed(queue::CHANNEL_IN_APP, queue::STATUS_DELIVERED, true)?;
            let unread = seed(queue::CHANNEL_IN_APP, queue::STATUS_DELIVERED, false)?;
            let pending = seed(queue::CHANNEL_EMAIL, queue::STATUS_PENDING, false)?;

            let deleted = queue::delete_older_than(conn, 90)?;
            let survivors: Vec<Uuid> = notifications::table
                .select(notifications::id)
                .load(conn)?;
            Ok((deleted, survivors, unread, pending))
        })
        .await?;

    // The sent email and the read in-app row go; the unread in-app row and
    // the still-pending email stay.
    assert_eq!(deleted, 2);
    assert_eq!(survivors.len(), 2);
    assert!(survivors.contains(&kept_unread));
    assert!(survivors.contains(&kept_pending));

    app.cleanup().await?;
    Ok(())
}
