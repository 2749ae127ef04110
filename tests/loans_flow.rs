mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_json, TestApp};
use diesel::prelude::*;
use serde_json::json;
use uuid::Uuid;

async fn submit_loan(app: &TestApp, token: &str, amount: f64) -> Result<Uuid> {
    let response = app
        .post_json(
            "/api/loans",
            &json!({
                "amount": amount,
                "duration_months": 24,
                "purpose": "car",
            }),
            Some(token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_json(response.into_body()).await?;
    Ok(Uuid::parse_str(body["id"].as_str().unwrap())?)
}

async fn upload_required_documents(app: &TestApp, token: &str, loan_id: Uuid) -> Result<()> {
    for media_type in ["identity", "income_proof", "residence_proof", "bank_statement"] {
        let response = app
            .upload_document(
                &format!("/api/loans/{loan_id}/documents"),
                &format!("{media_type}.pdf"),
                "application/pdf",
                b"%PDF-1.4 fake",
                media_type,
                token,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
    }
    Ok(())
}

#[tokio::test]
async fn simulate_is_public_and_computes_annuity() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let response = app
        .post_json(
            "/api/loans/simulate",
            &json!({ "amount": 10000.0, "duration_months": 24, "interest_rate": 5.0 }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;

    let monthly = body["monthly_payment"].as_f64().unwrap();
    assert!((monthly - 438.71).abs() < 0.02, "monthly was {monthly}");
    let total = body["total_repayment"].as_f64().unwrap();
    assert!((total - monthly * 24.0).abs() < 0.5);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn simulate_rejects_out_of_range_terms() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let response = app
        .post_json(
            "/api/loans/simulate",
            &json!({ "amount": 100.0, "duration_months": 24 }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/api/loans/simulate",
            &json!({ "amount": 10000.0, "duration_months": 240 }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn applying_queues_submission_notifications() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("applicant@example.com", "pass-word-1", "client")
        .await?;
    let token = app.login_token("applicant@example.com", "pass-word-1").await?;

    let loan_id = submit_loan(&app, &token, 15000.0).await?;

    // Email + SMS (phone on file) + in-app.
    let channels: Vec<String> = app
        .with_conn(move |conn| {
            use loanpro::schema::notifications;
            Ok(notifications::table
                .filter(notifications::loan_id.eq(loan_id))
                .select(notifications::channel)
                .order(notifications::channel.asc())
                .load(conn)?)
        })
        .await?;
    assert_eq!(channels, vec!["email", "in_app", "sms"]);

    // Plus a staff alert to the configured admin address.
    let alerts: Vec<String> = app
        .with_conn(|conn| {
            use loanpro::schema::notifications;
            Ok(notifications::table
                .filter(notifications::recipient.eq("admin@test"))
                .select(notifications::subject)
                .load(conn)?)
        })
        .await?;
    assert_eq!(alerts, vec!["[ADMIN ALERT] New loan application"]);

    let response = app.get(&format!("/api/loans/{loan_id}"), Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["loan"]["status"], "pending");
    assert!(body["loan"]["monthly_payment"].as_f64().unwrap() > 0.0);
    assert_eq!(body["checklist"]["completion_percentage"], 0);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn clients_cannot_see_each_others_loans() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("one@example.com", "pass-word-1", "client").await?;
    app.insert_user("two@example.com", "pass-word-2", "client").await?;
    let token_one = app.login_token("one@example.com", "pass-word-1").await?;
    let token_two = app.login_token("two@example.com", "pass-word-2").await?;

    let loan_id = submit_loan(&app, &token_one, 8000.0).await?;

    let response = app
        .get(&format!("/api/loans/{loan_id}"), Some(&token_two))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn approval_requires_complete_document_checklist() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("client@example.com", "pass-word-1", "client").await?;
    app.insert_user("staff@example.com", "admin-pass-1", "admin").await?;
    let client = app.login_token("client@example.com", "pass-word-1").await?;
    let staff = app.login_token("staff@example.com", "admin-pass-1").await?;

    let loan_id = submit_loan(&app, &client, 12000.0).await?;

    // No documents yet: approval is refused.
    let response = app
        .post_json(
            &format!("/api/admin/loans/{loan_id}/approve"),
            &json!({}),
            Some(&staff),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    upload_required_documents(&app, &client, loan_id).await?;

    let response = app
        .post_json(
            &format!("/api/admin/loans/{loan_id}/approve"),
            &json!({}),
            Some(&staff),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["status"], "approved");

    // Approving again is an invalid transition.
    let response = app
        .post_json(
            &format!("/api/admin/loans/{loan_id}/approve"),
            &json!({}),
            Some(&staff),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn rejection_requires_reason_and_notifies() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("client@example.com", "pass-word-1", "client").await?;
    app.insert_user("staff@example.com", "admin-pass-1", "admin").await?;
    let client = app.login_token("client@example.com", "pass-word-1").await?;
    let staff = app.login_token("staff@example.com", "admin-pass-1").await?;

    let loan_id = submit_loan(&app, &client, 20000.0).await?;

    let response = app
        .post_json(
            &format!("/api/admin/loans/{loan_id}/reject"),
            &json!({ "reason": "" }),
            Some(&staff),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            &format!("/api/admin/loans/{loan_id}/reject"),
            &json!({ "reason": "insufficient income" }),
            Some(&staff),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let rejected_events: i64 = app
        .with_conn(|conn| {
            use loanpro::schema::notifications::dsl::*;
            Ok(notifications
                .filter(event.eq("loan_rejected"))
                .count()
                .first(conn)?)
        })
        .await?;
    assert!(rejected_events >= 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn document_request_roundtrip_returns_loan_to_pending() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("client@example.com", "pass-word-1", "client").await?;
    app.insert_user("staff@example.com", "admin-pass-1", "admin").await?;
    let client = app.login_token("client@example.com", "pass-word-1").await?;
    let staff = app.login_token("staff@example.com", "admin-pass-1").await?;

    let loan_id = submit_loan(&app, &client, 9000.0).await?;

    let response = app
        .post_json(
            &format!("/api/admin/loans/{loan_id}/request-documents"),
            &json!({ "document_types": ["identity"] }),
            Some(&staff),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["status"], "documents_requested");

    // Progress reflects the detour.
    let response = app
        .get(&format!("/api/loans/{loan_id}/progress"), Some(&client))
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["current_step"], 2);

    // Uploading a document moves the dossier back into the review queue.
    let response = app
        .upload_document(
            &format!("/api/loans/{loan_id}/documents"),
            "id.pdf",
            "application/pdf",
            b"%PDF-1.4 fake",
            "identity",
            &client,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app.get(&format!("/api/loans/{loan_id}"), Some(&client)).await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["loan"]["status"], "pending");

    let received_events: i64 = app
        .with_conn(|conn| {
            use loanpro::schema::notifications::dsl::*;
            Ok(notifications
                .filter(event.eq("documents_received"))
                .count()
                .first(conn)?)
        })
        .await?;
    assert!(received_events >= 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn batch_only_moves_pending_loans() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("client@example.com", "pass-word-1", "client").await?;
    app.insert_user("staff@example.com", "admin-pass-1", "admin").await?;
    let client = app.login_token("client@example.com", "pass-word-1").await?;
    let staff = app.login_token("staff@example.com", "admin-pass-1").await?;

    let first = submit_loan(&app, &client, 5000.0).await?;
    let second = submit_loan(&app, &client, 6000.0).await?;

    // Push the second loan out of pending first.
    let response = app
        .post_json(
            &format!("/api/admin/loans/{second}/reject"),
            &json!({ "reason": "test" }),
            Some(&staff),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post_json(
            "/api/admin/loans/batch",
            &json!({ "action": "reject", "loan_ids": [first, second], "reason": "batch" }),
            Some(&staff),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["processed"], 1);
    assert_eq!(body["skipped"], 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn batch_approve_skips_incomplete_dossiers() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("client@example.com", "pass-word-1", "client").await?;
    app.insert_user("staff@example.com", "admin-pass-1", "admin").await?;
    let client = app.login_token("client@example.com", "pass-word-1").await?;
    let staff = app.login_token("staff@example.com", "admin-pass-1").await?;

    let complete = submit_loan(&app, &client, 5000.0).await?;
    let incomplete = submit_loan(&app, &client, 6000.0).await?;
    upload_required_documents(&app, &client, complete).await?;

    let response = app
        .post_json(
            "/api/admin/loans/batch",
            &json!({ "action": "approve", "loan_ids": [complete, incomplete] }),
            Some(&staff),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["processed"], 1);
    assert_eq!(body["skipped"], 1);

    // The incomplete dossier is untouched, not approved.
    let response = app
        .get(&format!("/api/loans/{incomplete}"), Some(&client))
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["loan"]["status"], "pending");

    let response = app
        .get(&format!("/api/loans/{complete}"), Some(&client))
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["loan"]["status"], "approved");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn admin_list_filters_by_status_and_search() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("client@example.com", "pass-word-1", "client").await?;
    app.insert_user("staff@example.com", "admin-pass-1", "admin").await?;
    let client = app.login_token("client@example.com", "pass-word-1").await?;
    let staff = app.login_token("staff@example.com", "admin-pass-1").await?;

    submit_loan(&app, &client, 5000.0).await?;
    submit_loan(&app, &client, 7000.0).await?;

    let response = app
        .get("/api/admin/loans?status=pending", Some(&staff))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["total"], 2);

    let response = app
        .get("/api/admin/loans?search=client%40example", Some(&staff))
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["total"], 2);

    let response = app
        .get("/api/admin/loans?search=nomatch", Some(&staff))
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["total"], 0);

    let response = app.get("/api/admin/loans?status=bogus", Some(&staff)).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn admin_detail_reports_risk_and_missing_documents() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("client@example.com", "pass-word-1", "client").await?;
    app.insert_user("staff@example.com", "admin-pass-1", "admin").await?;
    let client = app.login_token("client@example.com", "pass-word-1").await?;
    let staff = app.login_token("staff@example.com", "admin-pass-1").await?;

    // Large amount + long duration lands in medium risk immediately.
    let response = app
        .post_json(
            "/api/loans",
            &json!({ "amount": 60000.0, "duration_months": 96 }),
            Some(&client),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_json(response.into_body()).await?;
    let loan_id = body["id"].as_str().unwrap().to_string();

    let response = app
        .get(&format!("/api/admin/loans/{loan_id}"), Some(&staff))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["risk"], "high");
    assert_eq!(body["checklist"]["missing"].as_array().unwrap().len(), 4);

    app.cleanup().await?;
    Ok(())
}
