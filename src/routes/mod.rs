use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod admin_loans;
pub mod admin_users;
pub mod analytics;
pub mod auth;
pub mod health;
pub mod loans;
pub mod media;
pub mod messages;
pub mod notifications;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        let allow_origin = AllowOrigin::list(headers);

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/register", post(auth::register))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .route("/password-reset/request", post(auth::request_password_reset))
        .route("/password-reset/confirm", post(auth::confirm_password_reset));

    let loans_routes = Router::new()
        .route("/", get(loans::list_own_loans).post(loans::apply))
        .route("/:id", get(loans::loan_detail))
        .route("/:id/progress", get(loans::loan_progress_view))
        .route(
            "/:id/documents",
            get(loans::list_documents).post(loans::upload_document),
        );

    let media_routes = Router::new()
        .route("/:id/download", get(media::download))
        .route("/:id", delete(media::delete));

    let messages_routes = Router::new()
        .route("/conversations", get(messages::conversations))
        .route("/with/:user_id", get(messages::thread))
        .route("/to/:user_id", post(messages::send))
        .route("/unread-count", get(messages::unread_count))
        .route("/:id/read", post(messages::mark_read));

    let notifications_routes = Router::new()
        .route("/", get(notifications::list_in_app))
        .route("/unread", get(notifications::unread_count))
        .route("/read-all", post(notifications::mark_all_read))
        .route("/:id/read", post(notifications::mark_read));

    let admin_routes = Router::new()
        .route("/loans", get(admin_loans::list))
        .route("/loans/stats", get(admin_loans::quick_stats))
        .route("/loans/batch", post(admin_loans::batch))
        .route(
            "/loans/:id",
            get(admin_loans::detail).delete(admin_loans::delete),
        )
        .route("/loans/:id/approve", post(admin_loans::approve))
        .route("/loans/:id/reject", post(admin_loans::reject))
        .route(
            "/loans/:id/request-documents",
            post(admin_loans::request_documents),
        )
        .route("/loans/:id/archive", post(admin_loans::archive))
        .route("/media/:id/validate", post(media::validate))
        .route("/media/:id/reject", post(media::reject))
        .route("/users", get(admin_users::list))
        .route("/users/:id/activate", post(admin_users::toggle_activation))
        .route("/notifications", get(notifications::admin_list))
        .route("/notifications/stats", get(notifications::admin_stats))
        .route("/notifications/bulk", post(notifications::admin_bulk))
        .route("/notifications/:id/retry", post(notifications::admin_retry))
        .route("/analytics/kpis", get(analytics::kpis))
        .route("/analytics/loans", get(analytics::loan_stats))
        .route("/audit", get(analytics::recent_activity));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/loans", loans_routes)
        .nest("/api/media", media_routes)
        .nest("/api/messages", messages_routes)
        .nest("/api/notifications", notifications_routes)
        .nest("/api/admin", admin_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/loans/simulate", post(loans::simulate))
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(crate::media::MAX_UPLOAD_BYTES + 1024 * 1024))
}
