use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use axum_extra::{headers::Cookie, typed_header::TypedHeader};
use chrono::{Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::{
    audit,
    auth::{password, AuthenticatedUser, ROLE_CLIENT},
    error::{AppError, AppResult},
    models::{NewPasswordResetToken, NewRefreshToken, NewUser, PasswordResetToken, RefreshToken, User},
    schema::{password_reset_tokens, refresh_tokens, users, users::dsl},
    state::AppState,
};

use crate::schema::password_reset_tokens::dsl as reset_dsl;
use crate::schema::refresh_tokens::dsl as refresh_dsl;

const REFRESH_COOKIE_NAME: &str = "refresh_token";
const RESET_TOKEN_TTL_HOURS: i64 = 1;
const RESET_REQUEST_WINDOW_MINUTES: i64 = 15;
const RESET_REQUESTS_PER_WINDOW: i64 = 3;
const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
}

#[derive(Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct PasswordResetConfirm {
    pub token: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let mut conn = state.db()?;

    let user: User = dsl::users
        .filter(dsl::email.eq(&payload.email))
        .first(&mut conn)
        .map_err(|_| AppError::unauthorized())?;

    if !user.is_active {
        return Err(AppError::unauthorized());
    }

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::unauthorized())?;

    if !valid {
        return Err(AppError::unauthorized());
    }

    let access_token = state
        .jwt
        .generate_token(user.id, &user.email, &user.role)
        .map_err(AppError::from)?;

    let now = Utc::now();
    let refresh_value = generate_refresh_token();
    let refresh_hash = hash_refresh_token(&refresh_value);
    let refresh_expires_at = now + ChronoDuration::days(state.config.refresh_token_expiry_days);

    let new_refresh = NewRefreshToken {
        id: Uuid::new_v4(),
        user_id: user.id,
        token_hash: refresh_hash,
        issued_at: now.naive_utc(),
        expires_at: refresh_expires_at.naive_utc(),
    };

    diesel::insert_into(refresh_tokens::table)
        .values(&new_refresh)
        .execute(&mut conn)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        build_refresh_cookie(&state, &refresh_value, refresh_expires_at),
    );

    Ok((
        headers,
        Json(LoginResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: state.config.jwt_expiry_minutes * 60,
        }),
    ))
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    if payload.password.len() < MIN_PASSWORD_LENGTH {
        return Err(AppError::bad_request("password must be at least 8 characters"));
    }
    if payload.email.trim().is_empty() || !payload.email.contains('@') {
        return Err(AppError::bad_request("a valid email address is required"));
    }
    if payload.first_name.trim().is_empty() || payload.last_name.trim().is_empty() {
        return Err(AppError::bad_request("first and last name are required"));
    }

    let mut conn = state.db()?;

    let password_hash =
        password::hash_password(&payload.password).map_err(AppError::internal)?;

    let new_user = NewUser {
        id: Uuid::new_v4(),
        email: payload.email.trim().to_lowercase(),
        password_hash,
        first_name: payload.first_name.trim().to_string(),
        last_name: payload.last_name.trim().to_string(),
        phone: payload.phone,
        role: ROLE_CLIENT.to_string(),
    };

    // The email column is unique; the constraint is the duplicate check so
    // concurrent registrations cannot both slip past a pre-count.
    if let Err(err) = diesel::insert_into(users::table)
        .values(&new_user)
        .execute(&mut conn)
    {
        return Err(match err {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ) => AppError::conflict("an account with this email already exists"),
            other => other.into(),
        });
    }

    audit::record(
        &mut conn,
        Some(new_user.id),
        audit::ACTION_USER_CREATED,
        audit::ENTITY_USER,
        Some(new_user.id),
        format!("account registered for {}", new_user.email),
        json!({ "email": new_user.email }),
    )?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": new_user.id, "email": new_user.email })),
    ))
}

pub async fn refresh(
    State(state): State<AppState>,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let cookies = jar.ok_or_else(AppError::unauthorized)?;
    let refresh_value = cookies
        .get(REFRESH_COOKIE_NAME)
        .ok_or_else(AppError::unauthorized)?;

    let hashed = hash_refresh_token(refresh_value);
    let mut conn = state.db()?;
    let now = Utc::now();
    let now_naive = now.naive_utc();

    let token = match refresh_dsl::refresh_tokens
        .filter(refresh_dsl::token_hash.eq(&hashed))
        .filter(refresh_dsl::revoked_at.is_null())
        .filter(refresh_dsl::expires_at.gt(now_naive))
        .first::<RefreshToken>(&mut conn)
    {
        Ok(token) => token,
        Err(diesel::result::Error::NotFound) => return Err(AppError::unauthorized()),
        Err(err) => return Err(AppError::from(err)),
    };

    diesel::update(refresh_dsl::refresh_tokens.filter(refresh_dsl::id.eq(token.id)))
        .set((
            refresh_dsl::revoked_at.eq(now_naive),
            refresh_dsl::updated_at.eq(now_naive),
        ))
        .execute(&mut conn)?;

    let user: User = dsl::users
        .find(token.user_id)
        .first(&mut conn)
        .map_err(AppError::from)?;

    if !user.is_active {
        return Err(AppError::unauthorized());
    }

    let access_token = state
        .jwt
        .generate_token(user.id, &user.email, &user.role)
        .map_err(AppError::from)?;

    let new_refresh_value = generate_refresh_token();
    let new_refresh_hash = hash_refresh_token(&new_refresh_value);
    let new_refresh_expires = now + ChronoDuration::days(state.config.refresh_token_expiry_days);

    let new_refresh = NewRefreshToken {
        id: Uuid::new_v4(),
        user_id: user.id,
        token_hash: new_refresh_hash,
        issued_at: now_naive,
        expires_at: new_refresh_expires.naive_utc(),
    };

    diesel::insert_into(refresh_tokens::table)
        .values(&new_refresh)
        .execute(&mut conn)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        build_refresh_cookie(&state, &new_refresh_value, new_refresh_expires),
    );

    Ok((
        headers,
        Json(LoginResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: state.config.jwt_expiry_minutes * 60,
        }),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, StatusCode)> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let mut rows_affected = 0;

    if let Some(cookies) = jar {
        if let Some(value) = cookies.get(REFRESH_COOKIE_NAME) {
            let hashed = hash_refresh_token(value);
            rows_affected = diesel::update(
                refresh_dsl::refresh_tokens
                    .filter(refresh_dsl::token_hash.eq(hashed))
                    .filter(refresh_dsl::user_id.eq(user.user_id))
                    .filter(refresh_dsl::revoked_at.is_null()),
            )
            .set((
                refresh_dsl::revoked_at.eq(now),
                refresh_dsl::updated_at.eq(now),
            ))
            .execute(&mut conn)
            .unwrap_or(0);
        }
    }

    if rows_affected == 0 {
        let _ = diesel::update(
            refresh_dsl::refresh_tokens
                .filter(refresh_dsl::user_id.eq(user.user_id))
                .filter(refresh_dsl::revoked_at.is_null()),
        )
        .set((
            refresh_dsl::revoked_at.eq(now),
            refresh_dsl::updated_at.eq(now),
        ))
        .execute(&mut conn);
    }

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, build_clear_refresh_cookie(&state));
    Ok((headers, StatusCode::NO_CONTENT))
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<serde_json::Value>> {
    let mut conn = state.db()?;
    let record: User = dsl::users.find(user.user_id).first(&mut conn)?;
    Ok(Json(json!({
        "id": record.id,
        "email": record.email,
        "first_name": record.first_name,
        "last_name": record.last_name,
        "phone": record.phone,
        "role": record.role,
    })))
}

/// Always answers 202 so the endpoint does not reveal which emails exist.
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(payload): Json<PasswordResetRequest>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();

    let user: Option<User> = dsl::users
        .filter(dsl::email.eq(&payload.email))
        .first(&mut conn)
        .optional()?;

    let Some(user) = user else {
        info!(email = %payload.email, "password reset requested for unknown email");
        return Ok(StatusCode::ACCEPTED);
    };
    if !user.is_active {
        info!(user_id = %user.id, "password reset refused for inactive account");
        return Ok(StatusCode::ACCEPTED);
    }

    let window_start = now - ChronoDuration::minutes(RESET_REQUEST_WINDOW_MINUTES);
    let recent_requests: i64 = reset_dsl::password_reset_tokens
        .filter(reset_dsl::user_id.eq(user.id))
        .filter(reset_dsl::created_at.gt(window_start))
        .count()
        .first(&mut conn)?;
    if recent_requests >= RESET_REQUESTS_PER_WINDOW {
        info!(user_id = %user.id, "password reset throttled");
        return Ok(StatusCode::ACCEPTED);
    }

    let token_value = generate_refresh_token();
    let token_hash = hash_refresh_token(&token_value);

    let new_token = NewPasswordResetToken {
        id: Uuid::new_v4(),
        user_id: user.id,
        token_hash,
        expires_at: now + ChronoDuration::hours(RESET_TOKEN_TTL_HOURS),
    };
    diesel::insert_into(password_reset_tokens::table)
        .values(&new_token)
        .execute(&mut conn)?;

    crate::notifications::queue_direct(
        &mut conn,
        crate::notifications::CHANNEL_EMAIL,
        crate::notifications::EVENT_ADMIN_ALERT,
        &user.email,
        Some(user.id),
        "Reset your password",
        &format!(
            "<p>Hello {},</p><p>Use this code to reset your password within \
             one hour: <strong>{}</strong></p><p>If you did not request a \
             reset, ignore this message.</p>",
            user.first_name, token_value
        ),
    )?;

    Ok(StatusCode::ACCEPTED)
}

pub async fn confirm_password_reset(
    State(state): State<AppState>,
    Json(payload): Json<PasswordResetConfirm>,
) -> AppResult<StatusCode> {
    if payload.password.len() < MIN_PASSWORD_LENGTH {
        return Err(AppError::bad_request("password must be at least 8 characters"));
    }

    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let hashed = hash_refresh_token(&payload.token);

    let token: PasswordResetToken = reset_dsl::password_reset_tokens
        .filter(reset_dsl::token_hash.eq(&hashed))
        .filter(reset_dsl::used_at.is_null())
        .filter(reset_dsl::expires_at.gt(now))
        .first(&mut conn)
        .map_err(|_| AppError::bad_request("invalid or expired reset token"))?;

    let password_hash =
        password::hash_password(&payload.password).map_err(AppError::internal)?;

    conn.transaction::<_, AppError, _>(|conn| {
        diesel::update(dsl::users.find(token.user_id))
            .set((
                dsl::password_hash.eq(&password_hash),
                dsl::updated_at.eq(now),
            ))
            .execute(conn)?;

        // Consuming one token burns every outstanding token for the account.
        diesel::update(
            reset_dsl::password_reset_tokens
                .filter(reset_dsl::user_id.eq(token.user_id))
                .filter(reset_dsl::used_at.is_null()),
        )
        .set(reset_dsl::used_at.eq(now))
        .execute(conn)?;

        // Force re-login everywhere.
        diesel::update(
            refresh_dsl::refresh_tokens
                .filter(refresh_dsl::user_id.eq(token.user_id))
                .filter(refresh_dsl::revoked_at.is_null()),
        )
        .set((
            refresh_dsl::revoked_at.eq(now),
            refresh_dsl::updated_at.eq(now),
        ))
        .execute(conn)?;

        audit::record(
            conn,
            Some(token.user_id),
            audit::ACTION_PASSWORD_RESET,
            audit::ENTITY_USER,
            Some(token.user_id),
            "password reset via emailed token",
            json!({}),
        )?;

        Ok(())
    })?;

    Ok(StatusCode::NO_CONTENT)
}

fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn build_refresh_cookie(
    state: &AppState,
    token: &str,
    expires_at: chrono::DateTime<Utc>,
) -> HeaderValue {
    let max_age = ChronoDuration::days(state.config.refresh_token_expiry_days).num_seconds();

    let mut parts = vec![format!("{}={}", REFRESH_COOKIE_NAME, token)];
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Strict".into());
    parts.push(format!("Max-Age={}", max_age));
    parts.push(format!("Expires={}", expires_at.to_rfc2822()));
    if state.config.refresh_cookie_secure {
        parts.push("Secure".into());
    }
    if let Some(domain) = &state.config.refresh_cookie_domain {
        parts.push(format!("Domain={}", domain));
    }

    // Every part is ASCII; the domain is validated when config loads.
    HeaderValue::from_str(&parts.join("; ")).expect("valid refresh cookie")
}

fn build_clear_refresh_cookie(state: &AppState) -> HeaderValue {
    let mut parts = vec![format!("{}=", REFRESH_COOKIE_NAME)];
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Strict".into());
    parts.push("Max-Age=0".into());
    parts.push("Expires=Thu, 01 Jan 1970 00:00:00 GMT".into());
    if state.config.refresh_cookie_secure {
        parts.push("Secure".into());
    }
    if let Some(domain) = &state.config.refresh_cookie_domain {
        parts.push(format!("Domain={}", domain));
    }

    HeaderValue::from_str(&parts.join("; ")).expect("valid refresh cookie")
}
