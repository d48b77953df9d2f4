use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use guildhall_core::users::{RegisterInput, Role, User};
use serde::Deserialize;
use tracing::info;

use crate::auth::{clear_cookie, session_cookie, CurrentUser, SessionToken};
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
}

async fn register(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<RegisterInput>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let role = if state.config.is_admin_email(&input.email) {
        Role::Admin
    } else {
        Role::User
    };
    let min_password = state.config.auth.min_password_length;
    let user = state
        .run(move |db| db.register(&input, min_password, role))
        .await?;
    if role == Role::Admin {
        info!(user_id = user.id, "bootstrap administrator registered");
    }
    Ok((StatusCode::CREATED, Json(user)))
}

async fn login(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<LoginInput>,
) -> Result<Response, ApiError> {
    let ttl = state.config.auth.session_ttl_hours;
    let session = state
        .run(move |db| db.login(&input.email, &input.password, ttl))
        .await?;
    let cookie = session_cookie(&state.config.auth.cookie_name, &session.token, ttl * 3600);
    Ok(([(SET_COOKIE, cookie)], Json(session)).into_response())
}

async fn logout(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
) -> Result<Response, ApiError> {
    state.run(move |db| db.logout(&token)).await?;
    let cookie = clear_cookie(&state.config.auth.cookie_name);
    Ok((StatusCode::NO_CONTENT, [(SET_COOKIE, cookie)]).into_response())
}

async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}
