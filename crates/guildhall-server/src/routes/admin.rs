// Administration: user management, exports, announcements and stats.
// Every operation checks the admin role itself; these handlers only need a
// session.

use axum::extract::State;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use guildhall_core::users::{PlatformStats, Role, User};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::routes::PageQuery;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RoleInput {
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct BanInput {
    pub banned: bool,
}

#[derive(Debug, Deserialize)]
pub struct AnnouncementInput {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct AnnouncementResult {
    pub delivered: usize,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/admin/users", get(list_users))
        .route("/api/admin/users.csv", get(export_users))
        .route("/api/admin/users/{id}", axum::routing::delete(delete_user))
        .route("/api/admin/users/{id}/role", put(set_role))
        .route("/api/admin/users/{id}/ban", put(set_banned))
        .route("/api/admin/announcements", post(announce))
        .route("/api/admin/stats", get(stats))
}

async fn list_users(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<Vec<User>>, ApiError> {
    let page = state.page(query.limit, query.offset);
    Ok(Json(state.run(move |db| db.list_users(&user, page)).await?))
}

async fn set_role(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(input): ApiJson<RoleInput>,
) -> Result<Json<User>, ApiError> {
    let admin_id = user.id;
    let updated = state
        .run(move |db| db.set_role(&user, id, input.role))
        .await?;
    info!(admin_id, user_id = id, role = updated.role.as_str(), "role changed");
    Ok(Json(updated))
}

async fn set_banned(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(input): ApiJson<BanInput>,
) -> Result<Json<User>, ApiError> {
    let admin_id = user.id;
    let updated = state
        .run(move |db| db.set_banned(&user, id, input.banned))
        .await?;
    info!(admin_id, user_id = id, banned = updated.banned, "ban state changed");
    Ok(Json(updated))
}

async fn delete_user(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    let admin_id = user.id;
    state.run(move |db| db.delete_user(&user, id)).await?;
    info!(admin_id, user_id = id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn export_users(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Response, ApiError> {
    let csv = state.run(move |db| db.export_users_csv(&user)).await?;
    Ok((
        [
            (CONTENT_TYPE, "text/csv; charset=utf-8"),
            (CONTENT_DISPOSITION, "attachment; filename=\"users.csv\""),
        ],
        csv,
    )
        .into_response())
}

async fn announce(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(input): ApiJson<AnnouncementInput>,
) -> Result<Json<AnnouncementResult>, ApiError> {
    let delivered = state
        .run(move |db| db.announce(&user, &input.message))
        .await?;
    info!(delivered, "announcement sent");
    Ok(Json(AnnouncementResult { delivered }))
}

async fn stats(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<PlatformStats>, ApiError> {
    Ok(Json(state.run(move |db| db.stats(&user)).await?))
}
