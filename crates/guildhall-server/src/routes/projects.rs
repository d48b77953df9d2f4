// Member project showcase.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use guildhall_core::db::LikeToggle;
use guildhall_core::projects::{Project, ProjectInput};
use serde::Deserialize;

use crate::auth::{CurrentUser, MaybeUser};
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ProjectQuery {
    pub owner: Option<i64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/projects", get(list_projects).post(create_project))
        .route(
            "/api/projects/{id}",
            get(get_project).put(update_project).delete(delete_project),
        )
        .route("/api/projects/{id}/like", post(like_project))
}

async fn list_projects(
    State(state): State<AppState>,
    viewer: MaybeUser,
    ApiQuery(query): ApiQuery<ProjectQuery>,
) -> Result<Json<Vec<Project>>, ApiError> {
    let page = state.page(query.limit, query.offset);
    let viewer = viewer.id();
    let projects = state
        .run(move |db| db.list_projects(viewer, query.owner, page))
        .await?;
    Ok(Json(projects))
}

async fn create_project(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(input): ApiJson<ProjectInput>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    let project = state.run(move |db| db.create_project(&user, &input)).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(
    State(state): State<AppState>,
    viewer: MaybeUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Project>, ApiError> {
    let viewer = viewer.id();
    Ok(Json(state.run(move |db| db.get_project(id, viewer)).await?))
}

async fn update_project(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(input): ApiJson<ProjectInput>,
) -> Result<Json<Project>, ApiError> {
    Ok(Json(
        state
            .run(move |db| db.update_project(&user, id, &input))
            .await?,
    ))
}

async fn delete_project(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state.run(move |db| db.delete_project(&user, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn like_project(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<LikeToggle>, ApiError> {
    Ok(Json(
        state
            .run(move |db| db.toggle_project_like(&user, id))
            .await?,
    ))
}
