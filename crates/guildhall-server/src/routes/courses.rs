// Course catalogue, enrollment and progress.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use guildhall_core::courses::{Course, CourseInput, Enrollment, ProgressUpdate};
use serde::Deserialize;

use crate::auth::{CurrentUser, MaybeUser};
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::routes::PageQuery;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ProgressInput {
    pub progress: i64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/courses", get(list_courses).post(create_course))
        .route(
            "/api/courses/{id}",
            get(get_course).put(update_course).delete(delete_course),
        )
        .route(
            "/api/courses/{id}/enroll",
            post(enroll).get(get_enrollment).delete(unenroll),
        )
        .route("/api/courses/{id}/progress", put(update_progress))
        .route("/api/me/courses", get(my_courses))
}

async fn list_courses(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<Vec<Course>>, ApiError> {
    let page = state.page(query.limit, query.offset);
    Ok(Json(
        state
            .run(move |db| db.list_courses(viewer.as_ref(), page))
            .await?,
    ))
}

async fn create_course(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(input): ApiJson<CourseInput>,
) -> Result<(StatusCode, Json<Course>), ApiError> {
    let course = state.run(move |db| db.create_course(&user, &input)).await?;
    Ok((StatusCode::CREATED, Json(course)))
}

async fn get_course(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Course>, ApiError> {
    Ok(Json(
        state
            .run(move |db| db.get_course(id, viewer.as_ref()))
            .await?,
    ))
}

async fn update_course(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(input): ApiJson<CourseInput>,
) -> Result<Json<Course>, ApiError> {
    Ok(Json(
        state
            .run(move |db| db.update_course(&user, id, &input))
            .await?,
    ))
}

async fn delete_course(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state.run(move |db| db.delete_course(&user, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn enroll(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<(StatusCode, Json<Enrollment>), ApiError> {
    let enrollment = state.run(move |db| db.enroll(&user, id)).await?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

async fn get_enrollment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Enrollment>, ApiError> {
    Ok(Json(state.run(move |db| db.get_enrollment(&user, id)).await?))
}

async fn unenroll(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state.run(move |db| db.unenroll(&user, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_progress(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(input): ApiJson<ProgressInput>,
) -> Result<Json<ProgressUpdate>, ApiError> {
    Ok(Json(
        state
            .run(move |db| db.update_progress(&user, id, input.progress))
            .await?,
    ))
}

async fn my_courses(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Enrollment>>, ApiError> {
    Ok(Json(state.run(move |db| db.my_courses(&user)).await?))
}
