// Member directory, profiles and skills.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use guildhall_core::skills::{EndorsementState, Skill, UserSkill};
use guildhall_core::users::{MemberSummary, ProfileUpdate, PublicProfile, User};
use serde::Deserialize;

use crate::auth::{CurrentUser, MaybeUser};
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct MemberSearch {
    pub q: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SkillSearch {
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SkillInput {
    pub name: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/users", get(search_members))
        .route("/api/users/me", get(my_profile).patch(update_profile))
        .route("/api/users/me/skills", get(my_skills).post(add_skill))
        .route("/api/users/me/skills/{skill_id}", axum::routing::delete(remove_skill))
        .route("/api/users/{id}", get(profile))
        .route("/api/users/{id}/skills", get(user_skills))
        .route(
            "/api/users/{id}/skills/{skill_id}/endorse",
            post(endorse).delete(withdraw_endorsement),
        )
        .route("/api/skills", get(list_skills))
}

async fn search_members(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<MemberSearch>,
) -> Result<Json<Vec<MemberSummary>>, ApiError> {
    let page = state.page(query.limit, query.offset);
    let members = state
        .run(move |db| db.search_members(query.q.as_deref(), page))
        .await?;
    Ok(Json(members))
}

async fn profile(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<PublicProfile>, ApiError> {
    Ok(Json(state.run(move |db| db.public_profile(id)).await?))
}

async fn my_profile(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(update): ApiJson<ProfileUpdate>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.run(move |db| db.update_profile(&user, &update)).await?))
}

async fn list_skills(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<SkillSearch>,
) -> Result<Json<Vec<Skill>>, ApiError> {
    Ok(Json(state.run(move |db| db.list_skills(query.q.as_deref())).await?))
}

async fn user_skills(
    State(state): State<AppState>,
    viewer: MaybeUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Vec<UserSkill>>, ApiError> {
    let viewer = viewer.id();
    Ok(Json(state.run(move |db| db.user_skills(id, viewer)).await?))
}

async fn my_skills(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<UserSkill>>, ApiError> {
    Ok(Json(state.run(move |db| db.user_skills(user.id, Some(user.id))).await?))
}

async fn add_skill(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(input): ApiJson<SkillInput>,
) -> Result<(StatusCode, Json<UserSkill>), ApiError> {
    let skill = state.run(move |db| db.add_skill(&user, &input.name)).await?;
    Ok((StatusCode::CREATED, Json(skill)))
}

async fn remove_skill(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(skill_id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state.run(move |db| db.remove_skill(&user, skill_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn endorse(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath((id, skill_id)): ApiPath<(i64, i64)>,
) -> Result<Json<EndorsementState>, ApiError> {
    Ok(Json(state.run(move |db| db.endorse(&user, id, skill_id)).await?))
}

async fn withdraw_endorsement(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath((id, skill_id)): ApiPath<(i64, i64)>,
) -> Result<Json<EndorsementState>, ApiError> {
    Ok(Json(
        state
            .run(move |db| db.withdraw_endorsement(&user, id, skill_id))
            .await?,
    ))
}
