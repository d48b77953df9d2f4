// Feed posts, threaded comments and likes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use guildhall_core::db::LikeToggle;
use guildhall_core::posts::{Comment, CommentInput, Post, PostInput};
use serde::Deserialize;

use crate::auth::{CurrentUser, MaybeUser};
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::routes::PageQuery;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct FeedQuery {
    pub author: Option<i64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct CommentEdit {
    pub content: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/posts", get(list_posts).post(create_post))
        .route(
            "/api/posts/{id}",
            get(get_post).put(update_post).delete(delete_post),
        )
        .route("/api/posts/{id}/like", post(like_post))
        .route(
            "/api/posts/{id}/comments",
            get(list_comments).post(create_comment),
        )
        .route(
            "/api/comments/{id}",
            get(get_comment).put(update_comment).delete(delete_comment),
        )
        .route("/api/comments/{id}/like", post(like_comment))
}

async fn list_posts(
    State(state): State<AppState>,
    viewer: MaybeUser,
    ApiQuery(query): ApiQuery<FeedQuery>,
) -> Result<Json<Vec<Post>>, ApiError> {
    let page = state.page(query.limit, query.offset);
    let viewer = viewer.id();
    let posts = state
        .run(move |db| db.list_posts(viewer, query.author, page))
        .await?;
    Ok(Json(posts))
}

async fn create_post(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(input): ApiJson<PostInput>,
) -> Result<(StatusCode, Json<Post>), ApiError> {
    let post = state.run(move |db| db.create_post(&user, &input)).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

async fn get_post(
    State(state): State<AppState>,
    viewer: MaybeUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Post>, ApiError> {
    let viewer = viewer.id();
    Ok(Json(state.run(move |db| db.get_post(id, viewer)).await?))
}

async fn update_post(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(input): ApiJson<PostInput>,
) -> Result<Json<Post>, ApiError> {
    Ok(Json(state.run(move |db| db.update_post(&user, id, &input)).await?))
}

async fn delete_post(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state.run(move |db| db.delete_post(&user, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn like_post(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<LikeToggle>, ApiError> {
    Ok(Json(state.run(move |db| db.toggle_post_like(&user, id)).await?))
}

async fn list_comments(
    State(state): State<AppState>,
    viewer: MaybeUser,
    ApiPath(post_id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<Vec<Comment>>, ApiError> {
    let page = state.page(query.limit, query.offset);
    let viewer = viewer.id();
    let comments = state
        .run(move |db| db.list_comments(post_id, viewer, page))
        .await?;
    Ok(Json(comments))
}

async fn create_comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(post_id): ApiPath<i64>,
    ApiJson(input): ApiJson<CommentInput>,
) -> Result<(StatusCode, Json<Comment>), ApiError> {
    let comment = state
        .run(move |db| db.create_comment(&user, post_id, &input))
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn get_comment(
    State(state): State<AppState>,
    viewer: MaybeUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Comment>, ApiError> {
    let viewer = viewer.id();
    Ok(Json(state.run(move |db| db.get_comment(id, viewer)).await?))
}

async fn update_comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(edit): ApiJson<CommentEdit>,
) -> Result<Json<Comment>, ApiError> {
    Ok(Json(
        state
            .run(move |db| db.update_comment(&user, id, &edit.content))
            .await?,
    ))
}

async fn delete_comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state.run(move |db| db.delete_comment(&user, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn like_comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<LikeToggle>, ApiError> {
    Ok(Json(state.run(move |db| db.toggle_comment_like(&user, id)).await?))
}
