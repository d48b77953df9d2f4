// Long-form articles and their tags.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use guildhall_core::articles::{Article, ArticleInput, TagCount};
use serde::Deserialize;

use crate::auth::{CurrentUser, MaybeUser};
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ArticleQuery {
    pub tag: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/articles", get(list_articles).post(create_article))
        .route(
            "/api/articles/{slug}",
            get(get_article).put(update_article).delete(delete_article),
        )
        .route("/api/tags", get(list_tags))
}

async fn list_articles(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ArticleQuery>,
) -> Result<Json<Vec<Article>>, ApiError> {
    let page = state.page(query.limit, query.offset);
    let articles = state
        .run(move |db| db.list_articles(query.tag.as_deref(), page))
        .await?;
    Ok(Json(articles))
}

async fn create_article(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(input): ApiJson<ArticleInput>,
) -> Result<(StatusCode, Json<Article>), ApiError> {
    let article = state.run(move |db| db.create_article(&user, &input)).await?;
    Ok((StatusCode::CREATED, Json(article)))
}

async fn get_article(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    ApiPath(slug): ApiPath<String>,
) -> Result<Json<Article>, ApiError> {
    Ok(Json(
        state
            .run(move |db| db.get_article(&slug, viewer.as_ref()))
            .await?,
    ))
}

async fn update_article(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(slug): ApiPath<String>,
    ApiJson(input): ApiJson<ArticleInput>,
) -> Result<Json<Article>, ApiError> {
    Ok(Json(
        state
            .run(move |db| db.update_article(&user, &slug, &input))
            .await?,
    ))
}

async fn delete_article(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(slug): ApiPath<String>,
) -> Result<StatusCode, ApiError> {
    state.run(move |db| db.delete_article(&user, &slug)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_tags(State(state): State<AppState>) -> Result<Json<Vec<TagCount>>, ApiError> {
    Ok(Json(state.run(|db| db.list_tags()).await?))
}
