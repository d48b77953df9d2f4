// Chat channels over plain HTTP. Live delivery goes through the websocket
// server and the notification stream; these routes cover everything else.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use guildhall_core::chat::{Channel, ChannelInput, ChannelMember, ChatMessage};
use serde::{Deserialize, Serialize};

use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct MessageQuery {
    pub after: Option<i64>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct MessageInput {
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInput {
    pub user_id: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadInput {
    pub up_to: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadMarker {
    pub last_read_id: i64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/chat/channels", get(list_channels).post(create_channel))
        .route(
            "/api/chat/channels/{id}",
            get(get_channel).delete(delete_channel),
        )
        .route("/api/chat/channels/{id}/join", post(join_channel))
        .route("/api/chat/channels/{id}/leave", post(leave_channel))
        .route(
            "/api/chat/channels/{id}/members",
            get(list_members).post(add_member),
        )
        .route(
            "/api/chat/channels/{id}/messages",
            get(list_messages).post(post_message),
        )
        .route("/api/chat/channels/{id}/read", post(mark_read))
        .route("/api/chat/messages/{id}", delete(delete_message))
}

async fn list_channels(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Channel>>, ApiError> {
    Ok(Json(state.run(move |db| db.list_channels(&user)).await?))
}

async fn create_channel(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(input): ApiJson<ChannelInput>,
) -> Result<(StatusCode, Json<Channel>), ApiError> {
    let channel = state.run(move |db| db.create_channel(&user, &input)).await?;
    Ok((StatusCode::CREATED, Json(channel)))
}

async fn get_channel(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Channel>, ApiError> {
    Ok(Json(state.run(move |db| db.get_channel(&user, id)).await?))
}

async fn delete_channel(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state.run(move |db| db.delete_channel(&user, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn join_channel(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Channel>, ApiError> {
    Ok(Json(state.run(move |db| db.join_channel(&user, id)).await?))
}

async fn leave_channel(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state.run(move |db| db.leave_channel(&user, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_members(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Vec<ChannelMember>>, ApiError> {
    Ok(Json(
        state
            .run(move |db| db.list_channel_members(&user, id))
            .await?,
    ))
}

async fn add_member(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(input): ApiJson<MemberInput>,
) -> Result<(StatusCode, Json<ChannelMember>), ApiError> {
    let member = state
        .run(move |db| db.add_channel_member(&user, id, input.user_id))
        .await?;
    Ok((StatusCode::CREATED, Json(member)))
}

async fn list_messages(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<MessageQuery>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let max = state.config.chat.poll_limit;
    let limit = query.limit.unwrap_or(max).clamp(1, max);
    Ok(Json(
        state
            .run(move |db| db.list_messages(&user, id, query.after, limit))
            .await?,
    ))
}

async fn post_message(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(input): ApiJson<MessageInput>,
) -> Result<(StatusCode, Json<ChatMessage>), ApiError> {
    let max_length = state.config.chat.max_message_length;
    let message = state
        .run(move |db| db.post_message(&user, id, &input.content, max_length))
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn mark_read(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    body: Option<Json<ReadInput>>,
) -> Result<Json<ReadMarker>, ApiError> {
    let up_to = body.and_then(|Json(input)| input.up_to);
    let last_read_id = state
        .run(move |db| db.mark_channel_read(&user, id, up_to))
        .await?;
    Ok(Json(ReadMarker { last_read_id }))
}

async fn delete_message(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state.run(move |db| db.delete_message(&user, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
