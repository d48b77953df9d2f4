// Community events, RSVPs and calendar feeds.

use axum::extract::State;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use guildhall_core::events::{Event, EventInput, RsvpToggle};
use guildhall_core::ics;
use serde::Deserialize;

use crate::auth::{CurrentUser, MaybeUser};
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::state::AppState;

const CALENDAR_CONTENT_TYPE: &str = "text/calendar; charset=utf-8";

#[derive(Debug, Default, Deserialize)]
pub struct EventQuery {
    #[serde(default)]
    pub upcoming: bool,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/events", get(list_events).post(create_event))
        .route(
            "/api/events/{id}",
            get(get_event).put(update_event).delete(delete_event),
        )
        .route("/api/events/{id}/rsvp", post(toggle_rsvp))
        .route("/api/events/{id}/ics", get(event_ics))
        .route("/api/calendar.ics", get(calendar_ics))
}

fn calendar_response(body: String, filename: &str) -> Response {
    (
        [
            (CONTENT_TYPE, CALENDAR_CONTENT_TYPE.to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response()
}

async fn list_events(
    State(state): State<AppState>,
    viewer: MaybeUser,
    ApiQuery(query): ApiQuery<EventQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let page = state.page(query.limit, query.offset);
    let viewer = viewer.id();
    let events = state
        .run(move |db| db.list_events(viewer, query.upcoming, page))
        .await?;
    Ok(Json(events))
}

async fn create_event(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(input): ApiJson<EventInput>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    let event = state.run(move |db| db.create_event(&user, &input)).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn get_event(
    State(state): State<AppState>,
    viewer: MaybeUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Event>, ApiError> {
    let viewer = viewer.id();
    Ok(Json(state.run(move |db| db.get_event(id, viewer)).await?))
}

async fn update_event(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(input): ApiJson<EventInput>,
) -> Result<Json<Event>, ApiError> {
    Ok(Json(state.run(move |db| db.update_event(&user, id, &input)).await?))
}

async fn delete_event(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state.run(move |db| db.delete_event(&user, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_rsvp(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<RsvpToggle>, ApiError> {
    Ok(Json(state.run(move |db| db.toggle_rsvp(&user, id)).await?))
}

async fn event_ics(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Response, ApiError> {
    let event = state.run(move |db| db.get_event(id, None)).await?;
    let body = ics::render_event(&event, state.config.public_host());
    Ok(calendar_response(body, &format!("event-{id}.ics")))
}

async fn calendar_ics(State(state): State<AppState>) -> Result<Response, ApiError> {
    let events = state.run(|db| db.all_events()).await?;
    let body = ics::render_calendar(&events, state.config.public_host(), "Guildhall events");
    Ok(calendar_response(body, "guildhall.ics"))
}
