// Notification inbox and the server-sent event stream of live updates.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{self, Stream};
use guildhall_core::live::{LiveEvent, LivePayload};
use guildhall_core::notifications::Notification;
use guildhall_core::ws_server::{resolve_session, SESSION_CHECK_INTERVAL};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::{CurrentUser, SessionToken};
use crate::error::ApiError;
use crate::extract::{ApiPath, ApiQuery};
use crate::state::AppState;

const KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Debug, Default, Deserialize)]
pub struct InboxQuery {
    #[serde(default)]
    pub unread: bool,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct MarkedRead {
    pub updated: usize,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/unread-count", get(unread_count))
        .route("/api/notifications/read-all", post(mark_all_read))
        .route("/api/notifications/{id}/read", post(mark_read))
        .route("/api/notifications/live", get(stream_live))
}

async fn list_notifications(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiQuery(query): ApiQuery<InboxQuery>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let page = state.page(query.limit, query.offset);
    Ok(Json(
        state
            .run(move |db| db.list_notifications(&user, query.unread, page))
            .await?,
    ))
}

async fn unread_count(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<UnreadCount>, ApiError> {
    let count = state.run(move |db| db.unread_count(&user)).await?;
    Ok(Json(UnreadCount { count }))
}

async fn mark_read(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Notification>, ApiError> {
    Ok(Json(
        state
            .run(move |db| db.mark_notification_read(&user, id))
            .await?,
    ))
}

async fn mark_all_read(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<MarkedRead>, ApiError> {
    let updated = state
        .run(move |db| db.mark_all_notifications_read(&user))
        .await?;
    Ok(Json(MarkedRead { updated }))
}

/// SSE frame for a live event. The event name says which kind of payload
/// the data carries.
pub fn sse_event(event: &LiveEvent) -> Option<Event> {
    let frame = Event::default().event(event.payload.event_name());
    let framed = match &event.payload {
        LivePayload::Notification(n) => frame.json_data(n),
        LivePayload::Chat(m) => frame.json_data(m),
    };
    match framed {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(error = %e, "failed to encode live event");
            None
        }
    }
}

/// Live events for one session. The stream ends once the session is
/// revoked; it is checked before each event and every
/// `SESSION_CHECK_INTERVAL`.
async fn stream_live(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    SessionToken(token): SessionToken,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(user_id = user.id, "live stream opened");
    let subscription = state.db.hub().subscribe(user.id);
    let mut session_check = tokio::time::interval(SESSION_CHECK_INTERVAL);
    session_check.reset();
    let db = state.db;
    let events = stream::unfold(
        (subscription, session_check),
        move |(mut sub, mut session_check)| {
            let db = db.clone();
            let token = token.clone();
            async move {
                loop {
                    tokio::select! {
                        event = sub.next() => {
                            let Some(event) = event else {
                                return None;
                            };
                            if let Err(e) = resolve_session(&db, &token).await {
                                debug!(user_id = sub.user_id(), "live stream closed: {e}");
                                return None;
                            }
                            if let Some(frame) = sse_event(&event) {
                                return Some((Ok::<_, Infallible>(frame), (sub, session_check)));
                            }
                        }
                        _ = session_check.tick() => {
                            if let Err(e) = resolve_session(&db, &token).await {
                                debug!(user_id = sub.user_id(), "live stream closed: {e}");
                                return None;
                            }
                        }
                    }
                }
            }
        },
    );
    Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE))
}
