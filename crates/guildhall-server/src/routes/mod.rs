// HTTP routes, one module per area of the API.

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

pub mod admin;
pub mod articles;
pub mod auth;
pub mod certificates;
pub mod chat;
pub mod courses;
pub mod events;
pub mod notifications;
pub mod posts;
pub mod projects;
pub mod users;

/// Query parameters shared by paginated listings.
#[derive(Debug, Default, serde::Deserialize)]
pub struct PageQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .merge(auth::router())
        .merge(users::router())
        .merge(posts::router())
        .merge(articles::router())
        .merge(projects::router())
        .merge(courses::router())
        .merge(events::router())
        .merge(chat::router())
        .merge(notifications::router())
        .merge(certificates::router())
        .merge(admin::router())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
