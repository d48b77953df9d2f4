// Library root: domain model, persistence and live delivery for the
// community platform. The HTTP surface lives in `guildhall-server`.

pub mod articles;
pub mod certificates;
pub mod chat;
pub mod config;
pub mod courses;
pub mod db;
pub mod error;
pub mod events;
pub mod ics;
pub mod likes;
pub mod live;
pub mod notifications;
pub mod pdf;
pub mod posts;
pub mod projects;
pub mod skills;
pub mod users;
pub mod ws_server;

pub use db::{Database, Page};
pub use error::{Error, Result};
