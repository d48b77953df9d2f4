// SQLite persistence layer.
//
// `Database` owns the single connection. Domain operations live in their own
// modules (`users`, `posts`, `chat`, ...) as further `impl Database` blocks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::live::LiveHub;

/// Current schema version, stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i64 = 2;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    email         TEXT NOT NULL UNIQUE COLLATE NOCASE,
    name          TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    role          TEXT NOT NULL DEFAULT 'USER' CHECK (role IN ('USER', 'ADMIN')),
    bio           TEXT,
    avatar_url    TEXT,
    banned        INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    token_hash TEXT PRIMARY KEY,
    user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS posts (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    author_id  INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    content    TEXT NOT NULL,
    image_url  TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS post_likes (
    user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    post_id    INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    PRIMARY KEY (user_id, post_id)
);

CREATE TABLE IF NOT EXISTS comments (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    post_id    INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
    author_id  INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    parent_id  INTEGER REFERENCES comments(id) ON DELETE CASCADE,
    content    TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS comment_likes (
    user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    comment_id INTEGER NOT NULL REFERENCES comments(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    PRIMARY KEY (user_id, comment_id)
);

CREATE TABLE IF NOT EXISTS articles (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    author_id  INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    title      TEXT NOT NULL,
    slug       TEXT NOT NULL UNIQUE,
    body       TEXT NOT NULL,
    published  INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tags (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS article_tags (
    article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    tag_id     INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    PRIMARY KEY (article_id, tag_id)
);

CREATE TABLE IF NOT EXISTS projects (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    title       TEXT NOT NULL,
    description TEXT NOT NULL,
    repo_url    TEXT,
    demo_url    TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS project_likes (
    user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    PRIMARY KEY (user_id, project_id)
);

CREATE TABLE IF NOT EXISTS courses (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    slug          TEXT NOT NULL UNIQUE,
    title         TEXT NOT NULL,
    description   TEXT NOT NULL,
    level         TEXT NOT NULL CHECK (level IN ('BEGINNER', 'INTERMEDIATE', 'ADVANCED')),
    instructor_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
    published     INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS enrollments (
    user_id      INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    course_id    INTEGER NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
    progress     INTEGER NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
    enrolled_at  TEXT NOT NULL,
    completed_at TEXT,
    PRIMARY KEY (user_id, course_id)
);

CREATE TABLE IF NOT EXISTS events (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    title        TEXT NOT NULL,
    description  TEXT NOT NULL,
    location     TEXT,
    url          TEXT,
    starts_at    TEXT NOT NULL,
    ends_at      TEXT NOT NULL,
    organizer_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS event_attendees (
    event_id   INTEGER NOT NULL REFERENCES events(id) ON DELETE CASCADE,
    user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    PRIMARY KEY (event_id, user_id)
);

CREATE TABLE IF NOT EXISTS chat_channels (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE COLLATE NOCASE,
    description TEXT,
    is_private  INTEGER NOT NULL DEFAULT 0,
    created_by  INTEGER REFERENCES users(id) ON DELETE SET NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chat_members (
    channel_id   INTEGER NOT NULL REFERENCES chat_channels(id) ON DELETE CASCADE,
    user_id      INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    role         TEXT NOT NULL DEFAULT 'MEMBER' CHECK (role IN ('OWNER', 'MEMBER')),
    last_read_id INTEGER NOT NULL DEFAULT 0,
    joined_at    TEXT NOT NULL,
    PRIMARY KEY (channel_id, user_id)
);

CREATE TABLE IF NOT EXISTS chat_messages (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_id INTEGER NOT NULL REFERENCES chat_channels(id) ON DELETE CASCADE,
    author_id  INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    content    TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS notifications (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    kind       TEXT NOT NULL,
    payload    TEXT NOT NULL,
    actor_id   INTEGER REFERENCES users(id) ON DELETE SET NULL,
    read_at    TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS certificates (
    id        TEXT PRIMARY KEY,
    user_id   INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    course_id INTEGER REFERENCES courses(id) ON DELETE SET NULL,
    title     TEXT NOT NULL,
    issued_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
    issued_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS skills (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE COLLATE NOCASE
);

CREATE TABLE IF NOT EXISTS user_skills (
    user_id      INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    skill_id     INTEGER NOT NULL REFERENCES skills(id) ON DELETE CASCADE,
    endorsements INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL,
    PRIMARY KEY (user_id, skill_id)
);

CREATE TABLE IF NOT EXISTS endorsements (
    endorser_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    user_id     INTEGER NOT NULL,
    skill_id    INTEGER NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (endorser_id, user_id, skill_id),
    FOREIGN KEY (user_id, skill_id) REFERENCES user_skills(user_id, skill_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
CREATE INDEX IF NOT EXISTS idx_posts_created ON posts(created_at);
CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id);
CREATE INDEX IF NOT EXISTS idx_events_starts ON events(starts_at);
CREATE INDEX IF NOT EXISTS idx_chat_messages_channel ON chat_messages(channel_id, id);
CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, read_at);
CREATE INDEX IF NOT EXISTS idx_certificates_user ON certificates(user_id);
";

/// Pagination window for list operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }

    /// Build a page from optional query values, clamping the limit into
    /// `1..=max_limit`.
    pub fn clamped(limit: Option<u32>, offset: Option<u32>, default_limit: u32, max_limit: u32) -> Self {
        let limit = limit.unwrap_or(default_limit).clamp(1, max_limit.max(1));
        Self {
            limit,
            offset: offset.unwrap_or(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { limit: 20, offset: 0 }
    }
}

/// Result of a like toggle: the caller's new state and the new total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeToggle {
    pub liked: bool,
    pub like_count: i64,
}

/// SQLite-backed persistence for every community entity.
pub struct Database {
    conn: Mutex<Connection>,
    hub: LiveHub,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and bring the schema up
    /// to date. Pass `":memory:"` for an ephemeral in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )?;

        Self::migrate(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            hub: LiveHub::new(),
        })
    }

    /// Apply pending schema migrations, tracked by `PRAGMA user_version`.
    fn migrate(conn: &Connection) -> Result<()> {
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version < 1 {
            conn.execute_batch(SCHEMA_V1)?;
        }

        // v2: profile headline.
        if version < 2 {
            let has_headline = conn.prepare("SELECT headline FROM users LIMIT 0").is_ok();
            if !has_headline {
                conn.execute_batch("ALTER TABLE users ADD COLUMN headline TEXT;")?;
            }
        }

        if version < SCHEMA_VERSION {
            conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
            info!(from = version, to = SCHEMA_VERSION, "database schema migrated");
        }

        Ok(())
    }

    /// Acquire the database connection. A poisoned lock is recovered: the
    /// connection itself holds no invariant a panicking holder could break.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The live event hub fed by notifications and chat messages.
    pub fn hub(&self) -> &LiveHub {
        &self.hub
    }
}

/// Run a blocking database operation on tokio's blocking pool.
pub async fn blocking<T, F>(db: &Arc<Database>, f: F) -> Result<T>
where
    F: FnOnce(&Database) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| Error::Internal(format!("database task failed: {e}")))?
}

/// Current time, the single clock for every stored timestamp.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Trim `value` and check its length in characters is within `min..=max`.
pub(crate) fn require_text(field: &str, value: &str, min: usize, max: usize) -> Result<String> {
    let trimmed = value.trim();
    let len = trimmed.chars().count();
    if len < min {
        return Err(if min <= 1 {
            Error::validation(field, "must not be empty")
        } else {
            Error::validation(field, format!("must be at least {min} characters"))
        });
    }
    if len > max {
        return Err(Error::validation(
            field,
            format!("must be at most {max} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

/// Normalise an optional free-text field: blank becomes `None`.
pub(crate) fn optional_text(field: &str, value: Option<&str>, max: usize) -> Result<Option<String>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => require_text(field, v, 1, max).map(Some),
    }
}

/// Validate an optional http(s) URL field.
pub(crate) fn optional_url(field: &str, value: Option<&str>) -> Result<Option<String>> {
    let value = optional_text(field, value, 2048)?;
    if let Some(url) = &value {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::validation(field, "must be an http(s) URL"));
        }
    }
    Ok(value)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::users::{Role, User};

    pub fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    /// Insert a user directly, bypassing password hashing.
    pub fn insert_user(db: &Database, name: &str, role: Role) -> User {
        let email = format!("{}@example.com", name.to_lowercase().replace(' ', "."));
        let ts = now();
        let id = {
            let conn = db.conn();
            conn.execute(
                "INSERT INTO users (email, name, password_hash, role, created_at, updated_at)
                 VALUES (?1, ?2, 'x', ?3, ?4, ?4)",
                rusqlite::params![email, name, role, ts],
            )
            .unwrap();
            conn.last_insert_rowid()
        };
        db.get_user(id).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::test_db;
    use super::*;

    #[test]
    fn open_creates_tables() {
        let db = test_db();
        let conn = db.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();

        for expected in [
            "users",
            "sessions",
            "posts",
            "post_likes",
            "comments",
            "comment_likes",
            "articles",
            "tags",
            "article_tags",
            "projects",
            "project_likes",
            "courses",
            "enrollments",
            "events",
            "event_attendees",
            "chat_channels",
            "chat_members",
            "chat_messages",
            "notifications",
            "certificates",
            "skills",
            "user_skills",
            "endorsements",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
        }
    }

    #[test]
    fn schema_version_recorded() {
        let db = test_db();
        let version: i64 = db
            .conn()
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn migration_adds_headline_to_v1_database() {
        let path = std::env::temp_dir().join(format!("gh_migrate_{}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let path_str = path.to_str().unwrap();

        {
            let conn = Connection::open(path_str).unwrap();
            conn.execute_batch(SCHEMA_V1).unwrap();
            conn.execute_batch("PRAGMA user_version = 1;").unwrap();
        }

        let db = Database::open(path_str).expect("migration should succeed");
        assert!(db.conn().prepare("SELECT headline FROM users LIMIT 0").is_ok());

        drop(db);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn reopening_is_idempotent() {
        let path = std::env::temp_dir().join(format!("gh_reopen_{}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let path_str = path.to_str().unwrap();

        drop(Database::open(path_str).unwrap());
        drop(Database::open(path_str).expect("second open should succeed"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn foreign_keys_enforced() {
        let db = test_db();
        let result = db.conn().execute(
            "INSERT INTO posts (author_id, content, created_at, updated_at) VALUES (999, 'x', ?1, ?1)",
            [now()],
        );
        assert!(result.is_err(), "post with unknown author should be rejected");
    }

    #[tokio::test]
    async fn blocking_runs_closure_against_database() {
        let db = Arc::new(test_db());
        let version: i64 = blocking(&db, |db| {
            Ok(db.conn().query_row("PRAGMA user_version", [], |row| row.get(0))?)
        })
        .await
        .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn page_clamps_limit() {
        assert_eq!(Page::clamped(None, None, 20, 100), Page::new(20, 0));
        assert_eq!(Page::clamped(Some(500), Some(7), 20, 100), Page::new(100, 7));
        assert_eq!(Page::clamped(Some(0), None, 20, 100), Page::new(1, 0));
    }

    #[test]
    fn require_text_trims_and_bounds() {
        assert_eq!(require_text("name", "  Ada  ", 1, 10).unwrap(), "Ada");
        assert!(require_text("name", "   ", 1, 10).is_err());
        assert!(require_text("name", "abcdefghijk", 1, 10).is_err());
        assert!(require_text("password", "abc", 8, 100).is_err());
    }

    #[test]
    fn optional_url_rejects_other_schemes() {
        assert_eq!(optional_url("url", Some("  ")).unwrap(), None);
        assert!(optional_url("url", Some("ftp://x")).is_err());
        assert_eq!(
            optional_url("url", Some("https://example.com")).unwrap().as_deref(),
            Some("https://example.com")
        );
    }
}
