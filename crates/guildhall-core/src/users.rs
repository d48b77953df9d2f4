// Accounts, sessions, profiles and admin user management.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::db::{now, optional_text, optional_url, require_text, Database, Page};
use crate::error::{conflict_on_unique, Error, Result};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "USER" => Some(Role::User),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()
            .and_then(|s| Role::parse(s).ok_or(FromSqlError::InvalidType))
    }
}

/// A full account record, as seen by its owner and by admins.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub bio: Option<String>,
    pub headline: Option<String>,
    pub avatar_url: Option<String>,
    pub banned: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(Error::forbidden("administrator role required"))
        }
    }

    /// Owners and admins may modify a resource.
    pub fn can_modify(&self, owner_id: i64) -> bool {
        self.id == owner_id || self.is_admin()
    }

    pub fn require_owner_or_admin(&self, owner_id: i64, what: &str) -> Result<()> {
        if self.can_modify(owner_id) {
            Ok(())
        } else {
            Err(Error::forbidden(format!("only the owner may modify this {what}")))
        }
    }

    pub fn summary(&self) -> MemberSummary {
        MemberSummary {
            id: self.id,
            name: self.name.clone(),
            headline: self.headline.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

/// The public face of a member, embedded in posts, comments, messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSummary {
    pub id: i64,
    pub name: String,
    pub headline: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    #[serde(flatten)]
    pub member: MemberSummary,
    pub bio: Option<String>,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
    pub post_count: i64,
    pub project_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInput {
    pub email: String,
    pub name: String,
    pub password: String,
}

/// Partial profile update. `None` leaves a field unchanged; an empty string
/// clears an optional field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub bio: Option<String>,
    pub headline: Option<String>,
    pub avatar_url: Option<String>,
}

/// A freshly issued login session. `token` is only ever shown here.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub user: User,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStats {
    pub users: i64,
    pub admins: i64,
    pub banned: i64,
    pub posts: i64,
    pub comments: i64,
    pub articles: i64,
    pub projects: i64,
    pub courses: i64,
    pub events: i64,
    pub channels: i64,
    pub messages: i64,
    pub certificates: i64,
}

// ---------------------------------------------------------------------------
// Credential helpers
// ---------------------------------------------------------------------------

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| Error::Internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!("unparseable password hash: {e}");
            false
        }
    }
}

/// 32 random bytes, base64url without padding.
pub fn new_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Sessions are stored by token digest, never by the token itself.
pub fn token_digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

pub(crate) fn validate_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    let valid = email.len() <= 254
        && !email.chars().any(char::is_whitespace)
        && match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.contains('@')
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
            }
            None => false,
        };
    if valid {
        Ok(email)
    } else {
        Err(Error::validation("email", "must be a valid email address"))
    }
}

/// Escape `%`, `_` and `\` and wrap for a substring LIKE match.
pub(crate) fn like_pattern(query: &str) -> String {
    let mut out = String::with_capacity(query.len() + 2);
    out.push('%');
    for c in query.trim().chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

pub(crate) const USER_COLUMNS: &str =
    "id, email, name, role, bio, headline, avatar_url, banned, created_at";

pub(crate) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        role: row.get(3)?,
        bio: row.get(4)?,
        headline: row.get(5)?,
        avatar_url: row.get(6)?,
        banned: row.get(7)?,
        created_at: row.get(8)?,
    })
}

/// Map four consecutive columns `id, name, headline, avatar_url` starting at
/// `start` into a member summary.
pub(crate) fn member_from_row(row: &Row<'_>, start: usize) -> rusqlite::Result<MemberSummary> {
    Ok(MemberSummary {
        id: row.get(start)?,
        name: row.get(start + 1)?,
        headline: row.get(start + 2)?,
        avatar_url: row.get(start + 3)?,
    })
}

/// Same as [`member_from_row`] for a LEFT JOINed user that may be absent.
pub(crate) fn optional_member_from_row(
    row: &Row<'_>,
    start: usize,
) -> rusqlite::Result<Option<MemberSummary>> {
    let id: Option<i64> = row.get(start)?;
    match id {
        Some(_) => member_from_row(row, start).map(Some),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

impl Database {
    /// Create an account. The caller decides the role (bootstrap admins).
    pub fn register(&self, input: &RegisterInput, min_password_length: usize, role: Role) -> Result<User> {
        let email = validate_email(&input.email)?;
        let name = require_text("name", &input.name, 2, 80)?;
        if input.password.chars().count() < min_password_length {
            return Err(Error::validation(
                "password",
                format!("must be at least {min_password_length} characters"),
            ));
        }
        let hash = hash_password(&input.password)?;
        let ts = now();

        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO users (email, name, password_hash, role, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![email, name, hash, role, ts],
            )
            .map_err(|e| conflict_on_unique(e, "an account with this email already exists"))?;
            conn.last_insert_rowid()
        };

        info!(user_id = id, role = role.as_str(), "account registered");
        self.get_user(id)
    }

    /// Verify credentials and open a session lasting `ttl_hours`.
    pub fn login(&self, email: &str, password: &str, ttl_hours: i64) -> Result<Session> {
        let email = email.trim().to_lowercase();
        let found: Option<(i64, String, bool)> = self
            .conn()
            .query_row(
                "SELECT id, password_hash, banned FROM users WHERE email = ?1",
                [&email],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((user_id, hash, banned)) = found else {
            return Err(Error::Unauthenticated);
        };
        if !verify_password(password, &hash) {
            return Err(Error::Unauthenticated);
        }
        if banned {
            return Err(Error::forbidden("this account has been suspended"));
        }

        let token = new_session_token();
        let created = now();
        let expires_at = created + Duration::hours(ttl_hours);
        self.conn().execute(
            "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![token_digest(&token), user_id, created, expires_at],
        )?;

        info!(user_id, "session opened");
        Ok(Session {
            token,
            user: self.get_user(user_id)?,
            expires_at,
        })
    }

    /// Close the session for `token`. Unknown tokens are ignored.
    pub fn logout(&self, token: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM sessions WHERE token_hash = ?1", [token_digest(token)])?;
        Ok(())
    }

    /// Resolve a bearer token to its user. Expired sessions are removed.
    pub fn user_for_token(&self, token: &str) -> Result<User> {
        let digest = token_digest(token);
        let found: Option<(i64, DateTime<Utc>)> = self
            .conn()
            .query_row(
                "SELECT user_id, expires_at FROM sessions WHERE token_hash = ?1",
                [&digest],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((user_id, expires_at)) = found else {
            return Err(Error::Unauthenticated);
        };
        if expires_at <= now() {
            self.conn()
                .execute("DELETE FROM sessions WHERE token_hash = ?1", [&digest])?;
            return Err(Error::Unauthenticated);
        }

        let user = self.get_user(user_id)?;
        if user.banned {
            return Err(Error::forbidden("this account has been suspended"));
        }
        Ok(user)
    }

    /// Delete every expired session; returns how many were removed.
    pub fn purge_expired_sessions(&self) -> Result<usize> {
        let removed = self
            .conn()
            .execute("DELETE FROM sessions WHERE expires_at <= ?1", [now()])?;
        Ok(removed)
    }

    pub fn get_user(&self, id: i64) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id],
                user_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::not_found("user", id))
    }

    pub fn public_profile(&self, id: i64) -> Result<PublicProfile> {
        let user = self.get_user(id)?;
        if user.banned {
            return Err(Error::not_found("user", id));
        }
        let (post_count, project_count): (i64, i64) = self.conn().query_row(
            "SELECT (SELECT COUNT(*) FROM posts WHERE author_id = ?1),
                    (SELECT COUNT(*) FROM projects WHERE owner_id = ?1)",
            [id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(PublicProfile {
            member: user.summary(),
            bio: user.bio,
            role: user.role,
            joined_at: user.created_at,
            post_count,
            project_count,
        })
    }

    pub fn update_profile(&self, actor: &User, update: &ProfileUpdate) -> Result<User> {
        let name = match &update.name {
            Some(n) => require_text("name", n, 2, 80)?,
            None => actor.name.clone(),
        };
        let bio = match &update.bio {
            Some(b) => optional_text("bio", Some(b), 2000)?,
            None => actor.bio.clone(),
        };
        let headline = match &update.headline {
            Some(h) => optional_text("headline", Some(h), 120)?,
            None => actor.headline.clone(),
        };
        let avatar_url = match &update.avatar_url {
            Some(a) => optional_url("avatarUrl", Some(a))?,
            None => actor.avatar_url.clone(),
        };

        self.conn().execute(
            "UPDATE users SET name = ?1, bio = ?2, headline = ?3, avatar_url = ?4, updated_at = ?5
             WHERE id = ?6",
            params![name, bio, headline, avatar_url, now(), actor.id],
        )?;
        self.get_user(actor.id)
    }

    /// Member directory: non-banned users whose name or headline matches.
    pub fn search_members(&self, query: Option<&str>, page: Page) -> Result<Vec<MemberSummary>> {
        let pattern = like_pattern(query.unwrap_or(""));
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, headline, avatar_url FROM users
             WHERE banned = 0
               AND (name LIKE ?1 ESCAPE '\\' OR IFNULL(headline, '') LIKE ?1 ESCAPE '\\')
             ORDER BY name COLLATE NOCASE, id
             LIMIT ?2 OFFSET ?3",
        )?;
        let members = stmt
            .query_map(params![pattern, page.limit, page.offset], |row| member_from_row(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(members)
    }

    // -----------------------------------------------------------------------
    // Admin
    // -----------------------------------------------------------------------

    pub fn list_users(&self, actor: &User, page: Page) -> Result<Vec<User>> {
        actor.require_admin()?;
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id LIMIT ?1 OFFSET ?2"
        ))?;
        let users = stmt
            .query_map(params![page.limit, page.offset], user_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    pub fn set_role(&self, actor: &User, user_id: i64, role: Role) -> Result<User> {
        actor.require_admin()?;
        if actor.id == user_id && role != Role::Admin {
            return Err(Error::validation("role", "administrators cannot demote themselves"));
        }
        let changed = self.conn().execute(
            "UPDATE users SET role = ?1, updated_at = ?2 WHERE id = ?3",
            params![role, now(), user_id],
        )?;
        if changed == 0 {
            return Err(Error::not_found("user", user_id));
        }
        info!(admin_id = actor.id, user_id, role = role.as_str(), "role changed");
        self.get_user(user_id)
    }

    /// Suspend or reinstate an account. Suspension revokes all sessions.
    pub fn set_banned(&self, actor: &User, user_id: i64, banned: bool) -> Result<User> {
        actor.require_admin()?;
        if actor.id == user_id {
            return Err(Error::validation("banned", "administrators cannot suspend themselves"));
        }
        {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE users SET banned = ?1, updated_at = ?2 WHERE id = ?3",
                params![banned, now(), user_id],
            )?;
            if changed == 0 {
                return Err(Error::not_found("user", user_id));
            }
            if banned {
                tx.execute("DELETE FROM sessions WHERE user_id = ?1", [user_id])?;
            }
            tx.commit()?;
        }
        info!(admin_id = actor.id, user_id, banned, "suspension changed");
        self.get_user(user_id)
    }

    pub fn delete_user(&self, actor: &User, user_id: i64) -> Result<()> {
        actor.require_admin()?;
        if actor.id == user_id {
            return Err(Error::validation("id", "administrators cannot delete themselves"));
        }
        let changed = self
            .conn()
            .execute("DELETE FROM users WHERE id = ?1", [user_id])?;
        if changed == 0 {
            return Err(Error::not_found("user", user_id));
        }
        info!(admin_id = actor.id, user_id, "account deleted");
        Ok(())
    }

    /// All accounts as CSV (`id,email,name,role,banned,created_at`).
    pub fn export_users_csv(&self, actor: &User) -> Result<String> {
        actor.require_admin()?;
        let users = {
            let conn = self.conn();
            let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?;
            let rows = stmt
                .query_map([], user_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut writer = csv::Writer::from_writer(Vec::new());
        let csv_err = |e: csv::Error| Error::Internal(format!("csv export failed: {e}"));
        writer
            .write_record(["id", "email", "name", "role", "banned", "created_at"])
            .map_err(csv_err)?;
        for user in &users {
            writer
                .write_record([
                    user.id.to_string(),
                    user.email.clone(),
                    user.name.clone(),
                    user.role.as_str().to_string(),
                    user.banned.to_string(),
                    user.created_at.to_rfc3339(),
                ])
                .map_err(csv_err)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| Error::Internal(format!("csv export failed: {e}")))?;
        String::from_utf8(bytes).map_err(|e| Error::Internal(format!("csv export failed: {e}")))
    }

    pub fn stats(&self, actor: &User) -> Result<PlatformStats> {
        actor.require_admin()?;
        let stats = self.conn().query_row(
            "SELECT
                (SELECT COUNT(*) FROM users),
                (SELECT COUNT(*) FROM users WHERE role = 'ADMIN'),
                (SELECT COUNT(*) FROM users WHERE banned = 1),
                (SELECT COUNT(*) FROM posts),
                (SELECT COUNT(*) FROM comments),
                (SELECT COUNT(*) FROM articles),
                (SELECT COUNT(*) FROM projects),
                (SELECT COUNT(*) FROM courses),
                (SELECT COUNT(*) FROM events),
                (SELECT COUNT(*) FROM chat_channels),
                (SELECT COUNT(*) FROM chat_messages),
                (SELECT COUNT(*) FROM certificates)",
            [],
            |row| {
                Ok(PlatformStats {
                    users: row.get(0)?,
                    admins: row.get(1)?,
                    banned: row.get(2)?,
                    posts: row.get(3)?,
                    comments: row.get(4)?,
                    articles: row.get(5)?,
                    projects: row.get(6)?,
                    courses: row.get(7)?,
                    events: row.get(8)?,
                    channels: row.get(9)?,
                    messages: row.get(10)?,
                    certificates: row.get(11)?,
                })
            },
        )?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{insert_user, test_db};

    fn register(db: &Database, email: &str) -> Result<User> {
        db.register(
            &RegisterInput {
                email: email.into(),
                name: "Grace Hopper".into(),
                password: "correct horse".into(),
            },
            8,
            Role::User,
        )
    }

    #[test]
    fn register_then_login_round_trip() {
        let db = test_db();
        let user = register(&db, "Grace@Example.com").unwrap();
        assert_eq!(user.email, "grace@example.com");
        assert_eq!(user.role, Role::User);

        let session = db.login("grace@example.com", "correct horse", 24).unwrap();
        assert_eq!(session.user.id, user.id);
        assert!(session.expires_at > Utc::now());

        let resolved = db.user_for_token(&session.token).unwrap();
        assert_eq!(resolved.id, user.id);
    }

    #[test]
    fn duplicate_email_is_conflict() {
        let db = test_db();
        register(&db, "ada@example.com").unwrap();
        assert!(matches!(
            register(&db, "ADA@example.com"),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn register_validates_fields() {
        let db = test_db();
        assert!(matches!(register(&db, "not-an-email"), Err(Error::Validation { .. })));

        let short = RegisterInput {
            email: "x@example.com".into(),
            name: "Xi".into(),
            password: "short".into(),
        };
        match db.register(&short, 8, Role::User) {
            Err(Error::Validation { field, .. }) => assert_eq!(field, "password"),
            other => panic!("expected password validation error, got {other:?}"),
        }
    }

    #[test]
    fn wrong_password_and_unknown_email_are_unauthenticated() {
        let db = test_db();
        register(&db, "grace@example.com").unwrap();
        assert!(matches!(
            db.login("grace@example.com", "wrong password", 24),
            Err(Error::Unauthenticated)
        ));
        assert!(matches!(
            db.login("nobody@example.com", "correct horse", 24),
            Err(Error::Unauthenticated)
        ));
    }

    #[test]
    fn logout_invalidates_token() {
        let db = test_db();
        register(&db, "grace@example.com").unwrap();
        let session = db.login("grace@example.com", "correct horse", 24).unwrap();
        db.logout(&session.token).unwrap();
        assert!(matches!(
            db.user_for_token(&session.token),
            Err(Error::Unauthenticated)
        ));
    }

    #[test]
    fn expired_session_rejected_and_removed() {
        let db = test_db();
        register(&db, "grace@example.com").unwrap();
        let session = db.login("grace@example.com", "correct horse", 24).unwrap();
        db.conn()
            .execute(
                "UPDATE sessions SET expires_at = ?1",
                [Utc::now() - Duration::hours(1)],
            )
            .unwrap();

        assert!(matches!(
            db.user_for_token(&session.token),
            Err(Error::Unauthenticated)
        ));
        let remaining: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn token_is_stored_hashed() {
        let db = test_db();
        register(&db, "grace@example.com").unwrap();
        let session = db.login("grace@example.com", "correct horse", 24).unwrap();
        let stored: String = db
            .conn()
            .query_row("SELECT token_hash FROM sessions", [], |r| r.get(0))
            .unwrap();
        assert_ne!(stored, session.token);
        assert_eq!(stored, token_digest(&session.token));
        assert_eq!(stored.len(), 64);
    }

    #[test]
    fn ban_revokes_sessions_and_blocks_login() {
        let db = test_db();
        let admin = insert_user(&db, "Admin", Role::Admin);
        let user = register(&db, "grace@example.com").unwrap();
        let session = db.login("grace@example.com", "correct horse", 24).unwrap();

        db.set_banned(&admin, user.id, true).unwrap();
        assert!(db.user_for_token(&session.token).is_err());
        assert!(matches!(
            db.login("grace@example.com", "correct horse", 24),
            Err(Error::Forbidden(_))
        ));

        db.set_banned(&admin, user.id, false).unwrap();
        assert!(db.login("grace@example.com", "correct horse", 24).is_ok());
    }

    #[test]
    fn admin_operations_require_admin() {
        let db = test_db();
        let user = insert_user(&db, "Plain", Role::User);
        let other = insert_user(&db, "Other", Role::User);
        assert!(matches!(db.list_users(&user, Page::default()), Err(Error::Forbidden(_))));
        assert!(matches!(db.set_role(&user, other.id, Role::Admin), Err(Error::Forbidden(_))));
        assert!(matches!(db.delete_user(&user, other.id), Err(Error::Forbidden(_))));
        assert!(matches!(db.export_users_csv(&user), Err(Error::Forbidden(_))));
    }

    #[test]
    fn admin_cannot_demote_ban_or_delete_self() {
        let db = test_db();
        let admin = insert_user(&db, "Admin", Role::Admin);
        assert!(db.set_role(&admin, admin.id, Role::User).is_err());
        assert!(db.set_banned(&admin, admin.id, true).is_err());
        assert!(db.delete_user(&admin, admin.id).is_err());
    }

    #[test]
    fn set_role_promotes_user() {
        let db = test_db();
        let admin = insert_user(&db, "Admin", Role::Admin);
        let user = insert_user(&db, "Plain", Role::User);
        let promoted = db.set_role(&admin, user.id, Role::Admin).unwrap();
        assert!(promoted.is_admin());
        assert!(matches!(
            db.set_role(&admin, 9999, Role::Admin),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn update_profile_sets_and_clears_fields() {
        let db = test_db();
        let user = insert_user(&db, "Grace", Role::User);
        let updated = db
            .update_profile(
                &user,
                &ProfileUpdate {
                    headline: Some("Compiler pioneer".into()),
                    bio: Some("COBOL".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.headline.as_deref(), Some("Compiler pioneer"));
        assert_eq!(updated.name, "Grace");

        let cleared = db
            .update_profile(
                &updated,
                &ProfileUpdate {
                    bio: Some("".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(cleared.bio, None);
        assert_eq!(cleared.headline.as_deref(), Some("Compiler pioneer"));

        assert!(db
            .update_profile(
                &cleared,
                &ProfileUpdate {
                    avatar_url: Some("javascript:alert(1)".into()),
                    ..Default::default()
                }
            )
            .is_err());
    }

    #[test]
    fn search_members_matches_name_and_escapes_wildcards() {
        let db = test_db();
        insert_user(&db, "Grace Hopper", Role::User);
        insert_user(&db, "Ada Lovelace", Role::User);
        insert_user(&db, "100% Real", Role::User);

        let found = db.search_members(Some("hop"), Page::default()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Grace Hopper");

        let all = db.search_members(None, Page::default()).unwrap();
        assert_eq!(all.len(), 3);

        let percent = db.search_members(Some("%"), Page::default()).unwrap();
        assert_eq!(percent.len(), 1);
        assert_eq!(percent[0].name, "100% Real");
    }

    #[test]
    fn csv_export_has_header_and_rows() {
        let db = test_db();
        let admin = insert_user(&db, "Admin", Role::Admin);
        insert_user(&db, "Grace, Hopper", Role::User);

        let csv = db.export_users_csv(&admin).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("id,email,name,role,banned,created_at"));
        assert!(csv.contains("\"Grace, Hopper\""));
        assert_eq!(csv.lines().count(), 3);
    }

    #[test]
    fn stats_count_users() {
        let db = test_db();
        let admin = insert_user(&db, "Admin", Role::Admin);
        insert_user(&db, "Plain", Role::User);
        let stats = db.stats(&admin).unwrap();
        assert_eq!(stats.users, 2);
        assert_eq!(stats.admins, 1);
        assert_eq!(stats.posts, 0);
    }

    #[test]
    fn public_profile_hides_banned_users() {
        let db = test_db();
        let admin = insert_user(&db, "Admin", Role::Admin);
        let user = insert_user(&db, "Plain", Role::User);
        assert_eq!(db.public_profile(user.id).unwrap().member.name, "Plain");
        db.set_banned(&admin, user.id, true).unwrap();
        assert!(matches!(db.public_profile(user.id), Err(Error::NotFound { .. })));
    }

    #[test]
    fn email_validation_cases() {
        assert!(validate_email("a@b.co").is_ok());
        assert!(validate_email("a b@c.co").is_err());
        assert!(validate_email("@b.co").is_err());
        assert!(validate_email("a@bco").is_err());
        assert!(validate_email("a@@b.co").is_err());
    }
}
