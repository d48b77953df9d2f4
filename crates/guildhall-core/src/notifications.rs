// Notifications: a closed set of kinds, their display templates, storage and
// live delivery.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::db::{now, require_text, Database, Page};
use crate::error::{Error, Result};
use crate::live::{LiveEvent, LivePayload};
use crate::users::{optional_member_from_row, MemberSummary, User};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum NotificationKind {
    PostLiked { post_id: i64 },
    PostCommented { post_id: i64, comment_id: i64 },
    CommentReplied { post_id: i64, comment_id: i64 },
    CommentLiked { post_id: i64, comment_id: i64 },
    ProjectLiked { project_id: i64, project_title: String },
    SkillEndorsed { skill_id: i64, skill_name: String },
    ChannelInvite { channel_id: i64, channel_name: String },
    EventCreated { event_id: i64, title: String, starts_at: DateTime<Utc> },
    CertificateIssued { certificate_id: String, title: String },
    Announcement { message: String },
}

/// Display text for a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rendered {
    pub title: String,
    pub body: String,
    pub link: Option<String>,
}

impl NotificationKind {
    /// Value of the `kind` column, identical to the serialized tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            NotificationKind::PostLiked { .. } => "POST_LIKED",
            NotificationKind::PostCommented { .. } => "POST_COMMENTED",
            NotificationKind::CommentReplied { .. } => "COMMENT_REPLIED",
            NotificationKind::CommentLiked { .. } => "COMMENT_LIKED",
            NotificationKind::ProjectLiked { .. } => "PROJECT_LIKED",
            NotificationKind::SkillEndorsed { .. } => "SKILL_ENDORSED",
            NotificationKind::ChannelInvite { .. } => "CHANNEL_INVITE",
            NotificationKind::EventCreated { .. } => "EVENT_CREATED",
            NotificationKind::CertificateIssued { .. } => "CERTIFICATE_ISSUED",
            NotificationKind::Announcement { .. } => "ANNOUNCEMENT",
        }
    }

    pub fn render(&self, actor: Option<&str>) -> Rendered {
        let who = actor.unwrap_or("Someone");
        let (title, body, link) = match self {
            NotificationKind::PostLiked { post_id } => (
                "New like".to_string(),
                format!("{who} liked your post"),
                Some(format!("/posts/{post_id}")),
            ),
            NotificationKind::PostCommented { post_id, comment_id } => (
                "New comment".to_string(),
                format!("{who} commented on your post"),
                Some(format!("/posts/{post_id}#comment-{comment_id}")),
            ),
            NotificationKind::CommentReplied { post_id, comment_id } => (
                "New reply".to_string(),
                format!("{who} replied to your comment"),
                Some(format!("/posts/{post_id}#comment-{comment_id}")),
            ),
            NotificationKind::CommentLiked { post_id, comment_id } => (
                "New like".to_string(),
                format!("{who} liked your comment"),
                Some(format!("/posts/{post_id}#comment-{comment_id}")),
            ),
            NotificationKind::ProjectLiked {
                project_id,
                project_title,
            } => (
                "New like".to_string(),
                format!("{who} liked your project \"{project_title}\""),
                Some(format!("/projects/{project_id}")),
            ),
            NotificationKind::SkillEndorsed { skill_name, .. } => (
                "New endorsement".to_string(),
                format!("{who} endorsed you for {skill_name}"),
                Some("/profile#skills".to_string()),
            ),
            NotificationKind::ChannelInvite {
                channel_id,
                channel_name,
            } => (
                "Channel invitation".to_string(),
                format!("{who} added you to #{channel_name}"),
                Some(format!("/chat/{channel_id}")),
            ),
            NotificationKind::EventCreated {
                event_id,
                title,
                starts_at,
            } => (
                "New event".to_string(),
                format!("{title} on {}", starts_at.format("%Y-%m-%d %H:%M UTC")),
                Some(format!("/events/{event_id}")),
            ),
            NotificationKind::CertificateIssued {
                certificate_id,
                title,
            } => (
                "Certificate issued".to_string(),
                format!("You earned a certificate: {title}"),
                Some(format!("/certificates/{certificate_id}")),
            ),
            NotificationKind::Announcement { message } => {
                ("Announcement".to_string(), message.clone(), None)
            }
        };
        Rendered { title, body, link }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub actor: Option<MemberSummary>,
    pub kind: NotificationKind,
    #[serde(flatten)]
    pub content: Rendered,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

const NOTIFICATION_SELECT: &str = "
    SELECT n.id, n.user_id, n.payload, n.read_at, n.created_at,
           a.id, a.name, a.headline, a.avatar_url
    FROM notifications n
    LEFT JOIN users a ON a.id = n.actor_id";

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    let payload: String = row.get(2)?;
    let kind: NotificationKind = serde_json::from_str(&payload)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    let read_at: Option<DateTime<Utc>> = row.get(3)?;
    let actor = optional_member_from_row(row, 5)?;
    let content = kind.render(actor.as_ref().map(|a| a.name.as_str()));
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        actor,
        kind,
        content,
        read: read_at.is_some(),
        created_at: row.get(4)?,
    })
}

impl Database {
    /// Record a notification for `recipient` and push it live. Nothing is
    /// recorded when the actor is the recipient.
    pub fn notify(
        &self,
        recipient: i64,
        actor_id: Option<i64>,
        kind: NotificationKind,
    ) -> Result<Option<Notification>> {
        if actor_id == Some(recipient) {
            return Ok(None);
        }
        let payload = serde_json::to_string(&kind)?;
        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO notifications (user_id, kind, payload, actor_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![recipient, kind.type_name(), payload, actor_id, now()],
            )?;
            conn.last_insert_rowid()
        };
        let notification = self.get_notification(id)?;
        debug!(id, recipient, kind = kind.type_name(), "notification created");

        self.hub().publish(LiveEvent {
            recipients: vec![recipient],
            payload: LivePayload::Notification(notification.clone()),
        });
        Ok(Some(notification))
    }

    /// Record the same notification for many recipients in one transaction.
    /// The actor is skipped. Returns the number recorded.
    pub fn notify_many(
        &self,
        recipients: &[i64],
        actor_id: Option<i64>,
        kind: NotificationKind,
    ) -> Result<usize> {
        let payload = serde_json::to_string(&kind)?;
        let mut ids = Vec::with_capacity(recipients.len());
        {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let ts = now();
            for &recipient in recipients {
                if actor_id == Some(recipient) {
                    continue;
                }
                tx.execute(
                    "INSERT INTO notifications (user_id, kind, payload, actor_id, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![recipient, kind.type_name(), payload, actor_id, ts],
                )?;
                ids.push(tx.last_insert_rowid());
            }
            tx.commit()?;
        }

        for &id in &ids {
            let notification = self.get_notification(id)?;
            self.hub().publish(LiveEvent {
                recipients: vec![notification.user_id],
                payload: LivePayload::Notification(notification),
            });
        }
        Ok(ids.len())
    }

    fn get_notification(&self, id: i64) -> Result<Notification> {
        self.conn()
            .query_row(
                &format!("{NOTIFICATION_SELECT} WHERE n.id = ?1"),
                [id],
                notification_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::not_found("notification", id))
    }

    pub fn list_notifications(&self, user: &User, unread_only: bool, page: Page) -> Result<Vec<Notification>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{NOTIFICATION_SELECT}
             WHERE n.user_id = ?1 AND (?2 = 0 OR n.read_at IS NULL)
             ORDER BY n.id DESC
             LIMIT ?3 OFFSET ?4"
        ))?;
        let items = stmt
            .query_map(
                params![user.id, unread_only, page.limit, page.offset],
                notification_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    pub fn unread_count(&self, user: &User) -> Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND read_at IS NULL",
            [user.id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Mark one of the caller's notifications read. Other users'
    /// notifications are reported as not found.
    pub fn mark_notification_read(&self, user: &User, id: i64) -> Result<Notification> {
        let changed = self.conn().execute(
            "UPDATE notifications SET read_at = COALESCE(read_at, ?1)
             WHERE id = ?2 AND user_id = ?3",
            params![now(), id, user.id],
        )?;
        if changed == 0 {
            return Err(Error::not_found("notification", id));
        }
        self.get_notification(id)
    }

    pub fn mark_all_notifications_read(&self, user: &User) -> Result<usize> {
        let changed = self.conn().execute(
            "UPDATE notifications SET read_at = ?1 WHERE user_id = ?2 AND read_at IS NULL",
            params![now(), user.id],
        )?;
        Ok(changed)
    }

    /// Admin broadcast to every active member.
    pub fn announce(&self, actor: &User, message: &str) -> Result<usize> {
        actor.require_admin()?;
        let message = require_text("message", message, 1, 1000)?;
        let recipients: Vec<i64> = {
            let conn = self.conn();
            let mut stmt = conn.prepare("SELECT id FROM users WHERE banned = 0 ORDER BY id")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids
        };
        let count = self.notify_many(&recipients, None, NotificationKind::Announcement { message })?;
        info!(admin_id = actor.id, recipients = count, "announcement sent");
        Ok(count)
    }

    /// Ids of every non-banned member except `except`.
    pub(crate) fn active_member_ids(&self, except: Option<i64>) -> Result<Vec<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id FROM users WHERE banned = 0 AND (?1 IS NULL OR id <> ?1) ORDER BY id",
        )?;
        let ids = stmt
            .query_map([except], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{insert_user, test_db};
    use crate::users::Role;

    #[test]
    fn kind_serializes_with_type_tag_and_camel_case_fields() {
        let kind = NotificationKind::PostCommented {
            post_id: 1,
            comment_id: 2,
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "POST_COMMENTED");
        assert_eq!(json["postId"], 1);
        assert_eq!(json["commentId"], 2);
        assert_eq!(json["type"], kind.type_name());

        let back: NotificationKind = serde_json::from_value(json).unwrap();
        assert_eq!(back, kind);
    }

    #[test]
    fn templates_use_actor_name() {
        let rendered = NotificationKind::SkillEndorsed {
            skill_id: 3,
            skill_name: "Rust".into(),
        }
        .render(Some("Ada"));
        assert_eq!(rendered.body, "Ada endorsed you for Rust");

        let anonymous = NotificationKind::PostLiked { post_id: 9 }.render(None);
        assert_eq!(anonymous.body, "Someone liked your post");
        assert_eq!(anonymous.link.as_deref(), Some("/posts/9"));
    }

    #[test]
    fn announcement_has_no_link() {
        let rendered = NotificationKind::Announcement {
            message: "Maintenance tonight".into(),
        }
        .render(None);
        assert_eq!(rendered.title, "Announcement");
        assert_eq!(rendered.body, "Maintenance tonight");
        assert!(rendered.link.is_none());
    }

    #[test]
    fn self_notifications_are_skipped() {
        let db = test_db();
        let user = insert_user(&db, "Solo", Role::User);
        let created = db
            .notify(user.id, Some(user.id), NotificationKind::PostLiked { post_id: 1 })
            .unwrap();
        assert!(created.is_none());
        assert_eq!(db.unread_count(&user).unwrap(), 0);
    }

    #[test]
    fn notify_list_and_mark_read() {
        let db = test_db();
        let user = insert_user(&db, "Target", Role::User);
        let actor = insert_user(&db, "Actor", Role::User);

        let n = db
            .notify(user.id, Some(actor.id), NotificationKind::PostLiked { post_id: 5 })
            .unwrap()
            .unwrap();
        assert_eq!(n.content.body, "Actor liked your post");
        assert_eq!(n.actor.as_ref().map(|a| a.id), Some(actor.id));
        assert!(!n.read);
        assert_eq!(db.unread_count(&user).unwrap(), 1);

        let read = db.mark_notification_read(&user, n.id).unwrap();
        assert!(read.read);
        assert_eq!(db.unread_count(&user).unwrap(), 0);
        assert!(db.list_notifications(&user, true, Page::default()).unwrap().is_empty());
        assert_eq!(db.list_notifications(&user, false, Page::default()).unwrap().len(), 1);
    }

    #[test]
    fn cannot_mark_someone_elses_notification() {
        let db = test_db();
        let user = insert_user(&db, "Target", Role::User);
        let other = insert_user(&db, "Other", Role::User);
        let n = db
            .notify(user.id, None, NotificationKind::PostLiked { post_id: 5 })
            .unwrap()
            .unwrap();
        assert!(matches!(
            db.mark_notification_read(&other, n.id),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn mark_all_read_counts_changes() {
        let db = test_db();
        let user = insert_user(&db, "Target", Role::User);
        for post_id in 0..3 {
            db.notify(user.id, None, NotificationKind::PostLiked { post_id }).unwrap();
        }
        assert_eq!(db.mark_all_notifications_read(&user).unwrap(), 3);
        assert_eq!(db.mark_all_notifications_read(&user).unwrap(), 0);
    }

    #[test]
    fn announce_reaches_active_members_only() {
        let db = test_db();
        let admin = insert_user(&db, "Admin", Role::Admin);
        let a = insert_user(&db, "A", Role::User);
        let b = insert_user(&db, "B", Role::User);
        db.set_banned(&admin, b.id, true).unwrap();

        let sent = db.announce(&admin, "Welcome!").unwrap();
        assert_eq!(sent, 2);
        assert_eq!(db.unread_count(&a).unwrap(), 1);
        assert_eq!(db.unread_count(&b).unwrap(), 0);

        assert!(matches!(db.announce(&a, "hi"), Err(Error::Forbidden(_))));
    }

    #[tokio::test]
    async fn notify_publishes_live_event() {
        let db = test_db();
        let user = insert_user(&db, "Target", Role::User);
        let mut sub = db.hub().subscribe(user.id);

        db.notify(user.id, None, NotificationKind::PostLiked { post_id: 1 })
            .unwrap();

        let event = sub.next().await.unwrap();
        assert!(matches!(event.payload, LivePayload::Notification(ref n) if n.user_id == user.id));
    }
}
