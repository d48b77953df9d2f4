// Chat channels, membership and messages.
//
// Public channels are visible to every member and open to join. Private
// channels are visible only to their members (and admins), who are added by
// an owner or an admin.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::db::{now, optional_text, require_text, Database};
use crate::error::{conflict_on_unique, Error, Result};
use crate::live::{LiveEvent, LivePayload};
use crate::notifications::NotificationKind;
use crate::users::{member_from_row, MemberSummary, User};

const MAX_CHANNEL_NAME: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelRole {
    Owner,
    Member,
}

impl ChannelRole {
    fn as_str(&self) -> &'static str {
        match self {
            ChannelRole::Owner => "OWNER",
            ChannelRole::Member => "MEMBER",
        }
    }
}

impl ToSql for ChannelRole {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ChannelRole {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "OWNER" => Ok(ChannelRole::Owner),
            "MEMBER" => Ok(ChannelRole::Member),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// A channel as seen by a particular member.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub created_by: Option<i64>,
    pub member_count: i64,
    /// The viewer's role, `None` when not a member.
    pub my_role: Option<ChannelRole>,
    pub unread_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInput {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub is_private: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMember {
    #[serde(flatten)]
    pub member: MemberSummary,
    pub role: ChannelRole,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub channel_id: i64,
    pub author: MemberSummary,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Channel names: letters, digits, `-` and `_`, stored lowercase.
pub fn validate_channel_name(name: &str) -> Result<String> {
    let name = require_text("name", name.trim_start_matches('#'), 1, MAX_CHANNEL_NAME)?;
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::validation(
            "name",
            "may only contain letters, digits, '-' and '_'",
        ));
    }
    Ok(name.to_lowercase())
}

// ?1 is the viewing user.
const CHANNEL_SELECT: &str = "
    SELECT c.id, c.name, c.description, c.is_private, c.created_by, c.created_at,
           (SELECT COUNT(*) FROM chat_members m WHERE m.channel_id = c.id),
           me.role,
           CASE WHEN me.user_id IS NULL THEN 0 ELSE
               (SELECT COUNT(*) FROM chat_messages msg
                WHERE msg.channel_id = c.id AND msg.id > me.last_read_id AND msg.author_id <> ?1)
           END
    FROM chat_channels c
    LEFT JOIN chat_members me ON me.channel_id = c.id AND me.user_id = ?1";

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        is_private: row.get(3)?,
        created_by: row.get(4)?,
        created_at: row.get(5)?,
        member_count: row.get(6)?,
        my_role: row.get(7)?,
        unread_count: row.get(8)?,
    })
}

const MESSAGE_SELECT: &str = "
    SELECT m.id, m.channel_id, m.content, m.created_at,
           u.id, u.name, u.headline, u.avatar_url
    FROM chat_messages m
    JOIN users u ON u.id = m.author_id";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get(3)?,
        author: member_from_row(row, 4)?,
    })
}

impl Channel {
    pub fn is_member(&self) -> bool {
        self.my_role.is_some()
    }

    fn visible_to(&self, viewer: &User) -> bool {
        !self.is_private || self.is_member() || viewer.is_admin()
    }

    fn managed_by(&self, viewer: &User) -> bool {
        self.my_role == Some(ChannelRole::Owner) || viewer.is_admin()
    }
}

impl Database {
    // -----------------------------------------------------------------------
    // Channels
    // -----------------------------------------------------------------------

    /// Create a channel; the creator becomes its owner.
    pub fn create_channel(&self, actor: &User, input: &ChannelInput) -> Result<Channel> {
        let name = validate_channel_name(&input.name)?;
        let description = optional_text("description", input.description.as_deref(), 500)?;
        let id = {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let ts = now();
            tx.execute(
                "INSERT INTO chat_channels (name, description, is_private, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![name, description, input.is_private, actor.id, ts],
            )
            .map_err(|e| conflict_on_unique(e, "a channel with this name already exists"))?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO chat_members (channel_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
                params![id, actor.id, ChannelRole::Owner, ts],
            )?;
            tx.commit()?;
            id
        };
        info!(channel_id = id, name = %name, private = input.is_private, "channel created");
        self.get_channel(actor, id)
    }

    /// A channel visible to `viewer`. Private channels the viewer cannot see
    /// are reported as not found.
    pub fn get_channel(&self, viewer: &User, id: i64) -> Result<Channel> {
        let channel = self
            .conn()
            .query_row(
                &format!("{CHANNEL_SELECT} WHERE c.id = ?2"),
                params![viewer.id, id],
                channel_from_row,
            )
            .optional()?
            .filter(|c| c.visible_to(viewer))
            .ok_or_else(|| Error::not_found("channel", id))?;
        Ok(channel)
    }

    /// Public channels plus the private ones the viewer belongs to.
    pub fn list_channels(&self, viewer: &User) -> Result<Vec<Channel>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{CHANNEL_SELECT}
             WHERE c.is_private = 0 OR me.user_id IS NOT NULL
             ORDER BY c.name"
        ))?;
        let channels = stmt
            .query_map([viewer.id], channel_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(channels)
    }

    pub fn join_channel(&self, actor: &User, id: i64) -> Result<Channel> {
        let channel = self.get_channel(actor, id)?;
        if channel.is_private {
            return Err(Error::forbidden("private channels are invite-only"));
        }
        self.conn()
            .execute(
                "INSERT INTO chat_members (channel_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
                params![id, actor.id, ChannelRole::Member, now()],
            )
            .map_err(|e| conflict_on_unique(e, "already a member of this channel"))?;
        self.get_channel(actor, id)
    }

    pub fn leave_channel(&self, actor: &User, id: i64) -> Result<()> {
        let removed = self.conn().execute(
            "DELETE FROM chat_members WHERE channel_id = ?1 AND user_id = ?2",
            params![id, actor.id],
        )?;
        if removed == 0 {
            return Err(Error::not_found("channel membership", id));
        }
        Ok(())
    }

    pub fn list_channel_members(&self, viewer: &User, id: i64) -> Result<Vec<ChannelMember>> {
        self.get_channel(viewer, id)?;
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT u.id, u.name, u.headline, u.avatar_url, m.role, m.joined_at
             FROM chat_members m
             JOIN users u ON u.id = m.user_id
             WHERE m.channel_id = ?1
             ORDER BY m.role DESC, u.name COLLATE NOCASE",
        )?;
        let members = stmt
            .query_map([id], |row| {
                Ok(ChannelMember {
                    member: member_from_row(row, 0)?,
                    role: row.get(4)?,
                    joined_at: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(members)
    }

    /// Add a member on an owner's or admin's behalf. The new member is
    /// notified.
    pub fn add_channel_member(&self, actor: &User, channel_id: i64, user_id: i64) -> Result<ChannelMember> {
        let channel = self.get_channel(actor, channel_id)?;
        if !channel.managed_by(actor) {
            return Err(Error::forbidden("only channel owners may add members"));
        }
        let user = self.get_user(user_id)?;
        if user.banned {
            return Err(Error::validation("userId", "banned members cannot be added"));
        }
        let ts = now();
        self.conn()
            .execute(
                "INSERT INTO chat_members (channel_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
                params![channel_id, user_id, ChannelRole::Member, ts],
            )
            .map_err(|e| conflict_on_unique(e, "already a member of this channel"))?;

        self.notify(
            user_id,
            Some(actor.id),
            NotificationKind::ChannelInvite {
                channel_id,
                channel_name: channel.name,
            },
        )?;
        Ok(ChannelMember {
            member: user.summary(),
            role: ChannelRole::Member,
            joined_at: ts,
        })
    }

    pub fn delete_channel(&self, actor: &User, id: i64) -> Result<()> {
        let channel = self.get_channel(actor, id)?;
        if !channel.managed_by(actor) {
            return Err(Error::forbidden("only channel owners may delete a channel"));
        }
        self.conn().execute("DELETE FROM chat_channels WHERE id = ?1", [id])?;
        info!(channel_id = id, by = actor.id, "channel deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// Post a message as a channel member and push it to the other members.
    pub fn post_message(
        &self,
        actor: &User,
        channel_id: i64,
        content: &str,
        max_length: usize,
    ) -> Result<ChatMessage> {
        let channel = self.get_channel(actor, channel_id)?;
        if !channel.is_member() {
            return Err(Error::forbidden("join the channel to post"));
        }
        let content = require_text("content", content, 1, max_length)?;

        let (message, recipients) = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO chat_messages (channel_id, author_id, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![channel_id, actor.id, content, now()],
            )?;
            let id = conn.last_insert_rowid();
            let message = conn.query_row(
                &format!("{MESSAGE_SELECT} WHERE m.id = ?1"),
                [id],
                message_from_row,
            )?;
            let mut stmt = conn.prepare(
                "SELECT user_id FROM chat_members WHERE channel_id = ?1 AND user_id <> ?2",
            )?;
            let recipients = stmt
                .query_map(params![channel_id, actor.id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;
            (message, recipients)
        };
        debug!(message_id = message.id, channel_id, recipients = recipients.len(), "chat message posted");

        self.hub().publish(LiveEvent {
            recipients,
            payload: LivePayload::Chat(message.clone()),
        });
        Ok(message)
    }

    /// Poll a channel. With `after_id`, messages newer than it; otherwise the
    /// latest `limit` messages. Always in ascending id order.
    pub fn list_messages(
        &self,
        viewer: &User,
        channel_id: i64,
        after_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<ChatMessage>> {
        self.get_channel(viewer, channel_id)?;
        let conn = self.conn();
        let messages = match after_id {
            Some(after) => {
                let mut stmt = conn.prepare(&format!(
                    "{MESSAGE_SELECT} WHERE m.channel_id = ?1 AND m.id > ?2 ORDER BY m.id LIMIT ?3"
                ))?;
                let rows = stmt
                    .query_map(params![channel_id, after, limit], message_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "{MESSAGE_SELECT} WHERE m.channel_id = ?1 ORDER BY m.id DESC LIMIT ?2"
                ))?;
                let mut rows = stmt
                    .query_map(params![channel_id, limit], message_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows.reverse();
                rows
            }
        };
        Ok(messages)
    }

    /// Record that the member has read up to `up_to` (or the newest message).
    /// The read marker never moves backwards. Returns the stored marker.
    pub fn mark_channel_read(&self, actor: &User, channel_id: i64, up_to: Option<i64>) -> Result<i64> {
        let channel = self.get_channel(actor, channel_id)?;
        if !channel.is_member() {
            return Err(Error::forbidden("not a member of this channel"));
        }
        let conn = self.conn();
        let target: i64 = match up_to {
            Some(id) => id,
            None => conn.query_row(
                "SELECT COALESCE(MAX(id), 0) FROM chat_messages WHERE channel_id = ?1",
                [channel_id],
                |row| row.get(0),
            )?,
        };
        conn.execute(
            "UPDATE chat_members SET last_read_id = MAX(last_read_id, ?1)
             WHERE channel_id = ?2 AND user_id = ?3",
            params![target, channel_id, actor.id],
        )?;
        let stored = conn.query_row(
            "SELECT last_read_id FROM chat_members WHERE channel_id = ?1 AND user_id = ?2",
            params![channel_id, actor.id],
            |row| row.get(0),
        )?;
        Ok(stored)
    }

    pub fn delete_message(&self, actor: &User, message_id: i64) -> Result<()> {
        let author_id: i64 = self
            .conn()
            .query_row(
                "SELECT author_id FROM chat_messages WHERE id = ?1",
                [message_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::not_found("message", message_id))?;
        actor.require_owner_or_admin(author_id, "message")?;
        self.conn()
            .execute("DELETE FROM chat_messages WHERE id = ?1", [message_id])?;
        Ok(())
    }
}
