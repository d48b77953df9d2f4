// Community events and RSVPs.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::{now, optional_text, optional_url, require_text, Database, Page};
use crate::error::{Error, Result};
use crate::notifications::NotificationKind;
use crate::users::{optional_member_from_row, MemberSummary, User};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub location: Option<String>,
    pub url: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub organizer: Option<MemberSummary>,
    pub attendee_count: i64,
    pub attending_by_me: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    pub title: String,
    pub description: String,
    pub location: Option<String>,
    pub url: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RsvpToggle {
    pub attending: bool,
    pub attendee_count: i64,
}

struct ValidEvent {
    title: String,
    description: String,
    location: Option<String>,
    url: Option<String>,
}

impl EventInput {
    fn validate(&self) -> Result<ValidEvent> {
        if self.ends_at <= self.starts_at {
            return Err(Error::validation("endsAt", "must be after startsAt"));
        }
        Ok(ValidEvent {
            title: require_text("title", &self.title, 1, 200)?,
            description: require_text("description", &self.description, 1, 10_000)?,
            location: optional_text("location", self.location.as_deref(), 300)?,
            url: optional_url("url", self.url.as_deref())?,
        })
    }
}

// ?1 is the viewing user (nullable).
const EVENT_SELECT: &str = "
    SELECT e.id, e.title, e.description, e.location, e.url, e.starts_at, e.ends_at,
           e.created_at, e.updated_at,
           (SELECT COUNT(*) FROM event_attendees a WHERE a.event_id = e.id),
           EXISTS (SELECT 1 FROM event_attendees a WHERE a.event_id = e.id AND a.user_id = ?1),
           o.id, o.name, o.headline, o.avatar_url
    FROM events e
    LEFT JOIN users o ON o.id = e.organizer_id";

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        location: row.get(3)?,
        url: row.get(4)?,
        starts_at: row.get(5)?,
        ends_at: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        attendee_count: row.get(9)?,
        attending_by_me: row.get(10)?,
        organizer: optional_member_from_row(row, 11)?,
    })
}

impl Database {
    /// Create an event and tell every active member about it.
    pub fn create_event(&self, actor: &User, input: &EventInput) -> Result<Event> {
        actor.require_admin()?;
        let e = input.validate()?;
        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO events (title, description, location, url, starts_at, ends_at, organizer_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![e.title, e.description, e.location, e.url, input.starts_at, input.ends_at, actor.id, now()],
            )?;
            conn.last_insert_rowid()
        };
        let event = self.get_event(id, Some(actor.id))?;

        let recipients = self.active_member_ids(Some(actor.id))?;
        let notified = self.notify_many(
            &recipients,
            Some(actor.id),
            NotificationKind::EventCreated {
                event_id: id,
                title: event.title.clone(),
                starts_at: event.starts_at,
            },
        )?;
        info!(event_id = id, notified, "event created");
        Ok(event)
    }

    pub fn get_event(&self, id: i64, viewer: Option<i64>) -> Result<Event> {
        self.conn()
            .query_row(
                &format!("{EVENT_SELECT} WHERE e.id = ?2"),
                params![viewer, id],
                event_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::not_found("event", id))
    }

    /// Events in start order. With `upcoming`, only events that have not
    /// ended yet.
    pub fn list_events(&self, viewer: Option<i64>, upcoming: bool, page: Page) -> Result<Vec<Event>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{EVENT_SELECT}
             WHERE (?2 = 0 OR e.ends_at >= ?3)
             ORDER BY e.starts_at, e.id
             LIMIT ?4 OFFSET ?5"
        ))?;
        let events = stmt
            .query_map(
                params![viewer, upcoming, now(), page.limit, page.offset],
                event_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Every event, for the calendar feed.
    pub fn all_events(&self) -> Result<Vec<Event>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{EVENT_SELECT} ORDER BY e.starts_at, e.id"))?;
        let events = stmt
            .query_map(params![Option::<i64>::None], event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    pub fn update_event(&self, actor: &User, id: i64, input: &EventInput) -> Result<Event> {
        actor.require_admin()?;
        let e = input.validate()?;
        let changed = self.conn().execute(
            "UPDATE events
             SET title = ?1, description = ?2, location = ?3, url = ?4, starts_at = ?5, ends_at = ?6,
                 updated_at = ?7
             WHERE id = ?8",
            params![e.title, e.description, e.location, e.url, input.starts_at, input.ends_at, now(), id],
        )?;
        if changed == 0 {
            return Err(Error::not_found("event", id));
        }
        self.get_event(id, Some(actor.id))
    }

    pub fn delete_event(&self, actor: &User, id: i64) -> Result<()> {
        actor.require_admin()?;
        let deleted = self.conn().execute("DELETE FROM events WHERE id = ?1", [id])?;
        if deleted == 0 {
            return Err(Error::not_found("event", id));
        }
        info!(event_id = id, by = actor.id, "event deleted");
        Ok(())
    }

    /// Attend if not attending, cancel otherwise.
    pub fn toggle_rsvp(&self, actor: &User, event_id: i64) -> Result<RsvpToggle> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let exists: bool = tx.query_row(
            "SELECT EXISTS (SELECT 1 FROM events WHERE id = ?1)",
            [event_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(Error::not_found("event", event_id));
        }

        let removed = tx.execute(
            "DELETE FROM event_attendees WHERE event_id = ?1 AND user_id = ?2",
            params![event_id, actor.id],
        )?;
        let attending = if removed > 0 {
            false
        } else {
            tx.execute(
                "INSERT INTO event_attendees (event_id, user_id, created_at) VALUES (?1, ?2, ?3)",
                params![event_id, actor.id, now()],
            )?;
            true
        };
        let attendee_count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM event_attendees WHERE event_id = ?1",
            [event_id],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(RsvpToggle {
            attending,
            attendee_count,
        })
    }
}
