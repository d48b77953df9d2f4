// Courses, enrollment and progress tracking.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::articles::{slugify, unique_slug};
use crate::certificates::{insert_certificate, Certificate};
use crate::db::{now, require_text, Database, Page};
use crate::error::{conflict_on_unique, Error, Result};
use crate::users::{optional_member_from_row, MemberSummary, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CourseLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl CourseLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourseLevel::Beginner => "BEGINNER",
            CourseLevel::Intermediate => "INTERMEDIATE",
            CourseLevel::Advanced => "ADVANCED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BEGINNER" => Some(CourseLevel::Beginner),
            "INTERMEDIATE" => Some(CourseLevel::Intermediate),
            "ADVANCED" => Some(CourseLevel::Advanced),
            _ => None,
        }
    }
}

impl ToSql for CourseLevel {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for CourseLevel {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()
            .and_then(|s| CourseLevel::parse(s).ok_or(FromSqlError::InvalidType))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub level: CourseLevel,
    pub instructor: Option<MemberSummary>,
    pub published: bool,
    pub enrollment_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseInput {
    pub title: String,
    pub description: String,
    pub level: CourseLevel,
    pub instructor_id: Option<i64>,
    #[serde(default)]
    pub published: bool,
}

/// A member's enrollment in a course.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub course: Course,
    pub progress: u8,
    pub enrolled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Outcome of a progress update. `certificate` is set only on the update
/// that completed the course.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub enrollment: Enrollment,
    pub certificate: Option<Certificate>,
}

const COURSE_SELECT: &str = "
    SELECT c.id, c.slug, c.title, c.description, c.level, c.published, c.created_at, c.updated_at,
           (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id),
           i.id, i.name, i.headline, i.avatar_url
    FROM courses c
    LEFT JOIN users i ON i.id = c.instructor_id";

fn course_from_row(row: &Row<'_>) -> rusqlite::Result<Course> {
    Ok(Course {
        id: row.get(0)?,
        slug: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        level: row.get(4)?,
        published: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        enrollment_count: row.get(8)?,
        instructor: optional_member_from_row(row, 9)?,
    })
}

impl Database {
    fn check_instructor(&self, instructor_id: Option<i64>) -> Result<()> {
        if let Some(id) = instructor_id {
            self.get_user(id)?;
        }
        Ok(())
    }

    pub fn create_course(&self, actor: &User, input: &CourseInput) -> Result<Course> {
        actor.require_admin()?;
        let title = require_text("title", &input.title, 3, 200)?;
        let description = require_text("description", &input.description, 1, 20_000)?;
        self.check_instructor(input.instructor_id)?;

        let id = {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let slug = unique_slug(&tx, "courses", &slugify(&title), None)?;
            let ts = now();
            tx.execute(
                "INSERT INTO courses (slug, title, description, level, instructor_id, published, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![slug, title, description, input.level, input.instructor_id, input.published, ts],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            id
        };
        info!(course_id = id, "course created");
        self.get_course(id, Some(actor))
    }

    /// Unpublished courses are only visible to admins.
    pub fn get_course(&self, id: i64, viewer: Option<&User>) -> Result<Course> {
        let course = self
            .conn()
            .query_row(&format!("{COURSE_SELECT} WHERE c.id = ?1"), [id], course_from_row)
            .optional()?
            .ok_or_else(|| Error::not_found("course", id))?;
        if !course.published && !viewer.is_some_and(User::is_admin) {
            return Err(Error::not_found("course", id));
        }
        Ok(course)
    }

    pub fn list_courses(&self, viewer: Option<&User>, page: Page) -> Result<Vec<Course>> {
        let include_drafts = viewer.is_some_and(User::is_admin);
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{COURSE_SELECT}
             WHERE (?1 OR c.published = 1)
             ORDER BY c.title COLLATE NOCASE, c.id
             LIMIT ?2 OFFSET ?3"
        ))?;
        let courses = stmt
            .query_map(params![include_drafts, page.limit, page.offset], course_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(courses)
    }

    pub fn update_course(&self, actor: &User, id: i64, input: &CourseInput) -> Result<Course> {
        actor.require_admin()?;
        let existing = self.get_course(id, Some(actor))?;
        let title = require_text("title", &input.title, 3, 200)?;
        let description = require_text("description", &input.description, 1, 20_000)?;
        self.check_instructor(input.instructor_id)?;

        {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let slug = if title == existing.title {
                existing.slug
            } else {
                unique_slug(&tx, "courses", &slugify(&title), Some(id))?
            };
            tx.execute(
                "UPDATE courses
                 SET slug = ?1, title = ?2, description = ?3, level = ?4, instructor_id = ?5,
                     published = ?6, updated_at = ?7
                 WHERE id = ?8",
                params![slug, title, description, input.level, input.instructor_id, input.published, now(), id],
            )?;
            tx.commit()?;
        }
        self.get_course(id, Some(actor))
    }

    pub fn delete_course(&self, actor: &User, id: i64) -> Result<()> {
        actor.require_admin()?;
        let deleted = self.conn().execute("DELETE FROM courses WHERE id = ?1", [id])?;
        if deleted == 0 {
            return Err(Error::not_found("course", id));
        }
        info!(course_id = id, by = actor.id, "course deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Enrollment
    // -----------------------------------------------------------------------

    pub fn enroll(&self, actor: &User, course_id: i64) -> Result<Enrollment> {
        self.get_course(course_id, Some(actor))?;
        self.conn()
            .execute(
                "INSERT INTO enrollments (user_id, course_id, enrolled_at) VALUES (?1, ?2, ?3)",
                params![actor.id, course_id, now()],
            )
            .map_err(|e| conflict_on_unique(e, "already enrolled in this course"))?;
        info!(course_id, user_id = actor.id, "enrolled");
        self.get_enrollment(actor, course_id)
    }

    pub fn unenroll(&self, actor: &User, course_id: i64) -> Result<()> {
        let deleted = self.conn().execute(
            "DELETE FROM enrollments WHERE user_id = ?1 AND course_id = ?2",
            params![actor.id, course_id],
        )?;
        if deleted == 0 {
            return Err(Error::not_found("enrollment", course_id));
        }
        Ok(())
    }

    pub fn get_enrollment(&self, actor: &User, course_id: i64) -> Result<Enrollment> {
        let row: Option<(u8, DateTime<Utc>, Option<DateTime<Utc>>)> = self
            .conn()
            .query_row(
                "SELECT progress, enrolled_at, completed_at FROM enrollments
                 WHERE user_id = ?1 AND course_id = ?2",
                params![actor.id, course_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let (progress, enrolled_at, completed_at) =
            row.ok_or_else(|| Error::not_found("enrollment", course_id))?;
        Ok(Enrollment {
            course: self.get_course(course_id, Some(actor))?,
            progress,
            enrolled_at,
            completed_at,
        })
    }

    /// Record progress. Reaching 100 completes the course once and issues a
    /// certificate in the same transaction; a completed course cannot go
    /// backwards.
    pub fn update_progress(&self, actor: &User, course_id: i64, progress: i64) -> Result<ProgressUpdate> {
        if !(0..=100).contains(&progress) {
            return Err(Error::validation("progress", "must be between 0 and 100"));
        }
        let course = self.get_course(course_id, Some(actor))?;

        let issued = {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let current: Option<(i64, Option<DateTime<Utc>>)> = tx
                .query_row(
                    "SELECT progress, completed_at FROM enrollments WHERE user_id = ?1 AND course_id = ?2",
                    params![actor.id, course_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let (old, completed_at) = current.ok_or_else(|| Error::not_found("enrollment", course_id))?;

            if completed_at.is_some() && progress < old {
                return Err(Error::validation(
                    "progress",
                    "cannot decrease after the course is completed",
                ));
            }
            let completes = completed_at.is_none() && progress == 100;
            tx.execute(
                "UPDATE enrollments
                 SET progress = ?1, completed_at = CASE WHEN ?2 THEN ?3 ELSE completed_at END
                 WHERE user_id = ?4 AND course_id = ?5",
                params![progress, completes, now(), actor.id, course_id],
            )?;
            let issued = if completes {
                Some(insert_certificate(&tx, actor.id, &course.title, Some(course_id), None)?)
            } else {
                None
            };
            tx.commit()?;
            issued
        };

        let certificate = match issued {
            Some(id) => {
                info!(course_id, user_id = actor.id, "course completed");
                Some(self.announce_certificate(&id, actor.id, &course.title, None)?)
            }
            None => None,
        };

        Ok(ProgressUpdate {
            enrollment: self.get_enrollment(actor, course_id)?,
            certificate,
        })
    }

    /// The caller's enrollments in visible courses, most recent first.
    pub fn my_courses(&self, actor: &User) -> Result<Vec<Enrollment>> {
        let course_ids: Vec<i64> = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT e.course_id FROM enrollments e
                 JOIN courses c ON c.id = e.course_id
                 WHERE e.user_id = ?1 AND (c.published = 1 OR ?2)
                 ORDER BY e.enrolled_at DESC, e.course_id DESC",
            )?;
            let ids = stmt
                .query_map(params![actor.id, actor.is_admin()], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids
        };
        course_ids
            .into_iter()
            .map(|id| self.get_enrollment(actor, id))
            .collect()
    }
}
