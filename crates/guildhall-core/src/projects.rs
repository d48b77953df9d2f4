// Member portfolio projects.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::{now, optional_url, require_text, Database, LikeToggle, Page};
use crate::error::{Error, Result};
use crate::likes::LikeTarget;
use crate::notifications::NotificationKind;
use crate::users::{member_from_row, MemberSummary, User};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: i64,
    pub owner: MemberSummary,
    pub title: String,
    pub description: String,
    pub repo_url: Option<String>,
    pub demo_url: Option<String>,
    pub like_count: i64,
    pub liked_by_me: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInput {
    pub title: String,
    pub description: String,
    pub repo_url: Option<String>,
    pub demo_url: Option<String>,
}

struct ValidProject {
    title: String,
    description: String,
    repo_url: Option<String>,
    demo_url: Option<String>,
}

impl ProjectInput {
    fn validate(&self) -> Result<ValidProject> {
        Ok(ValidProject {
            title: require_text("title", &self.title, 1, 120)?,
            description: require_text("description", &self.description, 1, 5000)?,
            repo_url: optional_url("repoUrl", self.repo_url.as_deref())?,
            demo_url: optional_url("demoUrl", self.demo_url.as_deref())?,
        })
    }
}

// ?1 is the viewing user (nullable).
const PROJECT_SELECT: &str = "
    SELECT p.id, p.title, p.description, p.repo_url, p.demo_url, p.created_at, p.updated_at,
           u.id, u.name, u.headline, u.avatar_url,
           (SELECT COUNT(*) FROM project_likes l WHERE l.project_id = p.id),
           EXISTS (SELECT 1 FROM project_likes l WHERE l.project_id = p.id AND l.user_id = ?1)
    FROM projects p
    JOIN users u ON u.id = p.owner_id";

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        repo_url: row.get(3)?,
        demo_url: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        owner: member_from_row(row, 7)?,
        like_count: row.get(11)?,
        liked_by_me: row.get(12)?,
    })
}

impl Database {
    pub fn create_project(&self, actor: &User, input: &ProjectInput) -> Result<Project> {
        let p = input.validate()?;
        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO projects (owner_id, title, description, repo_url, demo_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![actor.id, p.title, p.description, p.repo_url, p.demo_url, now()],
            )?;
            conn.last_insert_rowid()
        };
        info!(project_id = id, owner_id = actor.id, "project created");
        self.get_project(id, Some(actor.id))
    }

    pub fn get_project(&self, id: i64, viewer: Option<i64>) -> Result<Project> {
        self.conn()
            .query_row(
                &format!("{PROJECT_SELECT} WHERE p.id = ?2"),
                params![viewer, id],
                project_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::not_found("project", id))
    }

    /// Projects newest first, optionally for a single owner.
    pub fn list_projects(&self, viewer: Option<i64>, owner: Option<i64>, page: Page) -> Result<Vec<Project>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{PROJECT_SELECT}
             WHERE u.banned = 0 AND (?2 IS NULL OR p.owner_id = ?2)
             ORDER BY p.created_at DESC, p.id DESC
             LIMIT ?3 OFFSET ?4"
        ))?;
        let projects = stmt
            .query_map(params![viewer, owner, page.limit, page.offset], project_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(projects)
    }

    pub fn update_project(&self, actor: &User, id: i64, input: &ProjectInput) -> Result<Project> {
        let existing = self.get_project(id, None)?;
        actor.require_owner_or_admin(existing.owner.id, "project")?;
        let p = input.validate()?;
        self.conn().execute(
            "UPDATE projects SET title = ?1, description = ?2, repo_url = ?3, demo_url = ?4, updated_at = ?5
             WHERE id = ?6",
            params![p.title, p.description, p.repo_url, p.demo_url, now(), id],
        )?;
        self.get_project(id, Some(actor.id))
    }

    pub fn delete_project(&self, actor: &User, id: i64) -> Result<()> {
        let existing = self.get_project(id, None)?;
        actor.require_owner_or_admin(existing.owner.id, "project")?;
        self.conn().execute("DELETE FROM projects WHERE id = ?1", [id])?;
        info!(project_id = id, by = actor.id, "project deleted");
        Ok(())
    }

    pub fn toggle_project_like(&self, actor: &User, project_id: i64) -> Result<LikeToggle> {
        let (state, owner) = self.toggle_like(LikeTarget::Project, project_id, actor.id)?;
        if state.liked {
            let project_title: String = self.conn().query_row(
                "SELECT title FROM projects WHERE id = ?1",
                [project_id],
                |row| row.get(0),
            )?;
            self.notify(
                owner,
                Some(actor.id),
                NotificationKind::ProjectLiked { project_id, project_title },
            )?;
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{insert_user, test_db};
    use crate::users::Role;

    fn input(title: &str) -> ProjectInput {
        ProjectInput {
            title: title.into(),
            description: "A thing I built".into(),
            repo_url: Some("https://github.com/example/thing".into()),
            demo_url: None,
        }
    }

    #[test]
    fn create_and_list() {
        let db = test_db();
        let owner = insert_user(&db, "Owner", Role::User);
        let other = insert_user(&db, "Other", Role::User);
        db.create_project(&owner, &input("First")).unwrap();
        db.create_project(&other, &input("Second")).unwrap();

        let all = db.list_projects(None, None, Page::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].title, "Second");

        let mine = db.list_projects(None, Some(owner.id), Page::default()).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].owner.id, owner.id);
    }

    #[test]
    fn invalid_repo_url_rejected() {
        let db = test_db();
        let owner = insert_user(&db, "Owner", Role::User);
        let mut bad = input("Bad");
        bad.repo_url = Some("git@github.com:x/y".into());
        assert!(matches!(
            db.create_project(&owner, &bad),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn only_owner_or_admin_edits() {
        let db = test_db();
        let owner = insert_user(&db, "Owner", Role::User);
        let other = insert_user(&db, "Other", Role::User);
        let admin = insert_user(&db, "Admin", Role::Admin);
        let project = db.create_project(&owner, &input("Mine")).unwrap();

        assert!(matches!(
            db.update_project(&other, project.id, &input("Stolen")),
            Err(Error::Forbidden(_))
        ));
        let renamed = db.update_project(&admin, project.id, &input("Moderated")).unwrap();
        assert_eq!(renamed.title, "Moderated");

        assert!(db.delete_project(&other, project.id).is_err());
        db.delete_project(&owner, project.id).unwrap();
        assert!(db.get_project(project.id, None).is_err());
    }

    #[test]
    fn like_notifies_owner_with_title() {
        let db = test_db();
        let owner = insert_user(&db, "Owner", Role::User);
        let fan = insert_user(&db, "Fan", Role::User);
        let project = db.create_project(&owner, &input("Rocket")).unwrap();

        let state = db.toggle_project_like(&fan, project.id).unwrap();
        assert!(state.liked);
        assert!(db.get_project(project.id, Some(fan.id)).unwrap().liked_by_me);

        let notes = db.list_notifications(&owner, false, Page::default()).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(
            notes[0].kind,
            NotificationKind::ProjectLiked {
                project_id: project.id,
                project_title: "Rocket".into()
            }
        );

        let state = db.toggle_project_like(&fan, project.id).unwrap();
        assert_eq!(state, LikeToggle { liked: false, like_count: 0 });
        assert_eq!(db.list_notifications(&owner, false, Page::default()).unwrap().len(), 1);
    }
}
