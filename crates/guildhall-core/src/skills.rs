// Skills on member profiles and peer endorsements.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tracing::info;

use crate::db::{now, require_text, Database};
use crate::error::{conflict_on_unique, Error, Result};
use crate::notifications::NotificationKind;
use crate::users::User;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Skill {
    pub id: i64,
    pub name: String,
    pub member_count: i64,
}

/// A skill as listed on a member's profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSkill {
    pub skill_id: i64,
    pub name: String,
    pub endorsements: i64,
    /// Whether the viewing member has endorsed this skill.
    pub endorsed_by_me: bool,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndorsementState {
    pub endorsed: bool,
    pub endorsements: i64,
}

impl Database {
    /// Every known skill with how many members list it.
    pub fn list_skills(&self, query: Option<&str>) -> Result<Vec<Skill>> {
        let pattern = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(crate::users::like_pattern);
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT s.id, s.name, (SELECT COUNT(*) FROM user_skills us WHERE us.skill_id = s.id)
             FROM skills s
             WHERE ?1 IS NULL OR s.name LIKE ?1 ESCAPE '\\'
             ORDER BY s.name COLLATE NOCASE",
        )?;
        let skills = stmt
            .query_map([pattern], |row| {
                Ok(Skill {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    member_count: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(skills)
    }

    /// Add a skill to the caller's profile, creating the skill if nobody has
    /// used the name before. Names match case-insensitively.
    pub fn add_skill(&self, actor: &User, name: &str) -> Result<UserSkill> {
        let name = require_text("name", name, 1, 50)?;
        let skill_id = {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            tx.execute("INSERT OR IGNORE INTO skills (name) VALUES (?1)", [&name])?;
            let skill_id: i64 =
                tx.query_row("SELECT id FROM skills WHERE name = ?1", [&name], |row| row.get(0))?;
            tx.execute(
                "INSERT INTO user_skills (user_id, skill_id, created_at) VALUES (?1, ?2, ?3)",
                params![actor.id, skill_id, now()],
            )
            .map_err(|e| conflict_on_unique(e, "skill already on your profile"))?;
            tx.commit()?;
            skill_id
        };
        info!(user_id = actor.id, skill_id, "skill added");
        self.user_skill(actor.id, skill_id, None)?
            .ok_or_else(|| Error::not_found("skill", skill_id))
    }

    /// Remove a skill (and its endorsements) from the caller's profile.
    pub fn remove_skill(&self, actor: &User, skill_id: i64) -> Result<()> {
        let removed = self.conn().execute(
            "DELETE FROM user_skills WHERE user_id = ?1 AND skill_id = ?2",
            params![actor.id, skill_id],
        )?;
        if removed == 0 {
            return Err(Error::not_found("skill", skill_id));
        }
        Ok(())
    }

    fn user_skill(&self, user_id: i64, skill_id: i64, viewer: Option<i64>) -> Result<Option<UserSkill>> {
        let skill = self
            .conn()
            .query_row(
                "SELECT s.id, s.name, us.endorsements, us.created_at,
                        EXISTS (SELECT 1 FROM endorsements e
                                WHERE e.user_id = us.user_id AND e.skill_id = us.skill_id
                                  AND e.endorser_id = ?3)
                 FROM user_skills us
                 JOIN skills s ON s.id = us.skill_id
                 WHERE us.user_id = ?1 AND us.skill_id = ?2",
                params![user_id, skill_id, viewer],
                |row| {
                    Ok(UserSkill {
                        skill_id: row.get(0)?,
                        name: row.get(1)?,
                        endorsements: row.get(2)?,
                        added_at: row.get(3)?,
                        endorsed_by_me: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(skill)
    }

    /// A member's skills, most endorsed first.
    pub fn user_skills(&self, user_id: i64, viewer: Option<i64>) -> Result<Vec<UserSkill>> {
        self.get_user(user_id)?;
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT s.id, s.name, us.endorsements, us.created_at,
                    EXISTS (SELECT 1 FROM endorsements e
                            WHERE e.user_id = us.user_id AND e.skill_id = us.skill_id
                              AND e.endorser_id = ?2)
             FROM user_skills us
             JOIN skills s ON s.id = us.skill_id
             WHERE us.user_id = ?1
             ORDER BY us.endorsements DESC, s.name COLLATE NOCASE",
        )?;
        let skills = stmt
            .query_map(params![user_id, viewer], |row| {
                Ok(UserSkill {
                    skill_id: row.get(0)?,
                    name: row.get(1)?,
                    endorsements: row.get(2)?,
                    added_at: row.get(3)?,
                    endorsed_by_me: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(skills)
    }

    /// Endorse `user_id` for a skill on their profile.
    pub fn endorse(&self, endorser: &User, user_id: i64, skill_id: i64) -> Result<EndorsementState> {
        if endorser.id == user_id {
            return Err(Error::validation("userId", "you cannot endorse yourself"));
        }

        let (skill_name, endorsements) = {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let skill_name: String = tx
                .query_row(
                    "SELECT s.name FROM user_skills us JOIN skills s ON s.id = us.skill_id
                     WHERE us.user_id = ?1 AND us.skill_id = ?2",
                    params![user_id, skill_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| Error::not_found("skill", skill_id))?;

            tx.execute(
                "INSERT INTO endorsements (endorser_id, user_id, skill_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![endorser.id, user_id, skill_id, now()],
            )
            .map_err(|e| conflict_on_unique(e, "you already endorsed this skill"))?;
            tx.execute(
                "UPDATE user_skills SET endorsements = endorsements + 1
                 WHERE user_id = ?1 AND skill_id = ?2",
                params![user_id, skill_id],
            )?;
            let endorsements: i64 = tx.query_row(
                "SELECT endorsements FROM user_skills WHERE user_id = ?1 AND skill_id = ?2",
                params![user_id, skill_id],
                |row| row.get(0),
            )?;
            tx.commit()?;
            (skill_name, endorsements)
        };

        self.notify(
            user_id,
            Some(endorser.id),
            NotificationKind::SkillEndorsed {
                skill_id,
                skill_name,
            },
        )?;
        Ok(EndorsementState {
            endorsed: true,
            endorsements,
        })
    }

    pub fn withdraw_endorsement(&self, endorser: &User, user_id: i64, skill_id: i64) -> Result<EndorsementState> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM endorsements WHERE endorser_id = ?1 AND user_id = ?2 AND skill_id = ?3",
            params![endorser.id, user_id, skill_id],
        )?;
        if removed == 0 {
            return Err(Error::not_found("endorsement", skill_id));
        }
        tx.execute(
            "UPDATE user_skills SET endorsements = MAX(endorsements - 1, 0)
             WHERE user_id = ?1 AND skill_id = ?2",
            params![user_id, skill_id],
        )?;
        let endorsements: i64 = tx.query_row(
            "SELECT endorsements FROM user_skills WHERE user_id = ?1 AND skill_id = ?2",
            params![user_id, skill_id],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(EndorsementState {
            endorsed: false,
            endorsements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{insert_user, test_db};
    use crate::db::Page;
    use crate::users::Role;

    #[test]
    fn add_skill_connects_or_creates() {
        let db = test_db();
        let a = insert_user(&db, "A", Role::User);
        let b = insert_user(&db, "B", Role::User);

        let first = db.add_skill(&a, "Rust").unwrap();
        let second = db.add_skill(&b, "rust").unwrap();
        assert_eq!(first.skill_id, second.skill_id);
        assert_eq!(second.name, "Rust", "original spelling kept");

        let skills = db.list_skills(None).unwrap();
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].member_count, 2);
        assert_eq!(db.list_skills(Some("ru")).unwrap().len(), 1);
        assert!(db.list_skills(Some("python")).unwrap().is_empty());
    }

    #[test]
    fn duplicate_assignment_conflicts() {
        let db = test_db();
        let a = insert_user(&db, "A", Role::User);
        db.add_skill(&a, "SQL").unwrap();
        assert!(matches!(db.add_skill(&a, "sql"), Err(Error::Conflict(_))));
    }

    #[test]
    fn self_endorsement_rejected() {
        let db = test_db();
        let a = insert_user(&db, "A", Role::User);
        let skill = db.add_skill(&a, "Go").unwrap();
        assert!(matches!(
            db.endorse(&a, a.id, skill.skill_id),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn endorsement_requires_assigned_skill() {
        let db = test_db();
        let a = insert_user(&db, "A", Role::User);
        let b = insert_user(&db, "B", Role::User);
        let skill = db.add_skill(&b, "Go").unwrap();
        assert!(matches!(
            db.endorse(&b, a.id, skill.skill_id),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn endorse_once_then_withdraw() {
        let db = test_db();
        let member = insert_user(&db, "Member", Role::User);
        let fan = insert_user(&db, "Fan", Role::User);
        let skill = db.add_skill(&member, "Kubernetes").unwrap();

        let state = db.endorse(&fan, member.id, skill.skill_id).unwrap();
        assert_eq!(state, EndorsementState { endorsed: true, endorsements: 1 });
        assert!(matches!(
            db.endorse(&fan, member.id, skill.skill_id),
            Err(Error::Conflict(_))
        ));

        let listed = db.user_skills(member.id, Some(fan.id)).unwrap();
        assert_eq!(listed[0].endorsements, 1);
        assert!(listed[0].endorsed_by_me);

        let notes = db.list_notifications(&member, false, Page::default()).unwrap();
        assert_eq!(
            notes[0].kind,
            NotificationKind::SkillEndorsed {
                skill_id: skill.skill_id,
                skill_name: "Kubernetes".into()
            }
        );

        let state = db.withdraw_endorsement(&fan, member.id, skill.skill_id).unwrap();
        assert_eq!(state, EndorsementState { endorsed: false, endorsements: 0 });
        assert!(db.withdraw_endorsement(&fan, member.id, skill.skill_id).is_err());
    }

    #[test]
    fn removing_skill_drops_endorsements() {
        let db = test_db();
        let member = insert_user(&db, "Member", Role::User);
        let fan = insert_user(&db, "Fan", Role::User);
        let skill = db.add_skill(&member, "Design").unwrap();
        db.endorse(&fan, member.id, skill.skill_id).unwrap();

        db.remove_skill(&member, skill.skill_id).unwrap();
        assert!(db.user_skills(member.id, None).unwrap().is_empty());
        let rows: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM endorsements", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 0);

        let again = db.add_skill(&member, "design").unwrap();
        assert_eq!(again.endorsements, 0);
    }
}
