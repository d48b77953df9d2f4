// Toggle-likes shared by posts, comments and projects.

use rusqlite::{params, OptionalExtension};

use crate::db::{now, Database, LikeToggle};
use crate::error::{Error, Result};

/// Something a member can like. Each target has its own join table keyed by
/// `(user_id, <item column>)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeTarget {
    Post,
    Comment,
    Project,
}

impl LikeTarget {
    fn entity(&self) -> &'static str {
        match self {
            LikeTarget::Post => "post",
            LikeTarget::Comment => "comment",
            LikeTarget::Project => "project",
        }
    }

    fn like_table(&self) -> &'static str {
        match self {
            LikeTarget::Post => "post_likes",
            LikeTarget::Comment => "comment_likes",
            LikeTarget::Project => "project_likes",
        }
    }

    fn item_column(&self) -> &'static str {
        match self {
            LikeTarget::Post => "post_id",
            LikeTarget::Comment => "comment_id",
            LikeTarget::Project => "project_id",
        }
    }

    /// Query returning the owner of the liked item.
    fn owner_query(&self) -> &'static str {
        match self {
            LikeTarget::Post => "SELECT author_id FROM posts WHERE id = ?1",
            LikeTarget::Comment => "SELECT author_id FROM comments WHERE id = ?1",
            LikeTarget::Project => "SELECT owner_id FROM projects WHERE id = ?1",
        }
    }
}

impl Database {
    /// Delete the like if it exists, create it otherwise. Returns the new
    /// state and the id of the item's owner.
    pub(crate) fn toggle_like(
        &self,
        target: LikeTarget,
        item_id: i64,
        user_id: i64,
    ) -> Result<(LikeToggle, i64)> {
        let table = target.like_table();
        let column = target.item_column();

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let owner_id: i64 = tx
            .query_row(target.owner_query(), [item_id], |row| row.get(0))
            .optional()?
            .ok_or_else(|| Error::not_found(target.entity(), item_id))?;

        let existing = tx.execute(
            &format!("DELETE FROM {table} WHERE user_id = ?1 AND {column} = ?2"),
            params![user_id, item_id],
        )?;
        let liked = if existing > 0 {
            false
        } else {
            tx.execute(
                &format!("INSERT INTO {table} (user_id, {column}, created_at) VALUES (?1, ?2, ?3)"),
                params![user_id, item_id, now()],
            )?;
            true
        };

        let like_count: i64 = tx.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE {column} = ?1"),
            [item_id],
            |row| row.get(0),
        )?;
        tx.commit()?;

        Ok((LikeToggle { liked, like_count }, owner_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{insert_user, test_db};
    use crate::users::Role;

    fn insert_post(db: &Database, author_id: i64) -> i64 {
        let conn = db.conn();
        conn.execute(
            "INSERT INTO posts (author_id, content, created_at, updated_at) VALUES (?1, 'hi', ?2, ?2)",
            params![author_id, now()],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    #[test]
    fn toggle_twice_restores_original_state() {
        let db = test_db();
        let author = insert_user(&db, "Author", Role::User);
        let fan = insert_user(&db, "Fan", Role::User);
        let post = insert_post(&db, author.id);

        let (first, owner) = db.toggle_like(LikeTarget::Post, post, fan.id).unwrap();
        assert_eq!(first, LikeToggle { liked: true, like_count: 1 });
        assert_eq!(owner, author.id);

        let (second, _) = db.toggle_like(LikeTarget::Post, post, fan.id).unwrap();
        assert_eq!(second, LikeToggle { liked: false, like_count: 0 });
    }

    #[test]
    fn counts_span_users() {
        let db = test_db();
        let author = insert_user(&db, "Author", Role::User);
        let a = insert_user(&db, "A", Role::User);
        let b = insert_user(&db, "B", Role::User);
        let post = insert_post(&db, author.id);

        db.toggle_like(LikeTarget::Post, post, a.id).unwrap();
        let (state, _) = db.toggle_like(LikeTarget::Post, post, b.id).unwrap();
        assert_eq!(state.like_count, 2);
    }

    #[test]
    fn missing_item_is_not_found() {
        let db = test_db();
        let user = insert_user(&db, "Fan", Role::User);
        assert!(matches!(
            db.toggle_like(LikeTarget::Project, 404, user.id),
            Err(Error::NotFound { entity: "project", .. })
        ));
    }

    #[test]
    fn duplicate_like_rows_rejected_by_schema() {
        let db = test_db();
        let author = insert_user(&db, "Author", Role::User);
        let post = insert_post(&db, author.id);
        let conn = db.conn();
        let insert = "INSERT INTO post_likes (user_id, post_id, created_at) VALUES (?1, ?2, ?3)";
        conn.execute(insert, params![author.id, post, now()]).unwrap();
        assert!(conn.execute(insert, params![author.id, post, now()]).is_err());
    }
}
