// Feed posts and their comments.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::{now, optional_url, require_text, Database, LikeToggle, Page};
use crate::error::{Error, Result};
use crate::likes::LikeTarget;
use crate::notifications::NotificationKind;
use crate::users::{member_from_row, MemberSummary, User};

const MAX_POST_LENGTH: usize = 5000;
const MAX_COMMENT_LENGTH: usize = 2000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: i64,
    pub author: MemberSummary,
    pub content: String,
    pub image_url: Option<String>,
    pub like_count: i64,
    pub comment_count: i64,
    pub liked_by_me: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostInput {
    pub content: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub parent_id: Option<i64>,
    pub author: MemberSummary,
    pub content: String,
    pub like_count: i64,
    pub liked_by_me: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentInput {
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
}

// `?1` is always the viewer id (or NULL for anonymous).
const POST_SELECT: &str = "
    SELECT p.id, p.content, p.image_url, p.created_at, p.updated_at,
           u.id, u.name, u.headline, u.avatar_url,
           (SELECT COUNT(*) FROM post_likes l WHERE l.post_id = p.id),
           (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id),
           EXISTS (SELECT 1 FROM post_likes l WHERE l.post_id = p.id AND l.user_id = ?1)
    FROM posts p
    JOIN users u ON u.id = p.author_id";

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        content: row.get(1)?,
        image_url: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        author: member_from_row(row, 5)?,
        like_count: row.get(9)?,
        comment_count: row.get(10)?,
        liked_by_me: row.get(11)?,
    })
}

const COMMENT_SELECT: &str = "
    SELECT c.id, c.post_id, c.parent_id, c.content, c.created_at, c.updated_at,
           u.id, u.name, u.headline, u.avatar_url,
           (SELECT COUNT(*) FROM comment_likes l WHERE l.comment_id = c.id),
           EXISTS (SELECT 1 FROM comment_likes l WHERE l.comment_id = c.id AND l.user_id = ?1)
    FROM comments c
    JOIN users u ON u.id = c.author_id";

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        post_id: row.get(1)?,
        parent_id: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        author: member_from_row(row, 6)?,
        like_count: row.get(10)?,
        liked_by_me: row.get(11)?,
    })
}

impl Database {
    // -----------------------------------------------------------------------
    // Posts
    // -----------------------------------------------------------------------

    pub fn create_post(&self, actor: &User, input: &PostInput) -> Result<Post> {
        let content = require_text("content", &input.content, 1, MAX_POST_LENGTH)?;
        let image_url = optional_url("imageUrl", input.image_url.as_deref())?;
        let ts = now();
        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO posts (author_id, content, image_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![actor.id, content, image_url, ts],
            )?;
            conn.last_insert_rowid()
        };
        info!(post_id = id, author_id = actor.id, "post created");
        self.get_post(id, Some(actor.id))
    }

    pub fn get_post(&self, id: i64, viewer: Option<i64>) -> Result<Post> {
        self.conn()
            .query_row(
                &format!("{POST_SELECT} WHERE p.id = ?2"),
                params![viewer, id],
                post_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::not_found("post", id))
    }

    /// Newest-first feed, optionally restricted to one author. Posts by
    /// suspended members are hidden.
    pub fn list_posts(&self, viewer: Option<i64>, author: Option<i64>, page: Page) -> Result<Vec<Post>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{POST_SELECT}
             WHERE u.banned = 0 AND (?2 IS NULL OR p.author_id = ?2)
             ORDER BY p.created_at DESC, p.id DESC
             LIMIT ?3 OFFSET ?4"
        ))?;
        let posts = stmt
            .query_map(params![viewer, author, page.limit, page.offset], post_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(posts)
    }

    fn post_author(&self, id: i64) -> Result<i64> {
        self.conn()
            .query_row("SELECT author_id FROM posts WHERE id = ?1", [id], |row| row.get(0))
            .optional()?
            .ok_or_else(|| Error::not_found("post", id))
    }

    pub fn update_post(&self, actor: &User, id: i64, input: &PostInput) -> Result<Post> {
        actor.require_owner_or_admin(self.post_author(id)?, "post")?;
        let content = require_text("content", &input.content, 1, MAX_POST_LENGTH)?;
        let image_url = optional_url("imageUrl", input.image_url.as_deref())?;
        self.conn().execute(
            "UPDATE posts SET content = ?1, image_url = ?2, updated_at = ?3 WHERE id = ?4",
            params![content, image_url, now(), id],
        )?;
        self.get_post(id, Some(actor.id))
    }

    pub fn delete_post(&self, actor: &User, id: i64) -> Result<()> {
        actor.require_owner_or_admin(self.post_author(id)?, "post")?;
        self.conn().execute("DELETE FROM posts WHERE id = ?1", [id])?;
        info!(post_id = id, by = actor.id, "post deleted");
        Ok(())
    }

    pub fn toggle_post_like(&self, actor: &User, post_id: i64) -> Result<LikeToggle> {
        let (state, owner) = self.toggle_like(LikeTarget::Post, post_id, actor.id)?;
        if state.liked {
            self.notify(owner, Some(actor.id), NotificationKind::PostLiked { post_id })?;
        }
        Ok(state)
    }

    // -----------------------------------------------------------------------
    // Comments
    // -----------------------------------------------------------------------

    /// Comments of a post in chronological order.
    pub fn list_comments(&self, post_id: i64, viewer: Option<i64>, page: Page) -> Result<Vec<Comment>> {
        self.post_author(post_id)?;
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{COMMENT_SELECT}
             WHERE c.post_id = ?2
             ORDER BY c.created_at, c.id
             LIMIT ?3 OFFSET ?4"
        ))?;
        let comments = stmt
            .query_map(params![viewer, post_id, page.limit, page.offset], comment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(comments)
    }

    pub fn get_comment(&self, id: i64, viewer: Option<i64>) -> Result<Comment> {
        self.conn()
            .query_row(
                &format!("{COMMENT_SELECT} WHERE c.id = ?2"),
                params![viewer, id],
                comment_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::not_found("comment", id))
    }

    /// Add a comment. A reply must target a comment of the same post. The
    /// post author is notified of top-level comments, the parent author of
    /// replies.
    pub fn create_comment(&self, actor: &User, post_id: i64, input: &CommentInput) -> Result<Comment> {
        let content = require_text("content", &input.content, 1, MAX_COMMENT_LENGTH)?;
        let post_author = self.post_author(post_id)?;

        let parent_author = match input.parent_id {
            Some(parent_id) => {
                let parent = self.get_comment(parent_id, None)?;
                if parent.post_id != post_id {
                    return Err(Error::validation(
                        "parentId",
                        "must reference a comment on the same post",
                    ));
                }
                Some(parent.author.id)
            }
            None => None,
        };

        let ts = now();
        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO comments (post_id, author_id, parent_id, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![post_id, actor.id, input.parent_id, content, ts],
            )?;
            conn.last_insert_rowid()
        };

        match parent_author {
            Some(parent_author) => {
                self.notify(
                    parent_author,
                    Some(actor.id),
                    NotificationKind::CommentReplied {
                        post_id,
                        comment_id: id,
                    },
                )?;
                if post_author != parent_author {
                    self.notify(
                        post_author,
                        Some(actor.id),
                        NotificationKind::PostCommented {
                            post_id,
                            comment_id: id,
                        },
                    )?;
                }
            }
            None => {
                self.notify(
                    post_author,
                    Some(actor.id),
                    NotificationKind::PostCommented {
                        post_id,
                        comment_id: id,
                    },
                )?;
            }
        }

        self.get_comment(id, Some(actor.id))
    }

    pub fn update_comment(&self, actor: &User, id: i64, content: &str) -> Result<Comment> {
        let comment = self.get_comment(id, None)?;
        actor.require_owner_or_admin(comment.author.id, "comment")?;
        let content = require_text("content", content, 1, MAX_COMMENT_LENGTH)?;
        self.conn().execute(
            "UPDATE comments SET content = ?1, updated_at = ?2 WHERE id = ?3",
            params![content, now(), id],
        )?;
        self.get_comment(id, Some(actor.id))
    }

    /// Delete a comment and its replies.
    pub fn delete_comment(&self, actor: &User, id: i64) -> Result<()> {
        let comment = self.get_comment(id, None)?;
        actor.require_owner_or_admin(comment.author.id, "comment")?;
        self.conn().execute("DELETE FROM comments WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn toggle_comment_like(&self, actor: &User, comment_id: i64) -> Result<LikeToggle> {
        let (state, owner) = self.toggle_like(LikeTarget::Comment, comment_id, actor.id)?;
        if state.liked {
            let post_id = self.get_comment(comment_id, None)?.post_id;
            self.notify(
                owner,
                Some(actor.id),
                NotificationKind::CommentLiked {
                    post_id,
                    comment_id,
                },
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

    fn post_input(content: &str) -> PostInput {
        PostInput {
            content: content.into(),
            image_url: None,
        }
    }

    fn comment_input(content: &str, parent_id: Option<i64>) -> CommentInput {
        CommentInput {
            content: content.into(),
            parent_id,
        }
    }

    #[test]
    fn create_and_fetch_post() {
        let db = test_db();
        let author = insert_user(&db, "Author", Role::User);
        let post = db.create_post(&author, &post_input("  Hello world  ")).unwrap();
        assert_eq!(post.content, "Hello world");
        assert_eq!(post.author.id, author.id);
        assert_eq!(post.like_count, 0);
        assert!(!post.liked_by_me);
    }

    #[test]
    fn empty_post_rejected() {
        let db = test_db();
        let author = insert_user(&db, "Author", Role::User);
        assert!(matches!(
            db.create_post(&author, &post_input("   ")),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn feed_is_newest_first_and_filterable() {
        let db = test_db();
        let a = insert_user(&db, "A", Role::User);
        let b = insert_user(&db, "B", Role::User);
        let first = db.create_post(&a, &post_input("first")).unwrap();
        let second = db.create_post(&b, &post_input("second")).unwrap();

        let feed = db.list_posts(None, None, Page::default()).unwrap();
        assert_eq!(feed.iter().map(|p| p.id).collect::<Vec<_>>(), vec![second.id, first.id]);

        let only_a = db.list_posts(None, Some(a.id), Page::default()).unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].id, first.id);

        let paged = db.list_posts(None, None, Page::new(1, 1)).unwrap();
        assert_eq!(paged[0].id, first.id);
    }

    #[test]
    fn only_author_or_admin_may_edit_and_delete() {
        let db = test_db();
        let author = insert_user(&db, "Author", Role::User);
        let stranger = insert_user(&db, "Stranger", Role::User);
        let admin = insert_user(&db, "Admin", Role::Admin);
        let post = db.create_post(&author, &post_input("mine")).unwrap();

        assert!(matches!(
            db.update_post(&stranger, post.id, &post_input("hijack")),
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(db.delete_post(&stranger, post.id), Err(Error::Forbidden(_))));

        let edited = db.update_post(&admin, post.id, &post_input("moderated")).unwrap();
        assert_eq!(edited.content, "moderated");
        db.delete_post(&admin, post.id).unwrap();
        assert!(matches!(db.get_post(post.id, None), Err(Error::NotFound { .. })));
    }

    #[test]
    fn like_toggle_notifies_author_once() {
        let db = test_db();
        let author = insert_user(&db, "Author", Role::User);
        let fan = insert_user(&db, "Fan", Role::User);
        let post = db.create_post(&author, &post_input("likeable")).unwrap();

        let state = db.toggle_post_like(&fan, post.id).unwrap();
        assert!(state.liked);
        assert!(db.get_post(post.id, Some(fan.id)).unwrap().liked_by_me);
        assert_eq!(db.unread_count(&author).unwrap(), 1);

        let state = db.toggle_post_like(&fan, post.id).unwrap();
        assert!(!state.liked);
        assert_eq!(db.get_post(post.id, None).unwrap().like_count, 0);
        assert_eq!(db.unread_count(&author).unwrap(), 1);
    }

    #[test]
    fn liking_own_post_does_not_notify() {
        let db = test_db();
        let author = insert_user(&db, "Author", Role::User);
        let post = db.create_post(&author, &post_input("self")).unwrap();
        db.toggle_post_like(&author, post.id).unwrap();
        assert_eq!(db.unread_count(&author).unwrap(), 0);
    }

    #[test]
    fn comments_and_replies_notify_the_right_people() {
        let db = test_db();
        let author = insert_user(&db, "Author", Role::User);
        let commenter = insert_user(&db, "Commenter", Role::User);
        let replier = insert_user(&db, "Replier", Role::User);
        let post = db.create_post(&author, &post_input("discuss")).unwrap();

        let top = db
            .create_comment(&commenter, post.id, &comment_input("first!", None))
            .unwrap();
        assert_eq!(db.unread_count(&author).unwrap(), 1);

        let reply = db
            .create_comment(&replier, post.id, &comment_input("reply", Some(top.id)))
            .unwrap();
        assert_eq!(reply.parent_id, Some(top.id));
        assert_eq!(db.unread_count(&commenter).unwrap(), 1);
        assert_eq!(db.unread_count(&author).unwrap(), 2);

        let comments = db.list_comments(post.id, None, Page::default()).unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(db.get_post(post.id, None).unwrap().comment_count, 2);
    }

    #[test]
    fn reply_to_comment_of_other_post_rejected() {
        let db = test_db();
        let author = insert_user(&db, "Author", Role::User);
        let p1 = db.create_post(&author, &post_input("one")).unwrap();
        let p2 = db.create_post(&author, &post_input("two")).unwrap();
        let c1 = db.create_comment(&author, p1.id, &comment_input("c", None)).unwrap();

        assert!(matches!(
            db.create_comment(&author, p2.id, &comment_input("x", Some(c1.id))),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn deleting_post_cascades_to_comments() {
        let db = test_db();
        let author = insert_user(&db, "Author", Role::User);
        let post = db.create_post(&author, &post_input("bye")).unwrap();
        let comment = db.create_comment(&author, post.id, &comment_input("c", None)).unwrap();
        db.delete_post(&author, post.id).unwrap();
        assert!(matches!(db.get_comment(comment.id, None), Err(Error::NotFound { .. })));
    }

    #[test]
    fn comment_edit_and_like() {
        let db = test_db();
        let author = insert_user(&db, "Author", Role::User);
        let other = insert_user(&db, "Other", Role::User);
        let post = db.create_post(&author, &post_input("p")).unwrap();
        let comment = db.create_comment(&other, post.id, &comment_input("typo", None)).unwrap();

        assert!(matches!(
            db.update_comment(&author, comment.id, "nope"),
            Err(Error::Forbidden(_))
        ));
        let fixed = db.update_comment(&other, comment.id, "fixed").unwrap();
        assert_eq!(fixed.content, "fixed");

        let state = db.toggle_comment_like(&author, comment.id).unwrap();
        assert_eq!(state, LikeToggle { liked: true, like_count: 1 });
        assert_eq!(db.unread_count(&other).unwrap(), 1);

        db.delete_comment(&other, comment.id).unwrap();
        assert!(db.list_comments(post.id, None, Page::default()).unwrap().is_empty());
    }
}
