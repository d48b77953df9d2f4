// Long-form articles and the tags attached to them.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::{now, require_text, Database, Page};
use crate::error::{Error, Result};
use crate::users::{member_from_row, MemberSummary, User};

const MAX_TAGS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub body: String,
    pub published: bool,
    pub author: MemberSummary,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleInput {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_published")]
    pub published: bool,
}

fn default_published() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagCount {
    pub name: String,
    pub article_count: i64,
}

/// URL slug: lowercase ASCII alphanumerics separated by single dashes.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.len() > 80 {
        slug.truncate(80);
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    if slug.is_empty() {
        slug.push_str("untitled");
    }
    slug
}

/// Lowercase, trim, drop blanks and duplicates, preserving first-seen order.
pub fn normalize_tags(tags: &[String]) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for raw in tags {
        let tag = raw.trim().trim_start_matches('#').to_lowercase();
        if tag.is_empty() || out.contains(&tag) {
            continue;
        }
        if tag.chars().count() > 32 {
            return Err(Error::validation("tags", format!("tag {tag:?} is longer than 32 characters")));
        }
        out.push(tag);
    }
    if out.len() > MAX_TAGS {
        return Err(Error::validation("tags", format!("at most {MAX_TAGS} tags allowed")));
    }
    Ok(out)
}

const ARTICLE_SELECT: &str = "
    SELECT a.id, a.slug, a.title, a.body, a.published, a.created_at, a.updated_at,
           u.id, u.name, u.headline, u.avatar_url,
           (SELECT json_group_array(name) FROM (
                SELECT t.name FROM article_tags at JOIN tags t ON t.id = at.tag_id
                WHERE at.article_id = a.id ORDER BY t.name))
    FROM articles a
    JOIN users u ON u.id = a.author_id";

fn article_from_row(row: &Row<'_>) -> rusqlite::Result<Article> {
    let tags: String = row.get(11)?;
    let tags: Vec<String> = serde_json::from_str(&tags).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Article {
        id: row.get(0)?,
        slug: row.get(1)?,
        title: row.get(2)?,
        body: row.get(3)?,
        published: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        author: member_from_row(row, 7)?,
        tags,
    })
}

/// Replace the tag set of an article, creating missing tags.
fn set_article_tags(tx: &Transaction<'_>, article_id: i64, tags: &[String]) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM article_tags WHERE article_id = ?1", [article_id])?;
    for tag in tags {
        tx.execute("INSERT OR IGNORE INTO tags (name) VALUES (?1)", [tag])?;
        tx.execute(
            "INSERT OR IGNORE INTO article_tags (article_id, tag_id)
             SELECT ?1, id FROM tags WHERE name = ?2",
            params![article_id, tag],
        )?;
    }
    Ok(())
}

/// First slug in `table` free among `base`, `base-2`, `base-3`, ...
pub(crate) fn unique_slug(
    conn: &Connection,
    table: &str,
    base: &str,
    except_id: Option<i64>,
) -> rusqlite::Result<String> {
    let mut candidate = base.to_string();
    let mut n = 2;
    loop {
        let taken: bool = conn.query_row(
            &format!("SELECT EXISTS (SELECT 1 FROM {table} WHERE slug = ?1 AND (?2 IS NULL OR id <> ?2))"),
            params![candidate, except_id],
            |row| row.get(0),
        )?;
        if !taken {
            return Ok(candidate);
        }
        candidate = format!("{base}-{n}");
        n += 1;
    }
}

impl Database {
    pub fn create_article(&self, actor: &User, input: &ArticleInput) -> Result<Article> {
        let title = require_text("title", &input.title, 3, 200)?;
        let body = require_text("body", &input.body, 1, 100_000)?;
        let tags = normalize_tags(&input.tags)?;
        let ts = now();

        let slug = {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let slug = unique_slug(&tx, "articles", &slugify(&title), None)?;
            tx.execute(
                "INSERT INTO articles (author_id, title, slug, body, published, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![actor.id, title, slug, body, input.published, ts],
            )?;
            let id = tx.last_insert_rowid();
            set_article_tags(&tx, id, &tags)?;
            tx.commit()?;
            slug
        };
        info!(slug = %slug, author_id = actor.id, "article created");
        self.get_article(&slug, Some(actor))
    }

    /// Fetch by slug. Drafts are visible only to their author and admins.
    pub fn get_article(&self, slug: &str, viewer: Option<&User>) -> Result<Article> {
        let article = self
            .conn()
            .query_row(
                &format!("{ARTICLE_SELECT} WHERE a.slug = ?1"),
                [slug],
                article_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::not_found("article", slug))?;

        let visible = article.published || viewer.is_some_and(|v| v.can_modify(article.author.id));
        if !visible {
            return Err(Error::not_found("article", slug));
        }
        Ok(article)
    }

    /// Published articles newest first, optionally filtered by tag.
    pub fn list_articles(&self, tag: Option<&str>, page: Page) -> Result<Vec<Article>> {
        let tag = tag.map(|t| t.trim().to_lowercase());
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{ARTICLE_SELECT}
             WHERE a.published = 1
               AND (?1 IS NULL OR EXISTS (
                    SELECT 1 FROM article_tags at JOIN tags t ON t.id = at.tag_id
                    WHERE at.article_id = a.id AND t.name = ?1))
             ORDER BY a.created_at DESC, a.id DESC
             LIMIT ?2 OFFSET ?3"
        ))?;
        let articles = stmt
            .query_map(params![tag, page.limit, page.offset], article_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(articles)
    }

    /// Update title, body, tags and visibility. The slug follows the title.
    pub fn update_article(&self, actor: &User, slug: &str, input: &ArticleInput) -> Result<Article> {
        let existing = self.get_article(slug, Some(actor))?;
        actor.require_owner_or_admin(existing.author.id, "article")?;
        let title = require_text("title", &input.title, 3, 200)?;
        let body = require_text("body", &input.body, 1, 100_000)?;
        let tags = normalize_tags(&input.tags)?;

        let new_slug = {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let new_slug = if title == existing.title {
                existing.slug.clone()
            } else {
                unique_slug(&tx, "articles", &slugify(&title), Some(existing.id))?
            };
            tx.execute(
                "UPDATE articles SET title = ?1, slug = ?2, body = ?3, published = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![title, new_slug, body, input.published, now(), existing.id],
            )?;
            set_article_tags(&tx, existing.id, &tags)?;
            tx.commit()?;
            new_slug
        };
        self.get_article(&new_slug, Some(actor))
    }

    pub fn delete_article(&self, actor: &User, slug: &str) -> Result<()> {
        let existing = self.get_article(slug, Some(actor))?;
        actor.require_owner_or_admin(existing.author.id, "article")?;
        self.conn()
            .execute("DELETE FROM articles WHERE id = ?1", [existing.id])?;
        Ok(())
    }

    /// Tags in use by published articles, most used first.
    pub fn list_tags(&self) -> Result<Vec<TagCount>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT t.name, COUNT(a.id)
             FROM tags t
             JOIN article_tags at ON at.tag_id = t.id
             JOIN articles a ON a.id = at.article_id AND a.published = 1
             GROUP BY t.id
             ORDER BY COUNT(a.id) DESC, t.name",
        )?;
        let tags = stmt
            .query_map([], |row| {
                Ok(TagCount {
                    name: row.get(0)?,
                    article_count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }
}
