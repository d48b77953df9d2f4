// Certificates: issuance, public verification and the printable PDF.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::db::{now, require_text, Database};
use crate::error::{Error, Result};
use crate::notifications::NotificationKind;
use crate::pdf::{write_document, Canvas, Font, PAGE_HEIGHT, PAGE_WIDTH};
use crate::users::{member_from_row, MemberSummary, User};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    /// Also the public verification code.
    pub id: String,
    pub holder: MemberSummary,
    pub title: String,
    pub course_id: Option<i64>,
    pub issued_by: Option<i64>,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueCertificateInput {
    pub user_id: i64,
    pub title: String,
    pub course_id: Option<i64>,
}

/// What the public verification lookup reveals.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateVerification {
    pub code: String,
    pub valid: bool,
    pub holder_name: String,
    pub title: String,
    pub course_title: Option<String>,
    pub issued_at: DateTime<Utc>,
}

/// Public URL a certificate's QR code points at.
pub fn verification_url(public_url: &str, code: &str) -> String {
    format!(
        "{}/api/certificates/verify/{code}",
        public_url.trim_end_matches('/')
    )
}

const CERTIFICATE_SELECT: &str = "
    SELECT c.id, c.title, c.course_id, c.issued_by, c.issued_at,
           u.id, u.name, u.headline, u.avatar_url
    FROM certificates c
    JOIN users u ON u.id = c.user_id";

fn certificate_from_row(row: &Row<'_>) -> rusqlite::Result<Certificate> {
    Ok(Certificate {
        id: row.get(0)?,
        title: row.get(1)?,
        course_id: row.get(2)?,
        issued_by: row.get(3)?,
        issued_at: row.get(4)?,
        holder: member_from_row(row, 5)?,
    })
}

/// Canonical hyphenated lowercase form, or `None` if `code` is not a UUID.
fn normalize_code(code: &str) -> Option<String> {
    Uuid::parse_str(code.trim()).ok().map(|u| u.to_string())
}

/// Insert a certificate row on `conn`, which may be an open transaction.
/// Returns the new id.
pub(crate) fn insert_certificate(
    conn: &Connection,
    user_id: i64,
    title: &str,
    course_id: Option<i64>,
    issued_by: Option<i64>,
) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO certificates (id, user_id, course_id, title, issued_by, issued_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, user_id, course_id, title, issued_by, now()],
    )?;
    Ok(id)
}

impl Database {
    /// Admin issuance of a certificate to any member.
    pub fn issue_certificate(&self, actor: &User, input: &IssueCertificateInput) -> Result<Certificate> {
        actor.require_admin()?;
        let title = require_text("title", &input.title, 1, 200)?;
        self.get_user(input.user_id)?;
        if let Some(course_id) = input.course_id {
            let exists: bool = self.conn().query_row(
                "SELECT EXISTS (SELECT 1 FROM courses WHERE id = ?1)",
                [course_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(Error::not_found("course", course_id));
            }
        }
        self.record_certificate(input.user_id, &title, input.course_id, Some(actor.id))
    }

    /// Insert a certificate and notify its holder.
    fn record_certificate(
        &self,
        user_id: i64,
        title: &str,
        course_id: Option<i64>,
        issued_by: Option<i64>,
    ) -> Result<Certificate> {
        let id = insert_certificate(&self.conn(), user_id, title, course_id, issued_by)?;
        self.announce_certificate(&id, user_id, title, issued_by)
    }

    /// Notify the holder of a stored certificate and load it back. Runs after
    /// the insert has been committed.
    pub(crate) fn announce_certificate(
        &self,
        id: &str,
        user_id: i64,
        title: &str,
        issued_by: Option<i64>,
    ) -> Result<Certificate> {
        info!(certificate_id = %id, user_id, "certificate issued");
        self.notify(
            user_id,
            issued_by,
            NotificationKind::CertificateIssued {
                certificate_id: id.to_string(),
                title: title.to_string(),
            },
        )?;
        self.find_certificate(id)?
            .ok_or_else(|| Error::not_found("certificate", id))
    }

    fn find_certificate(&self, id: &str) -> Result<Option<Certificate>> {
        let cert = self
            .conn()
            .query_row(
                &format!("{CERTIFICATE_SELECT} WHERE c.id = ?1"),
                [id],
                certificate_from_row,
            )
            .optional()?;
        Ok(cert)
    }

    pub fn my_certificates(&self, user: &User) -> Result<Vec<Certificate>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{CERTIFICATE_SELECT} WHERE c.user_id = ?1 ORDER BY c.issued_at DESC"
        ))?;
        let certs = stmt
            .query_map([user.id], certificate_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(certs)
    }

    /// Full certificate record, for its holder or an admin.
    pub fn get_certificate(&self, viewer: &User, id: &str) -> Result<Certificate> {
        let cert = normalize_code(id)
            .map(|code| self.find_certificate(&code))
            .transpose()?
            .flatten()
            .ok_or_else(|| Error::not_found("certificate", id))?;
        if !viewer.can_modify(cert.holder.id) {
            return Err(Error::forbidden("certificate belongs to another member"));
        }
        Ok(cert)
    }

    /// Public lookup by verification code.
    pub fn verify_certificate(&self, code: &str) -> Result<CertificateVerification> {
        let normalized = normalize_code(code).ok_or_else(|| Error::not_found("certificate", code))?;
        self.conn()
            .query_row(
                "SELECT c.id, u.name, c.title, co.title, c.issued_at
                 FROM certificates c
                 JOIN users u ON u.id = c.user_id
                 LEFT JOIN courses co ON co.id = c.course_id
                 WHERE c.id = ?1",
                [&normalized],
                |row| {
                    Ok(CertificateVerification {
                        code: row.get(0)?,
                        valid: true,
                        holder_name: row.get(1)?,
                        title: row.get(2)?,
                        course_title: row.get(3)?,
                        issued_at: row.get(4)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| Error::not_found("certificate", code))
    }

    /// Render the certificate as a PDF for its holder or an admin.
    pub fn certificate_pdf(&self, viewer: &User, id: &str, public_url: &str) -> Result<Vec<u8>> {
        let cert = self.get_certificate(viewer, id)?;
        render_certificate(&cert, public_url)
    }
}

/// Lay out a certificate on a single A4 landscape page.
pub fn render_certificate(cert: &Certificate, public_url: &str) -> Result<Vec<u8>> {
    let url = verification_url(public_url, &cert.id);
    let mut canvas = Canvas::new();

    canvas.gray(0.2);
    canvas.stroke_rect(24.0, 24.0, PAGE_WIDTH - 48.0, PAGE_HEIGHT - 48.0, 3.0);
    canvas.stroke_rect(34.0, 34.0, PAGE_WIDTH - 68.0, PAGE_HEIGHT - 68.0, 0.75);

    canvas.gray(0.0);
    canvas.centered_text(Font::Bold, 34.0, 470.0, "Certificate of Achievement");
    canvas.centered_text(Font::Regular, 14.0, 420.0, "This certifies that");
    canvas.centered_text(Font::Bold, 28.0, 375.0, &cert.holder.name);
    canvas.centered_text(Font::Regular, 14.0, 335.0, "has been awarded");
    canvas.centered_text(Font::Bold, 20.0, 300.0, &cert.title);
    canvas.centered_text(
        Font::Regular,
        12.0,
        255.0,
        &format!("Issued on {}", cert.issued_at.format("%B %-d, %Y")),
    );

    canvas.gray(0.3);
    canvas.text(Font::Regular, 9.0, 60.0, 82.0, &format!("Verification code: {}", cert.id));
    canvas.text(Font::Regular, 9.0, 60.0, 68.0, &format!("Verify at: {url}"));

    canvas.gray(0.0);
    let side = 110.0;
    canvas.qr_code(&url, PAGE_WIDTH - 60.0 - side, 52.0, side)?;

    Ok(write_document(
        &canvas.into_content(),
        &format!("{} - {}", cert.title, cert.holder.name),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{insert_user, test_db};
    use crate::db::Page;
    use crate::pdf::checks::assert_valid_xref;
    use crate::users::Role;

    fn issue(db: &Database, admin: &User, holder: &User, title: &str) -> Certificate {
        db.issue_certificate(
            admin,
            &IssueCertificateInput {
                user_id: holder.id,
                title: title.into(),
                course_id: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn admin_issues_and_holder_is_notified() {
        let db = test_db();
        let admin = insert_user(&db, "Admin", Role::Admin);
        let holder = insert_user(&db, "Holder", Role::User);
        let cert = issue(&db, &admin, &holder, "Mentor of the Year");

        assert!(Uuid::parse_str(&cert.id).is_ok());
        assert_eq!(cert.holder.id, holder.id);
        assert_eq!(cert.issued_by, Some(admin.id));

        let notes = db.list_notifications(&holder, false, Page::default()).unwrap();
        assert_eq!(
            notes[0].kind,
            NotificationKind::CertificateIssued {
                certificate_id: cert.id.clone(),
                title: "Mentor of the Year".into()
            }
        );
        assert_eq!(db.my_certificates(&holder).unwrap(), vec![cert]);
    }

    #[test]
    fn non_admin_cannot_issue() {
        let db = test_db();
        let user = insert_user(&db, "User", Role::User);
        let result = db.issue_certificate(
            &user,
            &IssueCertificateInput {
                user_id: user.id,
                title: "Self-awarded".into(),
                course_id: None,
            },
        );
        assert!(matches!(result, Err(Error::Forbidden(_))));
    }

    #[test]
    fn unknown_course_rejected() {
        let db = test_db();
        let admin = insert_user(&db, "Admin", Role::Admin);
        let result = db.issue_certificate(
            &admin,
            &IssueCertificateInput {
                user_id: admin.id,
                title: "Ghost course".into(),
                course_id: Some(99),
            },
        );
        assert!(matches!(result, Err(Error::NotFound { entity: "course", .. })));
    }

    #[test]
    fn verification_is_public_and_case_insensitive() {
        let db = test_db();
        let admin = insert_user(&db, "Admin", Role::Admin);
        let holder = insert_user(&db, "Grace Hopper", Role::User);
        let cert = issue(&db, &admin, &holder, "Compiler Pioneer");

        let verified = db.verify_certificate(&cert.id.to_uppercase()).unwrap();
        assert!(verified.valid);
        assert_eq!(verified.holder_name, "Grace Hopper");
        assert_eq!(verified.title, "Compiler Pioneer");
        assert_eq!(verified.code, cert.id);

        assert!(matches!(
            db.verify_certificate("not-a-code"),
            Err(Error::NotFound { .. })
        ));
        assert!(db.verify_certificate(&Uuid::new_v4().to_string()).is_err());
    }

    #[test]
    fn only_holder_or_admin_reads_certificate() {
        let db = test_db();
        let admin = insert_user(&db, "Admin", Role::Admin);
        let holder = insert_user(&db, "Holder", Role::User);
        let other = insert_user(&db, "Other", Role::User);
        let cert = issue(&db, &admin, &holder, "Award");

        assert!(db.get_certificate(&holder, &cert.id).is_ok());
        assert!(db.get_certificate(&admin, &cert.id).is_ok());
        assert!(matches!(
            db.get_certificate(&other, &cert.id),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn pdf_embeds_details_and_is_well_formed() {
        let db = test_db();
        let admin = insert_user(&db, "Admin", Role::Admin);
        let holder = insert_user(&db, "Ada Lovelace", Role::User);
        let cert = issue(&db, &admin, &holder, "Analytical Engines 101");

        let pdf = db
            .certificate_pdf(&holder, &cert.id, "https://guild.example.com/")
            .unwrap();
        assert!(pdf.starts_with(b"%PDF-"));
        assert!(pdf.ends_with(b"%%EOF\n"));
        assert_valid_xref(&pdf);

        let text = String::from_utf8_lossy(&pdf);
        assert!(text.contains("(Ada Lovelace) Tj"));
        assert!(text.contains("(Analytical Engines 101) Tj"));
        assert!(text.contains(&format!(
            "https://guild.example.com/api/certificates/verify/{}",
            cert.id
        )));
    }

    #[test]
    fn verification_url_trims_trailing_slash() {
        assert_eq!(
            verification_url("http://localhost:8080/", "abc"),
            "http://localhost:8080/api/certificates/verify/abc"
        );
    }
}
