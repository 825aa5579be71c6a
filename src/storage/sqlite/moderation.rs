use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, Row};

use super::*;
use crate::domain::*;
use crate::storage::ModerationStore;

const REPORT_COLUMNS: &str = "rp.id, rp.reporter_id, rp.target_type, rp.target_id, rp.reason, rp.resolved, \
     rp.resolution, rp.resolved_by, rp.resolved_at, rp.created_at";

const VERIFICATION_COLUMNS: &str = "v.id, v.user_id, v.student_id_number, v.document_url, v.approved, \
     v.requested_at, v.approved_at, v.approved_by, v.rejection_reason";

fn report_from_row(row: &Row<'_>) -> rusqlite::Result<Report> {
    Ok(Report {
        id: row.get("id")?,
        reporter_id: row.get("reporter_id")?,
        target_type: get_enum(row, "target_type")?,
        target_id: row.get("target_id")?,
        reason: row.get("reason")?,
        resolved: row.get("resolved")?,
        resolution: row.get("resolution")?,
        resolved_by: row.get("resolved_by")?,
        resolved_at: get_opt_ts(row, "resolved_at")?,
        created_at: get_ts(row, "created_at")?,
    })
}

fn verification_from_row(row: &Row<'_>) -> rusqlite::Result<StudentVerification> {
    Ok(StudentVerification {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        student_id_number: row.get("student_id_number")?,
        document_url: row.get("document_url")?,
        approved: row.get("approved")?,
        requested_at: get_ts(row, "requested_at")?,
        approved_at: get_opt_ts(row, "approved_at")?,
        approved_by: row.get("approved_by")?,
        rejection_reason: row.get("rejection_reason")?,
    })
}

fn fetch_report(conn: &Connection, id: Id) -> Result<Option<Report>> {
    let sql = format!("SELECT {} FROM reports rp WHERE rp.id = ?1", REPORT_COLUMNS);
    Ok(conn.query_row(&sql, params![id], report_from_row).optional()?)
}

fn fetch_verification(conn: &Connection, id: Id) -> Result<Option<StudentVerification>> {
    let sql = format!("SELECT {} FROM student_verifications v WHERE v.id = ?1", VERIFICATION_COLUMNS);
    Ok(conn.query_row(&sql, params![id], verification_from_row).optional()?)
}

#[async_trait]
impl ModerationStore for SqliteStorage {
    async fn create_report(&self, reporter_id: Id, target_type: ReportTarget, target_id: Id, reason: &str) -> Result<Report> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reports (reporter_id, target_type, target_id, reason, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![reporter_id, target_type.as_str(), target_id, reason, ts(&Utc::now())],
            )?;
            let id = conn.last_insert_rowid();
            fetch_report(conn, id)?.ok_or_else(|| BazaarError::not_found("report"))
        })
    }

    async fn get_report(&self, id: Id) -> Result<Option<Report>> {
        self.with_conn(|conn| fetch_report(conn, id))
    }

    async fn list_reports(&self, filter: &ReportFilter) -> Result<Page<ReportView>> {
        self.with_conn(|conn| {
            let mut cond = Conditions::new();
            if let Some(resolved) = filter.resolved {
                cond.push("rp.resolved = ?").bind(resolved);
            }
            if let Some(target) = filter.target_type {
                cond.push("rp.target_type = ?").bind(target.as_str());
            }
            let select = format!("SELECT {}, u.full_name AS reporter_name", REPORT_COLUMNS);
            let from_where = format!("FROM reports rp JOIN users u ON u.id = rp.reporter_id{}", cond.where_sql());
            paged_query(conn, &select, &from_where, "ORDER BY rp.created_at DESC, rp.id DESC", &cond, filter.page, |row| {
                Ok(ReportView { report: report_from_row(row)?, reporter_name: row.get("reporter_name")? })
            })
        })
    }

    async fn resolve_report(&self, id: Id, resolution: &str, resolved_by: Option<Id>) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE reports SET resolved = 1, resolution = ?1, resolved_by = ?2, resolved_at = ?3 WHERE id = ?4",
                params![resolution, resolved_by, ts(&Utc::now()), id],
            )?;
            expect_row(changed, "report")
        })
    }

    async fn create_verification(&self, user_id: Id, student_id_number: &str, document_url: Option<&str>) -> Result<StudentVerification> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO student_verifications (user_id, student_id_number, document_url, requested_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![user_id, student_id_number, document_url, ts(&Utc::now())],
            )?;
            let id = conn.last_insert_rowid();
            fetch_verification(conn, id)?.ok_or_else(|| BazaarError::not_found("verification"))
        })
    }

    async fn get_verification(&self, id: Id) -> Result<Option<StudentVerification>> {
        self.with_conn(|conn| fetch_verification(conn, id))
    }

    async fn list_verifications(&self, filter: &VerificationFilter) -> Result<Page<VerificationView>> {
        self.with_conn(|conn| {
            let mut cond = Conditions::new();
            if let Some(approved) = filter.approved {
                cond.push("v.approved = ?").bind(approved);
            }
            let select = format!("SELECT {}, u.full_name AS user_name, u.email AS user_email", VERIFICATION_COLUMNS);
            let from_where = format!("FROM student_verifications v JOIN users u ON u.id = v.user_id{}", cond.where_sql());
            paged_query(conn, &select, &from_where, "ORDER BY v.requested_at DESC, v.id DESC", &cond, filter.page, |row| {
                Ok(VerificationView {
                    verification: verification_from_row(row)?,
                    user_name: row.get("user_name")?,
                    user_email: row.get("user_email")?,
                })
            })
        })
    }

    async fn approve_verification(&self, id: Id, approved_by: Id) -> Result<()> {
        self.with_tx(|tx| {
            let verification = fetch_verification(tx, id)?.ok_or_else(|| BazaarError::not_found("verification"))?;
            tx.execute(
                "UPDATE student_verifications SET approved = 1, approved_at = ?1, approved_by = ?2, rejection_reason = NULL
                 WHERE id = ?3",
                params![ts(&Utc::now()), approved_by, id],
            )?;
            tx.execute("UPDATE users SET is_verified = 1 WHERE id = ?1", params![verification.user_id])?;
            Ok(())
        })
    }

    async fn reject_verification(&self, id: Id, reason: &str) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE student_verifications SET approved = 0, approved_at = NULL, approved_by = NULL, rejection_reason = ?1
                 WHERE id = ?2",
                params![reason, id],
            )?;
            expect_row(changed, "verification")
        })
    }
}
