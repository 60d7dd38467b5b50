use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::error::LedgerError;

/// Stored-versus-recomputed credit totals for one student.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub student_id: Uuid,
    pub stored: f64,
    pub recomputed: f64,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        (self.stored - self.recomputed).abs() < 1e-9
    }
}

/// Apply an approved award to the student's cumulative fields. Only the
/// approval engine calls this, and only inside its decision transaction, so
/// the increment commits or rolls back with the approval row and audit entry.
pub async fn apply(
    conn: &mut PgConnection,
    student_id: Uuid,
    delta: f64,
) -> Result<(), LedgerError> {
    if !delta.is_finite() || delta < 0.0 {
        return Err(LedgerError::Validation(
            "credit delta must be non-negative".into(),
        ));
    }

    let result = sqlx::query(
        r#"
        UPDATE activity_ledger.users
        SET total_credits_earned = total_credits_earned + $1,
            performance_score = performance_score + $1
        WHERE id = $2 AND role = 'student'
        "#,
    )
    .bind(delta)
    .bind(student_id)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(LedgerError::NotFound("student"));
    }
    Ok(())
}

/// Recompute a student's total from their approved approval rows and compare
/// against the stored field. Integrity checking only, never on the hot path.
pub async fn reconcile(pool: &PgPool, student_id: Uuid) -> Result<Reconciliation, LedgerError> {
    let row = sqlx::query(
        r#"
        SELECT u.total_credits_earned AS stored,
               COALESCE(SUM(ap.credits_awarded), 0) AS recomputed
        FROM activity_ledger.users u
        LEFT JOIN activity_ledger.activities a ON a.student_id = u.id
        LEFT JOIN activity_ledger.activity_approvals ap
            ON ap.activity_id = a.id AND ap.status = 'approved'
        WHERE u.id = $1 AND u.role = 'student'
        GROUP BY u.total_credits_earned
        "#,
    )
    .bind(student_id)
    .fetch_optional(pool)
    .await?
    .ok_or(LedgerError::NotFound("student"))?;

    Ok(Reconciliation {
        student_id,
        stored: row.get("stored"),
        recomputed: row.get("recomputed"),
    })
}

/// Reconcile every student, worst divergence first.
pub async fn reconcile_all(pool: &PgPool) -> Result<Vec<Reconciliation>, LedgerError> {
    let rows = sqlx::query(
        r#"
        SELECT u.id AS student_id,
               u.total_credits_earned AS stored,
               COALESCE(SUM(ap.credits_awarded), 0) AS recomputed
        FROM activity_ledger.users u
        LEFT JOIN activity_ledger.activities a ON a.student_id = u.id
        LEFT JOIN activity_ledger.activity_approvals ap
            ON ap.activity_id = a.id AND ap.status = 'approved'
        WHERE u.role = 'student'
        GROUP BY u.id, u.total_credits_earned
        ORDER BY ABS(u.total_credits_earned - COALESCE(SUM(ap.credits_awarded), 0)) DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| Reconciliation {
            student_id: row.get("student_id"),
            stored: row.get("stored"),
            recomputed: row.get("recomputed"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consistency_tolerates_float_noise_only() {
        let ok = Reconciliation {
            student_id: Uuid::new_v4(),
            stored: 17.5,
            recomputed: 17.5,
        };
        assert!(ok.is_consistent());

        let drifted = Reconciliation {
            student_id: Uuid::new_v4(),
            stored: 17.5,
            recomputed: 10.0,
        };
        assert!(!drifted.is_consistent());
    }
}
