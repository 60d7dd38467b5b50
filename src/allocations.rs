use std::collections::HashSet;

use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::actor::fetch_user;
use crate::error::LedgerError;
use crate::models::{Allocation, NotificationType, UserRole, UserStatus};
use crate::notify::{allocation_notice, NotificationDispatcher};

/// Outcome of an allocation request. Pairs that already existed are reported
/// under `skipped`, never raised as a conflict.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AllocateOutcome {
    pub created: Vec<Uuid>,
    pub skipped: Vec<Uuid>,
}

async fn assert_approved(
    pool: &PgPool,
    user_id: Uuid,
    role: UserRole,
    label: &'static str,
) -> Result<(), LedgerError> {
    let found = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM activity_ledger.users
         WHERE id = $1 AND role = $2 AND status = $3",
    )
    .bind(user_id)
    .bind(role.as_str())
    .bind(UserStatus::Approved.as_str())
    .fetch_one(pool)
    .await?;

    if found == 0 {
        return Err(LedgerError::NotFound(label));
    }
    Ok(())
}

/// Create teacher-student review edges. Idempotent: an existing pair is a
/// no-op reported in `skipped`. The teacher and every student must be
/// approved users of the right role. Every newly created edge enqueues a
/// `student_allocated` notice for that student; skipped pairs get none.
pub async fn allocate(
    pool: &PgPool,
    dispatcher: &NotificationDispatcher,
    teacher_id: Uuid,
    student_ids: &[Uuid],
    admin_id: Uuid,
) -> Result<AllocateOutcome, LedgerError> {
    assert_approved(pool, teacher_id, UserRole::Teacher, "approved teacher").await?;
    for student_id in student_ids {
        assert_approved(pool, *student_id, UserRole::Student, "approved student").await?;
    }

    let mut outcome = AllocateOutcome::default();
    for student_id in student_ids {
        let result = sqlx::query(
            r#"
            INSERT INTO activity_ledger.teacher_student_allocations
            (id, teacher_id, student_id, allocated_by)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (teacher_id, student_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(teacher_id)
        .bind(student_id)
        .bind(admin_id)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            outcome.created.push(*student_id);
        } else {
            outcome.skipped.push(*student_id);
        }
    }

    if !outcome.created.is_empty() {
        let teacher = fetch_user(pool, teacher_id).await?;
        let (title, message) = allocation_notice(&teacher.full_name);
        dispatcher.fan_out(
            outcome.created.iter().copied(),
            NotificationType::StudentAllocated,
            &title,
            &message,
            None,
            Some(teacher_id),
        );
    }

    tracing::info!(
        %teacher_id,
        created = outcome.created.len(),
        skipped = outcome.skipped.len(),
        "allocated students to teacher"
    );
    Ok(outcome)
}

/// Delete an allocation edge. Revocation only blocks future decisions; past
/// approvals and audit entries stand.
pub async fn revoke(pool: &PgPool, allocation_id: Uuid) -> Result<(), LedgerError> {
    let result =
        sqlx::query("DELETE FROM activity_ledger.teacher_student_allocations WHERE id = $1")
            .bind(allocation_id)
            .execute(pool)
            .await?;

    if result.rows_affected() == 0 {
        return Err(LedgerError::NotFound("allocation"));
    }
    Ok(())
}

pub async fn students_of(pool: &PgPool, teacher_id: Uuid) -> Result<HashSet<Uuid>, LedgerError> {
    let rows = sqlx::query(
        "SELECT student_id FROM activity_ledger.teacher_student_allocations
         WHERE teacher_id = $1",
    )
    .bind(teacher_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(|row| row.get("student_id")).collect())
}

pub async fn teachers_of(pool: &PgPool, student_id: Uuid) -> Result<HashSet<Uuid>, LedgerError> {
    let rows = sqlx::query(
        "SELECT teacher_id FROM activity_ledger.teacher_student_allocations
         WHERE student_id = $1",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(|row| row.get("teacher_id")).collect())
}

pub async fn list(pool: &PgPool, teacher_id: Option<Uuid>) -> Result<Vec<Allocation>, LedgerError> {
    let rows = match teacher_id {
        Some(teacher_id) => {
            sqlx::query(
                "SELECT * FROM activity_ledger.teacher_student_allocations
                 WHERE teacher_id = $1 ORDER BY created_at",
            )
            .bind(teacher_id)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                "SELECT * FROM activity_ledger.teacher_student_allocations ORDER BY created_at",
            )
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(Allocation::from_row).collect()
}

/// Bulk-import allocation edges from a CSV of teacher/student emails.
/// Returns the number of edges actually created; existing pairs count as
/// skipped just like `allocate`, and newly allocated students are notified
/// the same way.
pub async fn import_csv(
    pool: &PgPool,
    dispatcher: &NotificationDispatcher,
    csv_path: &std::path::Path,
    admin_id: Uuid,
) -> Result<usize, LedgerError> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        teacher_email: String,
        student_email: String,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .map_err(|e| LedgerError::Validation(format!("cannot read csv: {e}")))?;
    let mut created = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result.map_err(|e| LedgerError::Validation(format!("bad csv row: {e}")))?;

        let teacher_id = user_id_by_email(pool, &row.teacher_email).await?;
        let student_id = user_id_by_email(pool, &row.student_email).await?;

        let outcome = allocate(pool, dispatcher, teacher_id, &[student_id], admin_id).await?;
        created += outcome.created.len();
    }

    Ok(created)
}

async fn user_id_by_email(pool: &PgPool, email: &str) -> Result<Uuid, LedgerError> {
    let row = sqlx::query("SELECT id FROM activity_ledger.users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await?
        .ok_or(LedgerError::NotFound("user"))?;

    Ok(row.get("id"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ChannelRegistry;
    use std::sync::Arc;

    async fn seeded_pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPool::connect(&url).await.expect("connect");
        crate::db::init_db(&pool).await.expect("migrate");
        crate::db::seed(&pool).await.expect("seed");
        pool
    }

    fn dispatcher_for(pool: &PgPool) -> NotificationDispatcher {
        NotificationDispatcher::spawn(pool.clone(), Arc::new(ChannelRegistry::new()))
    }

    fn seeded_teacher() -> Uuid {
        Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2").unwrap()
    }

    fn seeded_admin() -> Uuid {
        Uuid::parse_str("7f9c3a51-4c2e-4c8a-9f0b-6a1d2e3f4a5b").unwrap()
    }

    async fn allocation_notices_for(pool: &PgPool, student: Uuid) -> i64 {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM activity_ledger.notifications
             WHERE user_id = $1 AND notification_type = 'student_allocated'",
        )
        .bind(student)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a disposable Postgres"]
    async fn allocate_is_idempotent() {
        let pool = seeded_pool().await;
        let student = Uuid::parse_str("9a8b7c6d-5e4f-4d3c-8b2a-1f0e9d8c7b6a").unwrap();

        let dispatcher = dispatcher_for(&pool);
        let first = allocate(&pool, &dispatcher, seeded_teacher(), &[student], seeded_admin())
            .await
            .unwrap();
        let second = allocate(&pool, &dispatcher, seeded_teacher(), &[student], seeded_admin())
            .await
            .unwrap();
        dispatcher.shutdown().await;

        assert_eq!(first.created, vec![student]);
        assert!(second.created.is_empty());
        assert_eq!(second.skipped, vec![student]);

        let edges = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM activity_ledger.teacher_student_allocations
             WHERE teacher_id = $1 AND student_id = $2",
        )
        .bind(seeded_teacher())
        .bind(student)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(edges, 1);

        // The new edge produced one notice; the skipped repeat produced none.
        assert_eq!(allocation_notices_for(&pool, student).await, 1);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a disposable Postgres"]
    async fn allocating_to_a_non_teacher_is_not_found() {
        let pool = seeded_pool().await;
        let student = Uuid::parse_str("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2").unwrap();

        let dispatcher = dispatcher_for(&pool);
        let err = allocate(&pool, &dispatcher, student, &[student], seeded_admin())
            .await
            .unwrap_err();
        dispatcher.shutdown().await;
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a disposable Postgres"]
    async fn csv_import_notifies_newly_allocated_students() {
        let pool = seeded_pool().await;
        // Sam is seeded under Avery only, so the Jules edge is new.
        let student = Uuid::parse_str("b1b2c3d4-e5f6-4a1b-8c2d-9e0f1a2b3c4d").unwrap();
        let before = allocation_notices_for(&pool, student).await;

        let csv_path = std::env::temp_dir().join(format!("allocations-{}.csv", Uuid::new_v4()));
        std::fs::write(
            &csv_path,
            "teacher_email,student_email\njules.moreno@stateu.edu,sam.iversen@stateu.edu\n",
        )
        .unwrap();

        let dispatcher = dispatcher_for(&pool);
        let created = import_csv(&pool, &dispatcher, &csv_path, seeded_admin())
            .await
            .unwrap();
        dispatcher.shutdown().await;
        std::fs::remove_file(&csv_path).ok();

        assert_eq!(created, 1);
        assert_eq!(allocation_notices_for(&pool, student).await, before + 1);
    }
}
