use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::actor::fetch_user;
use crate::error::LedgerError;
use crate::models::{Activity, ActivityApproval, ActivityStatus, Decision, LogType};
use crate::notify::{decision_notice, submission_notice, NotificationDispatcher};
use crate::{allocations, audit};

#[derive(Debug, Clone)]
pub struct DecideRequest {
    pub activity_id: Uuid,
    pub teacher_id: Uuid,
    pub decision: Decision,
    pub credits_awarded: f64,
    pub comments: Option<String>,
}

/// Record a teacher's decision on a pending activity.
///
/// Validation and authorization run before the transaction opens. Inside one
/// transaction: the status transition (a conditional update that must affect
/// exactly one row), the immutable approval row, the credit increment when
/// approved, and the audit entry. A zero-row update means a concurrent
/// decision won; the whole transaction aborts with `InvalidStateTransition`.
/// The student notification is enqueued only after commit and never fails the
/// decision.
pub async fn decide(
    pool: &PgPool,
    dispatcher: &NotificationDispatcher,
    request: DecideRequest,
) -> Result<ActivityApproval, LedgerError> {
    if !request.credits_awarded.is_finite() || request.credits_awarded < 0.0 {
        return Err(LedgerError::Validation(
            "credits awarded must be non-negative".into(),
        ));
    }

    let activity = crate::activities::get(pool, request.activity_id).await?;

    let reviewers = allocations::teachers_of(pool, activity.student_id).await?;
    if !reviewers.contains(&request.teacher_id) {
        return Err(LedgerError::Forbidden(
            "student is not allocated to this teacher".into(),
        ));
    }

    if activity.status != ActivityStatus::Pending {
        return Err(LedgerError::InvalidStateTransition(format!(
            "activity is already {}",
            activity.status
        )));
    }

    let teacher = fetch_user(pool, request.teacher_id).await?;
    // Rejections never carry credits into the approval row.
    let credits_awarded = match request.decision {
        Decision::Approved => request.credits_awarded,
        Decision::Rejected => 0.0,
    };

    let mut tx = pool.begin().await?;

    // Optimistic guard: only the caller that flips pending -> terminal may
    // proceed. On rejection the originally requested credits value stays.
    let transition = sqlx::query(
        r#"
        UPDATE activity_ledger.activities
        SET status = $1,
            credits = CASE WHEN $1 = 'approved' THEN $2 ELSE credits END,
            updated_at = now()
        WHERE id = $3 AND status = 'pending'
        "#,
    )
    .bind(request.decision.activity_status().as_str())
    .bind(credits_awarded)
    .bind(activity.id)
    .execute(&mut *tx)
    .await?;

    if transition.rows_affected() != 1 {
        tx.rollback().await?;
        return Err(LedgerError::InvalidStateTransition(
            "activity was decided by a concurrent reviewer".into(),
        ));
    }

    let approval_row = sqlx::query(
        r#"
        INSERT INTO activity_ledger.activity_approvals
        (id, activity_id, teacher_id, status, comments, credits_awarded)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(activity.id)
    .bind(request.teacher_id)
    .bind(request.decision.as_str())
    .bind(&request.comments)
    .bind(credits_awarded)
    .fetch_one(&mut *tx)
    .await?;
    let approval = ActivityApproval::from_row(&approval_row)?;

    if request.decision == Decision::Approved {
        crate::ledger::apply(&mut *tx, activity.student_id, credits_awarded).await?;
    }

    let log_type = match request.decision {
        Decision::Approved => LogType::ActivityApproved,
        Decision::Rejected => LogType::ActivityRejected,
    };
    audit::append(
        &mut *tx,
        audit::NewAuditEntry {
            activity_id: activity.id,
            actor_id: request.teacher_id,
            target_user_id: Some(activity.student_id),
            log_type,
            action: format!("Activity {} by teacher", request.decision),
            details: Some(json!({
                "teacher_id": request.teacher_id,
                "teacher_name": teacher.full_name,
                "comments": request.comments,
                "credits_awarded": credits_awarded,
            })),
        },
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        activity_id = %activity.id,
        teacher_id = %request.teacher_id,
        decision = %request.decision,
        credits_awarded,
        "decision committed"
    );

    let (title, message) = decision_notice(
        &activity.title,
        request.decision,
        &teacher.full_name,
        request.comments.as_deref(),
    );
    let notification_type = match request.decision {
        Decision::Approved => crate::models::NotificationType::ActivityApproved,
        Decision::Rejected => crate::models::NotificationType::ActivityRejected,
    };
    dispatcher.enqueue(crate::notify::NotificationRequest {
        user_id: activity.student_id,
        notification_type,
        title,
        message,
        related_activity_id: Some(activity.id),
        related_user_id: Some(request.teacher_id),
    });

    Ok(approval)
}

/// Post-submission hook: append the submission audit entry and fan a notice
/// out to every teacher currently allocated to the student. Runs after
/// `ActivityStore::create` has committed.
pub async fn on_submitted(
    pool: &PgPool,
    dispatcher: &NotificationDispatcher,
    activity: &Activity,
) -> Result<(), LedgerError> {
    let student = fetch_user(pool, activity.student_id).await?;

    audit::append_on(
        pool,
        audit::NewAuditEntry {
            activity_id: activity.id,
            actor_id: activity.student_id,
            target_user_id: None,
            log_type: LogType::ActivitySubmitted,
            action: format!("Activity '{}' submitted for review", activity.title),
            details: Some(json!({
                "activity_type": activity.activity_type,
                "requested_credits": activity.credits,
            })),
        },
    )
    .await?;

    let reviewers = allocations::teachers_of(pool, activity.student_id).await?;
    if reviewers.is_empty() {
        tracing::warn!(
            activity_id = %activity.id,
            student_id = %activity.student_id,
            "submission has no allocated reviewers to notify"
        );
        return Ok(());
    }

    let (title, message) = submission_notice(&student.full_name, &activity.title);
    dispatcher.fan_out(
        reviewers,
        crate::models::NotificationType::ActivitySubmitted,
        &title,
        &message,
        Some(activity.id),
        Some(activity.student_id),
    );
    Ok(())
}
