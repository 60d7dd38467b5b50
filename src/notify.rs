use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::{Decision, Notification, NotificationType};
use crate::registry::{ChannelRegistry, Push};

/// One notification to deliver: a durable inbox row first, then a best-effort
/// push to any live channel the recipient holds.
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub user_id: Uuid,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub related_activity_id: Option<Uuid>,
    pub related_user_id: Option<Uuid>,
}

pub fn submission_notice(student_name: &str, activity_title: &str) -> (String, String) {
    (
        "New Activity Submission".to_string(),
        format!("Student {student_name} has submitted a new activity: '{activity_title}'"),
    )
}

pub fn decision_notice(
    activity_title: &str,
    decision: Decision,
    teacher_name: &str,
    comments: Option<&str>,
) -> (String, String) {
    let title = match decision {
        Decision::Approved => "Activity Approved".to_string(),
        Decision::Rejected => "Activity Rejected".to_string(),
    };
    let mut message =
        format!("Your activity '{activity_title}' has been {decision} by {teacher_name}");
    if let Some(comments) = comments {
        message.push_str(&format!(". Comments: {comments}"));
    }
    (title, message)
}

pub fn allocation_notice(teacher_name: &str) -> (String, String) {
    (
        "Teacher Assigned".to_string(),
        format!("You have been assigned to {teacher_name} for activity review"),
    )
}

/// Queue-backed dispatcher. Callers enqueue after their transaction commits
/// and never wait on delivery; a background worker drains the queue with one
/// bounded retry and logs-and-drops on persistent failure. Losing a
/// notification never un-commits a decision.
pub struct NotificationDispatcher {
    queue: mpsc::UnboundedSender<NotificationRequest>,
    worker: JoinHandle<()>,
}

impl NotificationDispatcher {
    pub fn spawn(pool: PgPool, registry: Arc<ChannelRegistry>) -> Self {
        let (queue, mut rx) = mpsc::unbounded_channel::<NotificationRequest>();
        let worker = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                deliver(&pool, &registry, request).await;
            }
        });
        Self { queue, worker }
    }

    /// Hand a notification to the worker. Failure to enqueue (worker gone) is
    /// logged and swallowed like any other delivery failure.
    pub fn enqueue(&self, request: NotificationRequest) {
        if let Err(err) = self.queue.send(request) {
            tracing::warn!(user_id = %err.0.user_id, "notification worker gone, dropping");
        }
    }

    /// Enqueue the same notice for every recipient. One bad recipient never
    /// blocks the rest; per-recipient failures surface in the worker only.
    pub fn fan_out<I: IntoIterator<Item = Uuid>>(
        &self,
        recipients: I,
        notification_type: NotificationType,
        title: &str,
        message: &str,
        related_activity_id: Option<Uuid>,
        related_user_id: Option<Uuid>,
    ) {
        for user_id in recipients {
            self.enqueue(NotificationRequest {
                user_id,
                notification_type,
                title: title.to_string(),
                message: message.to_string(),
                related_activity_id,
                related_user_id,
            });
        }
    }

    /// Close the queue and wait for the worker to drain it. CLI usage calls
    /// this before exit; a server would call it on graceful shutdown.
    pub async fn shutdown(self) {
        drop(self.queue);
        if let Err(err) = self.worker.await {
            tracing::warn!(%err, "notification worker ended abnormally");
        }
    }
}

async fn deliver(pool: &PgPool, registry: &ChannelRegistry, request: NotificationRequest) {
    let mut attempt = insert_row(pool, &request).await;
    if attempt.is_err() {
        tokio::time::sleep(Duration::from_millis(200)).await;
        attempt = insert_row(pool, &request).await;
    }

    match attempt {
        Ok(()) => {
            registry.push(
                request.user_id,
                Push {
                    notification_type: request.notification_type,
                    title: request.title.clone(),
                    message: request.message.clone(),
                    related_activity_id: request.related_activity_id,
                },
            );
        }
        Err(err) => {
            tracing::warn!(
                user_id = %request.user_id,
                notification_type = %request.notification_type,
                %err,
                "dropping notification after retry"
            );
        }
    }
}

async fn insert_row(pool: &PgPool, request: &NotificationRequest) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        INSERT INTO activity_ledger.notifications
        (id, user_id, notification_type, title, message,
         related_activity_id, related_user_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(request.user_id)
    .bind(request.notification_type.as_str())
    .bind(&request.title)
    .bind(&request.message)
    .bind(request.related_activity_id)
    .bind(request.related_user_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list(
    pool: &PgPool,
    user_id: Uuid,
    unread_only: bool,
    limit: i64,
) -> Result<Vec<Notification>, LedgerError> {
    let mut query =
        String::from("SELECT * FROM activity_ledger.notifications WHERE user_id = $1");
    if unread_only {
        query.push_str(" AND is_read = FALSE");
    }
    query.push_str(" ORDER BY created_at DESC LIMIT $2");

    let rows = sqlx::query(&query)
        .bind(user_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;

    rows.iter().map(Notification::from_row).collect()
}

pub async fn unread_count(pool: &PgPool, user_id: Uuid) -> Result<i64, LedgerError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM activity_ledger.notifications
         WHERE user_id = $1 AND is_read = FALSE",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Only the recipient may mark their notification read.
pub async fn mark_read(
    pool: &PgPool,
    notification_id: Uuid,
    user_id: Uuid,
) -> Result<(), LedgerError> {
    let result = sqlx::query(
        "UPDATE activity_ledger.notifications
         SET is_read = TRUE, read_at = now()
         WHERE id = $1 AND user_id = $2 AND is_read = FALSE",
    )
    .bind(notification_id)
    .bind(user_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        // Either no such row for this user, or already read.
        let exists = sqlx::query(
            "SELECT id FROM activity_ledger.notifications WHERE id = $1 AND user_id = $2",
        )
        .bind(notification_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
        if exists.is_none() {
            return Err(LedgerError::NotFound("notification"));
        }
    }
    Ok(())
}

pub async fn mark_all_read(pool: &PgPool, user_id: Uuid) -> Result<u64, LedgerError> {
    let result = sqlx::query(
        "UPDATE activity_ledger.notifications
         SET is_read = TRUE, read_at = now()
         WHERE user_id = $1 AND is_read = FALSE",
    )
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_notice_includes_teacher_and_comments() {
        let (title, message) = decision_notice(
            "AWS Certification",
            Decision::Approved,
            "Avery Lee",
            Some("Great work"),
        );
        assert_eq!(title, "Activity Approved");
        assert_eq!(
            message,
            "Your activity 'AWS Certification' has been approved by Avery Lee. Comments: Great work"
        );
    }

    #[test]
    fn decision_notice_without_comments_ends_at_teacher_name() {
        let (title, message) =
            decision_notice("Summer Internship", Decision::Rejected, "Jules Moreno", None);
        assert_eq!(title, "Activity Rejected");
        assert_eq!(
            message,
            "Your activity 'Summer Internship' has been rejected by Jules Moreno"
        );
    }

    #[test]
    fn submission_notice_names_the_student() {
        let (title, message) = submission_notice("Kiara Patel", "MOOC on Distributed Systems");
        assert_eq!(title, "New Activity Submission");
        assert!(message.contains("Kiara Patel"));
        assert!(message.contains("MOOC on Distributed Systems"));
    }
}
