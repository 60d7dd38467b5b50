use chrono::NaiveDate;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::{Activity, ActivityStatus, ActivityType};

#[derive(Debug, Clone)]
pub struct NewActivity {
    pub title: String,
    pub description: Option<String>,
    pub activity_type: ActivityType,
    pub credits: f64,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct ActivityPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub credits: Option<f64>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// An applied edit: the row as it stood before the patch and after it.
/// Callers that audit the edit diff the two via [`change_details`].
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub before: Activity,
    pub after: Activity,
}

pub fn validate_new(activity: &NewActivity) -> Result<(), LedgerError> {
    if activity.title.trim().is_empty() {
        return Err(LedgerError::Validation("title must not be empty".into()));
    }
    if !activity.credits.is_finite() || activity.credits < 0.0 {
        return Err(LedgerError::Validation(
            "requested credits must be non-negative".into(),
        ));
    }
    if let (Some(start), Some(end)) = (activity.start_date, activity.end_date) {
        if end < start {
            return Err(LedgerError::Validation(
                "end date precedes start date".into(),
            ));
        }
    }
    Ok(())
}

/// Create a submission. Activities always start pending; the requested
/// credits value is informational until a decision overwrites it.
pub async fn create(
    pool: &PgPool,
    student_id: Uuid,
    activity: NewActivity,
) -> Result<Activity, LedgerError> {
    validate_new(&activity)?;

    let row = sqlx::query(
        r#"
        INSERT INTO activity_ledger.activities
        (id, student_id, title, description, activity_type, credits, start_date, end_date, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending')
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(&activity.title)
    .bind(&activity.description)
    .bind(activity.activity_type.as_str())
    .bind(activity.credits)
    .bind(activity.start_date)
    .bind(activity.end_date)
    .fetch_one(pool)
    .await?;

    Activity::from_row(&row)
}

pub async fn get(pool: &PgPool, activity_id: Uuid) -> Result<Activity, LedgerError> {
    let row = sqlx::query("SELECT * FROM activity_ledger.activities WHERE id = $1")
        .bind(activity_id)
        .fetch_optional(pool)
        .await?
        .ok_or(LedgerError::NotFound("activity"))?;

    Activity::from_row(&row)
}

async fn guard_owner_pending(
    pool: &PgPool,
    activity_id: Uuid,
    student_id: Uuid,
) -> Result<Activity, LedgerError> {
    let activity = get(pool, activity_id).await?;
    if activity.student_id != student_id {
        return Err(LedgerError::Forbidden(
            "activity belongs to another student".into(),
        ));
    }
    if activity.status != ActivityStatus::Pending {
        return Err(LedgerError::InvalidStateTransition(format!(
            "activity is {}, only pending activities are editable",
            activity.status
        )));
    }
    Ok(activity)
}

fn validate_patch(before: &Activity, patch: &ActivityPatch) -> Result<(), LedgerError> {
    if let Some(credits) = patch.credits {
        if !credits.is_finite() || credits < 0.0 {
            return Err(LedgerError::Validation(
                "requested credits must be non-negative".into(),
            ));
        }
    }
    if let Some(title) = &patch.title {
        if title.trim().is_empty() {
            return Err(LedgerError::Validation("title must not be empty".into()));
        }
    }
    // Date ordering is checked against the merged row, so patching one end
    // cannot invert a range the other end already pins.
    let start = patch.start_date.or(before.start_date);
    let end = patch.end_date.or(before.end_date);
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err(LedgerError::Validation(
                "end date precedes start date".into(),
            ));
        }
    }
    Ok(())
}

/// Old/new values for every field the patch actually changed, as JSON for
/// the audit trail.
pub fn change_details(before: &Activity, after: &Activity) -> serde_json::Value {
    let mut changes = serde_json::Map::new();
    if before.title != after.title {
        changes.insert(
            "title".into(),
            serde_json::json!({ "old": before.title, "new": after.title }),
        );
    }
    if before.description != after.description {
        changes.insert(
            "description".into(),
            serde_json::json!({ "old": before.description, "new": after.description }),
        );
    }
    if before.credits != after.credits {
        changes.insert(
            "credits".into(),
            serde_json::json!({ "old": before.credits, "new": after.credits }),
        );
    }
    if before.start_date != after.start_date {
        changes.insert(
            "start_date".into(),
            serde_json::json!({ "old": before.start_date, "new": after.start_date }),
        );
    }
    if before.end_date != after.end_date {
        changes.insert(
            "end_date".into(),
            serde_json::json!({ "old": before.end_date, "new": after.end_date }),
        );
    }
    serde_json::Value::Object(changes)
}

/// Edit a pending submission. The guard re-runs inside the statement so a
/// concurrent decision cannot slip an edit onto a decided activity.
pub async fn update(
    pool: &PgPool,
    activity_id: Uuid,
    student_id: Uuid,
    patch: ActivityPatch,
) -> Result<UpdateOutcome, LedgerError> {
    let before = guard_owner_pending(pool, activity_id, student_id).await?;
    validate_patch(&before, &patch)?;

    let result = sqlx::query(
        r#"
        UPDATE activity_ledger.activities
        SET title = COALESCE($1, title),
            description = COALESCE($2, description),
            credits = COALESCE($3, credits),
            start_date = COALESCE($4, start_date),
            end_date = COALESCE($5, end_date),
            updated_at = now()
        WHERE id = $6 AND student_id = $7 AND status = 'pending'
        "#,
    )
    .bind(&patch.title)
    .bind(&patch.description)
    .bind(patch.credits)
    .bind(patch.start_date)
    .bind(patch.end_date)
    .bind(activity_id)
    .bind(student_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(LedgerError::InvalidStateTransition(
            "activity was decided while editing".into(),
        ));
    }

    let after = get(pool, activity_id).await?;
    Ok(UpdateOutcome { before, after })
}

/// Withdraw a pending submission. Same guard as `update`.
pub async fn delete(
    pool: &PgPool,
    activity_id: Uuid,
    student_id: Uuid,
) -> Result<(), LedgerError> {
    guard_owner_pending(pool, activity_id, student_id).await?;

    // Audit entries deliberately survive the delete; only the activity row
    // (never decided, so no approval or ledger rows exist) goes away.
    let result = sqlx::query(
        "DELETE FROM activity_ledger.activities
         WHERE id = $1 AND student_id = $2 AND status = 'pending'",
    )
    .bind(activity_id)
    .bind(student_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(LedgerError::InvalidStateTransition(
            "activity was decided while deleting".into(),
        ));
    }
    Ok(())
}

pub async fn list_by_student(
    pool: &PgPool,
    student_id: Uuid,
    status: Option<ActivityStatus>,
) -> Result<Vec<Activity>, LedgerError> {
    list_by_students(pool, &[student_id], status).await
}

pub async fn list_by_students(
    pool: &PgPool,
    student_ids: &[Uuid],
    status: Option<ActivityStatus>,
) -> Result<Vec<Activity>, LedgerError> {
    let mut query = String::from(
        "SELECT * FROM activity_ledger.activities WHERE student_id = ANY($1)",
    );
    if status.is_some() {
        query.push_str(" AND status = $2");
    }
    query.push_str(" ORDER BY created_at DESC");

    let mut rows = sqlx::query(&query).bind(student_ids.to_vec());
    if let Some(status) = status {
        rows = rows.bind(status.as_str());
    }

    let records = rows.fetch_all(pool).await?;
    records.iter().map(Activity::from_row).collect()
}

/// File-metadata collaborator hook: bump the attachment counter. The bytes
/// live elsewhere; this engine only tracks the count.
pub async fn record_file_attached(
    pool: &PgPool,
    activity_id: Uuid,
) -> Result<Activity, LedgerError> {
    let result = sqlx::query(
        "UPDATE activity_ledger.activities SET files_count = files_count + 1 WHERE id = $1",
    )
    .bind(activity_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(LedgerError::NotFound("activity"));
    }
    get(pool, activity_id).await
}

/// Pending-review backlog per teacher, for the compliance report.
pub async fn pending_counts_by_teacher(
    pool: &PgPool,
) -> Result<Vec<(String, i64)>, LedgerError> {
    let rows = sqlx::query(
        r#"
        SELECT u.full_name, COUNT(a.id) AS pending
        FROM activity_ledger.users u
        JOIN activity_ledger.teacher_student_allocations t ON t.teacher_id = u.id
        JOIN activity_ledger.activities a
            ON a.student_id = t.student_id AND a.status = 'pending'
        WHERE u.role = 'teacher'
        GROUP BY u.full_name
        ORDER BY pending DESC, u.full_name
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| (row.get("full_name"), row.get("pending")))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_activity() -> NewActivity {
        NewActivity {
            title: "AWS Certification".to_string(),
            description: None,
            activity_type: ActivityType::Certification,
            credits: 0.0,
            start_date: None,
            end_date: None,
        }
    }

    #[test]
    fn empty_titles_are_rejected() {
        let mut activity = new_activity();
        activity.title = "   ".to_string();
        assert!(matches!(
            validate_new(&activity),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn negative_requested_credits_are_rejected() {
        let mut activity = new_activity();
        activity.credits = -1.0;
        assert!(validate_new(&activity).is_err());
        activity.credits = f64::NAN;
        assert!(validate_new(&activity).is_err());
    }

    #[test]
    fn date_range_must_be_ordered() {
        let mut activity = new_activity();
        activity.start_date = NaiveDate::from_ymd_opt(2026, 3, 10);
        activity.end_date = NaiveDate::from_ymd_opt(2026, 3, 1);
        assert!(validate_new(&activity).is_err());

        activity.end_date = NaiveDate::from_ymd_opt(2026, 3, 10);
        assert!(validate_new(&activity).is_ok());
    }

    fn stored_activity() -> Activity {
        Activity {
            id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            title: "AWS Certification".to_string(),
            description: None,
            activity_type: ActivityType::Certification,
            credits: 2.0,
            start_date: NaiveDate::from_ymd_opt(2026, 3, 1),
            end_date: NaiveDate::from_ymd_opt(2026, 3, 10),
            files_count: 0,
            status: ActivityStatus::Pending,
            created_at: chrono::Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn patch_cannot_invert_the_stored_date_range() {
        let before = stored_activity();

        // New end lands before the stored start.
        let patch = ActivityPatch {
            end_date: NaiveDate::from_ymd_opt(2026, 2, 20),
            ..Default::default()
        };
        assert!(matches!(
            validate_patch(&before, &patch),
            Err(LedgerError::Validation(_))
        ));

        // Moving both ends together is fine.
        let patch = ActivityPatch {
            start_date: NaiveDate::from_ymd_opt(2026, 2, 10),
            end_date: NaiveDate::from_ymd_opt(2026, 2, 20),
            ..Default::default()
        };
        assert!(validate_patch(&before, &patch).is_ok());
    }

    #[test]
    fn change_details_records_only_changed_fields() {
        let before = stored_activity();
        let mut after = before.clone();
        after.title = "AWS Solutions Architect".to_string();
        after.credits = 3.0;

        let details = change_details(&before, &after);
        let changes = details.as_object().unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes["title"]["old"], "AWS Certification");
        assert_eq!(changes["title"]["new"], "AWS Solutions Architect");
        assert_eq!(changes["credits"]["old"], 2.0);
        assert_eq!(changes["credits"]["new"], 3.0);
        assert!(!changes.contains_key("description"));
    }

    #[test]
    fn change_details_is_empty_for_a_no_op_patch() {
        let before = stored_activity();
        let details = change_details(&before, &before.clone());
        assert!(details.as_object().unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a disposable Postgres"]
    async fn update_reports_before_and_after_values() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPool::connect(&url).await.expect("connect");
        crate::db::init_db(&pool).await.expect("migrate");
        crate::db::seed(&pool).await.expect("seed");

        let kiara = Uuid::parse_str("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2").unwrap();
        let created = create(&pool, kiara, new_activity()).await.unwrap();

        let outcome = update(
            &pool,
            created.id,
            kiara,
            ActivityPatch {
                title: Some("AWS Solutions Architect".to_string()),
                credits: Some(3.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.before.title, "AWS Certification");
        assert_eq!(outcome.after.title, "AWS Solutions Architect");
        assert_eq!(outcome.after.credits, 3.0);

        let details = change_details(&outcome.before, &outcome.after);
        assert_eq!(details["title"]["new"], "AWS Solutions Architect");
        assert_eq!(details["credits"]["old"], 0.0);
    }
}
