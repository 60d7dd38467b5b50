use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::{AuditEntry, LogType};

/// What happened, expressed for the append-only ledger. Entries are never
/// updated or deleted; reconciliation treats them as the source of truth.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub activity_id: Uuid,
    pub actor_id: Uuid,
    pub target_user_id: Option<Uuid>,
    pub log_type: LogType,
    pub action: String,
    pub details: Option<serde_json::Value>,
}

/// Append an entry on an open connection. Decision-path callers pass their
/// transaction so the entry commits or rolls back with the decision.
pub async fn append(
    conn: &mut PgConnection,
    entry: NewAuditEntry,
) -> Result<Uuid, LedgerError> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO activity_ledger.activity_logs
        (id, activity_id, user_id, target_user_id, log_type, action, details)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(id)
    .bind(entry.activity_id)
    .bind(entry.actor_id)
    .bind(entry.target_user_id)
    .bind(entry.log_type.as_str())
    .bind(&entry.action)
    .bind(&entry.details)
    .execute(conn)
    .await?;

    Ok(id)
}

pub async fn append_on(pool: &PgPool, entry: NewAuditEntry) -> Result<Uuid, LedgerError> {
    let mut conn = pool.acquire().await?;
    append(&mut conn, entry).await
}

pub async fn list_by_activity(
    pool: &PgPool,
    activity_id: Uuid,
) -> Result<Vec<AuditEntry>, LedgerError> {
    let rows = sqlx::query(
        "SELECT * FROM activity_ledger.activity_logs
         WHERE activity_id = $1 ORDER BY created_at",
    )
    .bind(activity_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(AuditEntry::from_row).collect()
}

pub async fn list_by_user(
    pool: &PgPool,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<AuditEntry>, LedgerError> {
    let rows = sqlx::query(
        "SELECT * FROM activity_ledger.activity_logs
         WHERE user_id = $1 OR target_user_id = $1
         ORDER BY created_at DESC LIMIT $2 OFFSET $3",
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    rows.iter().map(AuditEntry::from_row).collect()
}

/// Entry counts by log type for one user since a cutoff, newest ledger state.
pub async fn summary_for_user(
    pool: &PgPool,
    user_id: Uuid,
    since: DateTime<Utc>,
) -> Result<Vec<(LogType, i64)>, LedgerError> {
    let rows = sqlx::query(
        r#"
        SELECT log_type, COUNT(*) AS entries
        FROM activity_ledger.activity_logs
        WHERE (user_id = $1 OR target_user_id = $1) AND created_at >= $2
        GROUP BY log_type
        ORDER BY entries DESC, log_type
        "#,
    )
    .bind(user_id)
    .bind(since)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| Ok((LogType::parse(row.get("log_type"))?, row.get("entries"))))
        .collect()
}

/// System-wide counts by log type, for the compliance report.
pub async fn summary_all(
    pool: &PgPool,
    since: DateTime<Utc>,
) -> Result<Vec<(LogType, i64)>, LedgerError> {
    let rows = sqlx::query(
        r#"
        SELECT log_type, COUNT(*) AS entries
        FROM activity_ledger.activity_logs
        WHERE created_at >= $1
        GROUP BY log_type
        ORDER BY entries DESC, log_type
        "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| Ok((LogType::parse(row.get("log_type"))?, row.get("entries"))))
        .collect()
}
