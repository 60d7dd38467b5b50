use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::error::LedgerError;

/// Canonical string forms are lowercase. Parsing is case-insensitive so the
/// persistence boundary is the only place normalization ever happens.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            pub fn parse(value: &str) -> Result<Self, LedgerError> {
                match value.to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(LedgerError::Validation(format!(
                        "unknown {}: {other:?}",
                        stringify!($name),
                    ))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = LedgerError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Self::parse(value)
            }
        }
    };
}

string_enum!(UserRole {
    Admin => "admin",
    Teacher => "teacher",
    Student => "student",
});

string_enum!(UserStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

string_enum!(ActivityType {
    Seminar => "seminar",
    Conference => "conference",
    OnlineCourse => "online_course",
    Mooc => "mooc",
    Internship => "internship",
    Extracurricular => "extracurricular",
    Workshop => "workshop",
    Certification => "certification",
});

string_enum!(ActivityStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
    UnderReview => "under_review",
});

/// The two outcomes a reviewer may record. `under_review` is storable but no
/// operation enters or exits it, so it is not a decision.
string_enum!(Decision {
    Approved => "approved",
    Rejected => "rejected",
});

impl Decision {
    pub fn activity_status(&self) -> ActivityStatus {
        match self {
            Self::Approved => ActivityStatus::Approved,
            Self::Rejected => ActivityStatus::Rejected,
        }
    }
}

string_enum!(LogType {
    ActivityCreated => "activity_created",
    ActivityUpdated => "activity_updated",
    ActivityDeleted => "activity_deleted",
    ActivitySubmitted => "activity_submitted",
    ActivityApproved => "activity_approved",
    ActivityRejected => "activity_rejected",
    ActivityUnderReview => "activity_under_review",
    CertificateUploaded => "certificate_uploaded",
    CertificateViewed => "certificate_viewed",
    CertificateDownloaded => "certificate_downloaded",
    CommentAdded => "comment_added",
    CreditsAwarded => "credits_awarded",
    StatusChanged => "status_changed",
});

string_enum!(NotificationType {
    ActivitySubmitted => "activity_submitted",
    ActivityApproved => "activity_approved",
    ActivityRejected => "activity_rejected",
    StudentAllocated => "student_allocated",
});

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: UserRole,
    pub status: UserStatus,
    pub department: Option<String>,
    pub performance_score: f64,
    pub total_credits_earned: f64,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn from_row(row: &PgRow) -> Result<Self, LedgerError> {
        Ok(User {
            id: row.get("id"),
            email: row.get("email"),
            full_name: row.get("full_name"),
            role: UserRole::parse(row.get("role"))?,
            status: UserStatus::parse(row.get("status"))?,
            department: row.get("department"),
            performance_score: row.get("performance_score"),
            total_credits_earned: row.get("total_credits_earned"),
            created_at: row.get("created_at"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Activity {
    pub id: Uuid,
    pub student_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub activity_type: ActivityType,
    pub credits: f64,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub files_count: i32,
    pub status: ActivityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Activity {
    pub fn from_row(row: &PgRow) -> Result<Self, LedgerError> {
        Ok(Activity {
            id: row.get("id"),
            student_id: row.get("student_id"),
            title: row.get("title"),
            description: row.get("description"),
            activity_type: ActivityType::parse(row.get("activity_type"))?,
            credits: row.get("credits"),
            start_date: row.get("start_date"),
            end_date: row.get("end_date"),
            files_count: row.get("files_count"),
            status: ActivityStatus::parse(row.get("status"))?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ActivityApproval {
    pub id: Uuid,
    pub activity_id: Uuid,
    pub teacher_id: Uuid,
    pub status: Decision,
    pub comments: Option<String>,
    pub credits_awarded: f64,
    pub decided_at: DateTime<Utc>,
}

impl ActivityApproval {
    pub fn from_row(row: &PgRow) -> Result<Self, LedgerError> {
        Ok(ActivityApproval {
            id: row.get("id"),
            activity_id: row.get("activity_id"),
            teacher_id: row.get("teacher_id"),
            status: Decision::parse(row.get("status"))?,
            comments: row.get("comments"),
            credits_awarded: row.get("credits_awarded"),
            decided_at: row.get("decided_at"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: Uuid,
    pub activity_id: Uuid,
    pub user_id: Uuid,
    pub target_user_id: Option<Uuid>,
    pub log_type: LogType,
    pub action: String,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn from_row(row: &PgRow) -> Result<Self, LedgerError> {
        Ok(AuditEntry {
            id: row.get("id"),
            activity_id: row.get("activity_id"),
            user_id: row.get("user_id"),
            target_user_id: row.get("target_user_id"),
            log_type: LogType::parse(row.get("log_type"))?,
            action: row.get("action"),
            details: row.get("details"),
            created_at: row.get("created_at"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Allocation {
    pub id: Uuid,
    pub teacher_id: Uuid,
    pub student_id: Uuid,
    pub allocated_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Allocation {
    pub fn from_row(row: &PgRow) -> Result<Self, LedgerError> {
        Ok(Allocation {
            id: row.get("id"),
            teacher_id: row.get("teacher_id"),
            student_id: row.get("student_id"),
            allocated_by: row.get("allocated_by"),
            created_at: row.get("created_at"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub related_activity_id: Option<Uuid>,
    pub related_user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn from_row(row: &PgRow) -> Result<Self, LedgerError> {
        Ok(Notification {
            id: row.get("id"),
            user_id: row.get("user_id"),
            notification_type: NotificationType::parse(row.get("notification_type"))?,
            title: row.get("title"),
            message: row.get("message"),
            is_read: row.get("is_read"),
            related_activity_id: row.get("related_activity_id"),
            related_user_id: row.get("related_user_id"),
            created_at: row.get("created_at"),
            read_at: row.get("read_at"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_round_trip_through_canonical_form() {
        for status in [
            ActivityStatus::Pending,
            ActivityStatus::Approved,
            ActivityStatus::Rejected,
            ActivityStatus::UnderReview,
        ] {
            assert_eq!(ActivityStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn parsing_normalizes_case_once() {
        assert_eq!(
            ActivityStatus::parse("PENDING").unwrap(),
            ActivityStatus::Pending
        );
        assert_eq!(
            ActivityStatus::parse("Under_Review").unwrap(),
            ActivityStatus::UnderReview
        );
        assert_eq!(UserRole::parse("Teacher").unwrap(), UserRole::Teacher);
    }

    #[test]
    fn unknown_values_are_validation_errors() {
        let err = ActivityType::parse("karaoke").unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn decisions_map_to_terminal_statuses() {
        assert_eq!(
            Decision::Approved.activity_status(),
            ActivityStatus::Approved
        );
        assert_eq!(
            Decision::Rejected.activity_status(),
            ActivityStatus::Rejected
        );
        assert!(Decision::parse("under_review").is_err());
    }
}
