use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, NaiveDate, Utc};
use clap::{ArgGroup, Parser, Subcommand};
use uuid::Uuid;

mod activities;
mod actor;
mod allocations;
mod audit;
mod db;
mod engine;
mod error;
mod ledger;
mod models;
mod notify;
mod registry;
mod report;

use models::{ActivityStatus, ActivityType, Decision, LogType};

#[derive(Parser)]
#[command(name = "activity-credit-ledger")]
#[command(about = "Activity approval and credit ledger engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data (admin, teachers, students, allocations)
    Seed,
    /// Allocate students to a teacher for review (idempotent)
    Allocate {
        #[arg(long)]
        admin: Uuid,
        #[arg(long)]
        teacher: Uuid,
        #[arg(long, required = true, num_args = 1..)]
        students: Vec<Uuid>,
    },
    /// Revoke an allocation edge
    Revoke {
        #[arg(long)]
        admin: Uuid,
        #[arg(long)]
        allocation: Uuid,
    },
    /// List allocation edges
    Allocations {
        #[arg(long)]
        teacher: Option<Uuid>,
    },
    /// Bulk-import allocations from a CSV of teacher/student emails
    ImportAllocations {
        #[arg(long)]
        admin: Uuid,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Submit an activity for review
    Submit {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        title: String,
        #[arg(long, value_name = "TYPE")]
        activity_type: ActivityType,
        #[arg(long, default_value_t = 0.0)]
        credits: f64,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        start_date: Option<NaiveDate>,
        #[arg(long)]
        end_date: Option<NaiveDate>,
    },
    /// Edit a pending submission (owner only)
    UpdateActivity {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        activity: Uuid,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        credits: Option<f64>,
        #[arg(long)]
        start_date: Option<NaiveDate>,
        #[arg(long)]
        end_date: Option<NaiveDate>,
    },
    /// Withdraw a pending submission (owner only)
    DeleteActivity {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        activity: Uuid,
    },
    /// Approve or reject a pending activity
    Decide {
        #[arg(long)]
        teacher: Uuid,
        #[arg(long)]
        activity: Uuid,
        #[arg(long)]
        decision: Decision,
        #[arg(long, default_value_t = 0.0)]
        credits: f64,
        #[arg(long)]
        comments: Option<String>,
    },
    /// List activities for a student, or across a teacher's students
    #[command(group(
        ArgGroup::new("scope")
            .args(["student", "teacher"])
            .required(true)
            .multiple(false)
    ))]
    Activities {
        #[arg(long)]
        student: Option<Uuid>,
        #[arg(long)]
        teacher: Option<Uuid>,
        #[arg(long)]
        status: Option<ActivityStatus>,
    },
    /// Record that the file collaborator attached a certificate
    AttachFile {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        activity: Uuid,
    },
    /// Show a user's notification inbox
    Notifications {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        unread_only: bool,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Mark one notification read
    MarkRead {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        notification: Uuid,
    },
    /// Mark every notification read
    ReadAll {
        #[arg(long)]
        user: Uuid,
    },
    /// Show the audit trail for an activity or a user
    #[command(group(
        ArgGroup::new("scope")
            .args(["activity", "user"])
            .required(true)
            .multiple(false)
    ))]
    Audit {
        #[arg(long)]
        activity: Option<Uuid>,
        #[arg(long)]
        user: Option<Uuid>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Audit entry counts by type for one user
    AuditSummary {
        #[arg(long)]
        user: Uuid,
        #[arg(long, default_value_t = 30)]
        since_days: i64,
    },
    /// Check stored credit totals against approved awards
    Reconcile {
        #[arg(long)]
        student: Option<Uuid>,
    },
    /// Generate the markdown compliance report
    Report {
        #[arg(long, default_value_t = 30)]
        since_days: i64,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL must be set to a Postgres instance")?;
    let pool = db::connect(&database_url).await?;

    let channels = Arc::new(registry::ChannelRegistry::new());
    let dispatcher = notify::NotificationDispatcher::spawn(pool.clone(), Arc::clone(&channels));
    // When deciding, the CLI opens a live channel for the student so the
    // push side can be observed once the worker drains.
    let mut live_feed: Option<(Uuid, tokio::sync::mpsc::UnboundedReceiver<registry::Push>)> = None;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::init_db(&pool).await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Allocate {
            admin,
            teacher,
            students,
        } => {
            let admin_id = actor::resolve(&pool, admin).await?.require_admin()?;
            let outcome =
                allocations::allocate(&pool, &dispatcher, teacher, &students, admin_id).await?;
            println!(
                "Allocated {} students ({} already allocated).",
                outcome.created.len(),
                outcome.skipped.len()
            );
        }
        Commands::Revoke { admin, allocation } => {
            actor::resolve(&pool, admin).await?.require_admin()?;
            allocations::revoke(&pool, allocation).await?;
            println!("Allocation revoked.");
        }
        Commands::Allocations { teacher } => {
            for edge in allocations::list(&pool, teacher).await? {
                println!(
                    "- {} teacher {} -> student {} (allocated by {})",
                    edge.id, edge.teacher_id, edge.student_id, edge.allocated_by
                );
            }
        }
        Commands::ImportAllocations { admin, csv } => {
            let admin_id = actor::resolve(&pool, admin).await?.require_admin()?;
            let created = allocations::import_csv(&pool, &dispatcher, &csv, admin_id).await?;
            println!("Created {created} allocations from {}.", csv.display());
        }
        Commands::Submit {
            student,
            title,
            activity_type,
            credits,
            description,
            start_date,
            end_date,
        } => {
            let student_id = actor::resolve(&pool, student).await?.require_student()?;
            let activity = activities::create(
                &pool,
                student_id,
                activities::NewActivity {
                    title,
                    description,
                    activity_type,
                    credits,
                    start_date,
                    end_date,
                },
            )
            .await?;
            engine::on_submitted(&pool, &dispatcher, &activity).await?;
            println!(
                "Activity {} submitted ({}, status {}).",
                activity.id, activity.activity_type, activity.status
            );
        }
        Commands::UpdateActivity {
            student,
            activity,
            title,
            description,
            credits,
            start_date,
            end_date,
        } => {
            let student_id = actor::resolve(&pool, student).await?.require_student()?;
            let updated = activities::update(
                &pool,
                activity,
                student_id,
                activities::ActivityPatch {
                    title,
                    description,
                    credits,
                    start_date,
                    end_date,
                },
            )
            .await?;
            audit::append_on(
                &pool,
                audit::NewAuditEntry {
                    activity_id: updated.after.id,
                    actor_id: student_id,
                    target_user_id: None,
                    log_type: LogType::ActivityUpdated,
                    action: format!("Activity '{}' updated by student", updated.after.title),
                    details: Some(activities::change_details(&updated.before, &updated.after)),
                },
            )
            .await?;
            println!("Activity {} updated.", updated.after.id);
        }
        Commands::DeleteActivity { student, activity } => {
            let student_id = actor::resolve(&pool, student).await?.require_student()?;
            activities::delete(&pool, activity, student_id).await?;
            audit::append_on(
                &pool,
                audit::NewAuditEntry {
                    activity_id: activity,
                    actor_id: student_id,
                    target_user_id: None,
                    log_type: LogType::ActivityDeleted,
                    action: "Activity withdrawn by student".to_string(),
                    details: None,
                },
            )
            .await?;
            println!("Activity {activity} deleted.");
        }
        Commands::Decide {
            teacher,
            activity,
            decision,
            credits,
            comments,
        } => {
            let teacher_id = actor::resolve(&pool, teacher).await?.require_teacher()?;
            let target = activities::get(&pool, activity).await?;
            live_feed = Some((target.student_id, channels.connect(target.student_id)));
            let approval = engine::decide(
                &pool,
                &dispatcher,
                engine::DecideRequest {
                    activity_id: activity,
                    teacher_id,
                    decision,
                    credits_awarded: credits,
                    comments,
                },
            )
            .await?;
            println!(
                "Activity {} {} ({} credits awarded).",
                approval.activity_id, approval.status, approval.credits_awarded
            );
        }
        Commands::Activities {
            student,
            teacher,
            status,
        } => {
            let listed = match (student, teacher) {
                (Some(student_id), _) => {
                    activities::list_by_student(&pool, student_id, status).await?
                }
                (_, Some(teacher_id)) => {
                    let students: Vec<Uuid> = allocations::students_of(&pool, teacher_id)
                        .await?
                        .into_iter()
                        .collect();
                    activities::list_by_students(&pool, &students, status).await?
                }
                _ => unreachable!("clap enforces the scope group"),
            };
            for activity in listed {
                println!(
                    "- {} [{}] '{}' {} credits (student {})",
                    activity.id,
                    activity.status,
                    activity.title,
                    activity.credits,
                    activity.student_id
                );
            }
        }
        Commands::AttachFile { user, activity } => {
            let actor = actor::resolve(&pool, user).await?;
            let updated = activities::record_file_attached(&pool, activity).await?;
            audit::append_on(
                &pool,
                audit::NewAuditEntry {
                    activity_id: activity,
                    actor_id: actor.user_id(),
                    target_user_id: None,
                    log_type: LogType::CertificateUploaded,
                    action: "Certificate file attached".to_string(),
                    details: Some(serde_json::json!({ "files_count": updated.files_count })),
                },
            )
            .await?;
            println!(
                "Activity {} now has {} files.",
                updated.id, updated.files_count
            );
        }
        Commands::Notifications {
            user,
            unread_only,
            limit,
        } => {
            let unread = notify::unread_count(&pool, user).await?;
            println!("{unread} unread.");
            for n in notify::list(&pool, user, unread_only, limit).await? {
                let marker = if n.is_read { " " } else { "*" };
                println!("{marker} {} [{}] {}: {}", n.id, n.notification_type, n.title, n.message);
            }
        }
        Commands::MarkRead { user, notification } => {
            notify::mark_read(&pool, notification, user).await?;
            println!("Notification marked read.");
        }
        Commands::ReadAll { user } => {
            let count = notify::mark_all_read(&pool, user).await?;
            println!("Marked {count} notifications read.");
        }
        Commands::Audit {
            activity,
            user,
            limit,
            offset,
        } => {
            let entries = match (activity, user) {
                (Some(activity_id), _) => audit::list_by_activity(&pool, activity_id).await?,
                (_, Some(user_id)) => audit::list_by_user(&pool, user_id, limit, offset).await?,
                _ => unreachable!("clap enforces the scope group"),
            };
            for entry in entries {
                println!(
                    "- {} [{}] {} (actor {})",
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.log_type,
                    entry.action,
                    entry.user_id
                );
            }
        }
        Commands::AuditSummary { user, since_days } => {
            let since = Utc::now() - Duration::days(since_days.max(1));
            let summary = audit::summary_for_user(&pool, user, since).await?;
            if summary.is_empty() {
                println!("No audit entries in this window.");
            }
            for (log_type, count) in summary {
                println!("- {log_type}: {count} entries");
            }
        }
        Commands::Reconcile { student } => {
            let results = match student {
                Some(student_id) => vec![ledger::reconcile(&pool, student_id).await?],
                None => ledger::reconcile_all(&pool).await?,
            };
            let mut divergent = 0usize;
            for r in &results {
                if r.is_consistent() {
                    println!("- {} OK ({:.2} credits)", r.student_id, r.stored);
                } else {
                    divergent += 1;
                    println!(
                        "- {} DIVERGED stored {:.2}, recomputed {:.2}",
                        r.student_id, r.stored, r.recomputed
                    );
                }
            }
            if divergent > 0 {
                anyhow::bail!("{divergent} students fail reconciliation");
            }
        }
        Commands::Report { since_days, out } => {
            let since = Utc::now() - Duration::days(since_days.max(1));
            let summary = audit::summary_all(&pool, since).await?;
            let reconciliations = ledger::reconcile_all(&pool).await?;
            let backlog = activities::pending_counts_by_teacher(&pool).await?;
            let report = report::build_report(since, &summary, &reconciliations, &backlog);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    dispatcher.shutdown().await;
    if let Some((user_id, mut feed)) = live_feed {
        while let Ok(push) = feed.try_recv() {
            println!("live push to {user_id}: [{}] {}", push.notification_type, push.title);
        }
        channels.disconnect(user_id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_activity_accepts_date_patches() {
        let cli = Cli::try_parse_from([
            "activity-credit-ledger",
            "update-activity",
            "--student",
            "d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2",
            "--activity",
            "b1b2c3d4-e5f6-4a1b-8c2d-9e0f1a2b3c4d",
            "--start-date",
            "2026-03-01",
            "--end-date",
            "2026-03-10",
        ])
        .unwrap();

        match cli.command {
            Commands::UpdateActivity {
                title,
                start_date,
                end_date,
                ..
            } => {
                assert!(title.is_none());
                assert_eq!(start_date, NaiveDate::from_ymd_opt(2026, 3, 1));
                assert_eq!(end_date, NaiveDate::from_ymd_opt(2026, 3, 10));
            }
            _ => panic!("parsed into the wrong subcommand"),
        }
    }
}
