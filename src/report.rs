use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::ledger::Reconciliation;
use crate::models::LogType;

/// Build the markdown compliance report from read-only projections: audit
/// entry counts, ledger reconciliation and the pending-review backlog.
pub fn build_report(
    since: DateTime<Utc>,
    audit_summary: &[(LogType, i64)],
    reconciliations: &[Reconciliation],
    pending_by_teacher: &[(String, i64)],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Activity Ledger Compliance Report");
    let _ = writeln!(
        output,
        "Audit window since {}",
        since.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Audit Trail Mix");

    if audit_summary.is_empty() {
        let _ = writeln!(output, "No audit entries in this window.");
    } else {
        for (log_type, count) in audit_summary {
            let _ = writeln!(output, "- {log_type}: {count} entries");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Credit Reconciliation");

    let divergent: Vec<&Reconciliation> = reconciliations
        .iter()
        .filter(|r| !r.is_consistent())
        .collect();
    if reconciliations.is_empty() {
        let _ = writeln!(output, "No students on record.");
    } else if divergent.is_empty() {
        let _ = writeln!(
            output,
            "All {} students reconcile: stored totals match approved awards.",
            reconciliations.len()
        );
    } else {
        for r in divergent {
            let _ = writeln!(
                output,
                "- DIVERGED {}: stored {:.2}, recomputed {:.2}",
                r.student_id, r.stored, r.recomputed
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Pending Review Backlog");

    if pending_by_teacher.is_empty() {
        let _ = writeln!(output, "No pending activities await review.");
    } else {
        for (teacher, pending) in pending_by_teacher {
            let _ = writeln!(output, "- {teacher}: {pending} pending activities");
        }
    }

    output
}
