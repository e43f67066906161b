//! Table rendering for individuals, import reports and the audit log.

use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use idmerge_core::db::queries::AuditLogEntry;
use idmerge_core::models::Individual;
use idmerge_core::ImportReport;

use crate::style;

const DATE_FORMAT: &str = "%Y-%m-%d";

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header);
    table
}

fn or_dash(value: Option<&str>) -> &str {
    match value {
        Some(v) if !v.is_empty() => v,
        _ => "—",
    }
}

/// Print an individual with its identities and enrollments.
pub fn print_individual(individual: &Individual) {
    println!();
    println!(
        "{}",
        style::header(&format!("Individual {}", individual.canonical_id))
    );
    println!();
    println!("  Status   : {}", style::lock_state(individual.is_locked));
    println!("  Name     : {}", or_dash(individual.profile.name.as_deref()));
    println!("  Email    : {}", or_dash(individual.profile.email.as_deref()));
    if individual.profile.is_bot {
        println!("  Bot      : yes");
    }
    println!("  Created  : {}", individual.created_at.to_rfc3339());
    println!("  Modified : {}", individual.last_modified.to_rfc3339());
    println!();

    let mut identities = new_table(vec!["Fingerprint", "Source", "Email", "Name", "Username"]);
    for identity in &individual.identities {
        identities.add_row(vec![
            Cell::new(identity.fingerprint.as_str()),
            Cell::new(&identity.source),
            Cell::new(or_dash(identity.email.as_deref())),
            Cell::new(or_dash(identity.name.as_deref())),
            Cell::new(or_dash(identity.username.as_deref())),
        ]);
    }
    println!("{}", identities);

    if individual.enrollments.is_empty() {
        println!("{}", style::dim("No enrollments."));
    } else {
        let mut enrollments = new_table(vec!["Organization", "From", "To"]);
        for enrollment in &individual.enrollments {
            enrollments.add_row(vec![
                Cell::new(&enrollment.organization),
                Cell::new(enrollment.start.format(DATE_FORMAT)),
                Cell::new(enrollment.end.format(DATE_FORMAT)),
            ]);
        }
        println!("{}", enrollments);
    }
    println!();
}

/// Print the summary of an import batch.
pub fn print_report(report: &ImportReport) {
    println!("{}", style::success("Import complete"));
    println!("  Job              : {}", report.job_id);
    println!("  Candidates       : {}", report.candidates);
    println!("  Identities added : {}", report.total_created);
    println!("  Merges           : {}", report.merges());
    println!("  Enrollments      : {}", report.enrollments_applied);

    let refused = report.refused_merges();
    if refused > 0 {
        println!("{}", style::warn(&format!("{} merge(s) refused: individual locked", refused)));
    }
    let skipped = report.skipped_identities();
    if skipped > 0 {
        println!("{}", style::warn(&format!("{} invalid identit(ies) skipped", skipped)));
    }

    if !report.failures.is_empty() {
        println!();
        println!(
            "{}",
            style::error(&format!("{} candidate(s) with rejected enrollments", report.failures.len()))
        );
        let mut table = new_table(vec!["#", "Individual", "Cause"]);
        for failure in &report.failures {
            table.add_row(vec![
                Cell::new(failure.index),
                Cell::new(failure.canonical_id.as_str()),
                Cell::new(&failure.cause).fg(Color::Red),
            ]);
        }
        println!("{}", table);
    }
}

/// Print audit-log entries, newest first.
pub fn print_audit(entries: &[AuditLogEntry]) {
    let mut table = new_table(vec!["Timestamp", "Action", "Individual", "Details"]);
    for entry in entries {
        let action = match entry.action.as_str() {
            "merge" => Cell::new(&entry.action).fg(Color::Blue),
            "lock" | "unlock" => Cell::new(&entry.action).fg(Color::Yellow),
            _ => Cell::new(&entry.action),
        };
        table.add_row(vec![
            Cell::new(&entry.created_at),
            action,
            Cell::new(truncate(or_dash(entry.canonical_id.as_deref()), 12)),
            Cell::new(truncate(or_dash(entry.details.as_deref()), 60)),
        ]);
    }
    println!("{}", table);
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("0123456789abcdef", 8), "0123456…");
        assert_eq!(truncate("Jöhn Smïth", 4), "Jöh…");
    }

    #[test]
    fn test_or_dash() {
        assert_eq!(or_dash(None), "—");
        assert_eq!(or_dash(Some("")), "—");
        assert_eq!(or_dash(Some("x")), "x");
    }
}
