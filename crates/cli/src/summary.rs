//! End-of-run summary.

use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use git4p4_core::models::FileSets;
use git4p4_core::SessionReport;

use super::style;

const SHORT_HASH_LEN: usize = 10;

/// Print the report as a table of commits plus the final position changes.
pub fn print_report(report: &SessionReport) {
    println!();
    let title = if report.dry_run {
        "git4p4 (dry run)"
    } else {
        "git4p4"
    };
    println!("{}", style::header(title));
    println!("  Range      {}", report.range);
    println!("  Started on {}", short(report.start.restore_ref()));
    println!();

    let outcomes = &report.result.outcomes;
    if outcomes.is_empty() {
        println!("  {}", style::dim("No commits to convert."));
    } else {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Commit", "Summary", "Changelist", "Files", "Status"]);

        for outcome in outcomes {
            let changelist = outcome
                .changelist
                .as_ref()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "—".to_string());
            table.add_row(vec![
                Cell::new(short(&outcome.revision)),
                Cell::new(&outcome.summary),
                Cell::new(changelist),
                Cell::new(file_counts(&outcome.files)),
                Cell::new(style::status(&outcome.status)),
            ]);
        }
        println!("{table}");
    }

    if !report.notes.is_empty() {
        println!();
        for note in &report.notes {
            println!("  {}", style::dim(note));
        }
    }

    println!();
    let converted = report.result.converted();
    match &report.result.failure {
        None => println!(
            "{}",
            style::success(&format!("Converted commits: {}", converted))
        ),
        Some(failure) => {
            println!(
                "{}",
                style::warn(&format!("Converted commits: {}", converted))
            );
            println!("{}", style::error(failure));
        }
    }
    for err in &report.finish_errors {
        println!("{}", style::error(err));
    }
}

fn short(revision: &str) -> &str {
    let is_hash = revision.len() > SHORT_HASH_LEN && revision.chars().all(|c| c.is_ascii_hexdigit());
    if is_hash {
        &revision[..SHORT_HASH_LEN]
    } else {
        revision
    }
}

/// e.g. `2 add, 1 move`.
fn file_counts(files: &FileSets) -> String {
    let parts: Vec<String> = [
        (files.add.len(), "add"),
        (files.edit.len(), "edit"),
        (files.delete.len(), "delete"),
        (files.rename.len(), "move"),
    ]
    .into_iter()
    .filter(|(n, _)| *n > 0)
    .map(|(n, verb)| format!("{} {}", n, verb))
    .collect();
    if parts.is_empty() {
        "—".to_string()
    } else {
        parts.join(", ")
    }
}
