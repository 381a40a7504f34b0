//! Plain-text rendering of a category's change set.

use yhmon_core::{Category, ListingRecord};

use crate::diff::ChangeSet;

fn listing_line(marker: char, record: &ListingRecord) -> String {
    format!("  {marker} {} | {}", record.identifier, record.title)
}

pub fn format_report(category: Category, changes: &ChangeSet) -> String {
    let mut lines = Vec::new();

    if changes.first_run {
        lines.push(format!(
            "[{category}] first run: {} listing(s) recorded, nothing to compare",
            changes.added.len()
        ));
        lines.extend(changes.added.iter().map(|r| listing_line('*', r)));
        return lines.join("\n");
    }

    lines.push(format!(
        "[{category}] added: {}, removed: {}, modified: {}",
        changes.added.len(),
        changes.removed.len(),
        changes.modified.len()
    ));

    if !changes.has_changes() {
        lines.push("  no changes".to_string());
        return lines.join("\n");
    }

    lines.extend(changes.added.iter().map(|r| listing_line('+', r)));
    lines.extend(changes.removed.iter().map(|r| listing_line('-', r)));
    for modified in &changes.modified {
        lines.push(listing_line('~', &modified.current));
        for change in &modified.changes {
            lines.push(format!(
                "      {}: {:?} -> {:?}",
                change.field, change.before, change.after
            ));
        }
    }

    lines.join("\n")
}
