//! Classifies listings across two snapshots of the same category.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use yhmon_core::{ListingField, ListingRecord, Snapshot};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub field: ListingField,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModifiedListing {
    pub previous: ListingRecord,
    pub current: ListingRecord,
    pub changes: Vec<FieldChange>,
}

impl ModifiedListing {
    pub fn identifier(&self) -> &str {
        &self.current.identifier
    }
}

/// Result of comparing the current snapshot with the one before it.
///
/// `added`, `modified` and `unchanged` follow current snapshot order;
/// `removed` follows previous snapshot order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ChangeSet {
    /// No previous snapshot existed; everything is reported as added.
    pub first_run: bool,
    pub added: Vec<ListingRecord>,
    pub removed: Vec<ListingRecord>,
    pub modified: Vec<ModifiedListing>,
    pub unchanged: Vec<ListingRecord>,
}

impl ChangeSet {
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty() || !self.modified.is_empty()
    }

    pub fn added_ids(&self) -> Vec<&str> {
        self.added.iter().map(|r| r.identifier.as_str()).collect()
    }

    pub fn removed_ids(&self) -> Vec<&str> {
        self.removed.iter().map(|r| r.identifier.as_str()).collect()
    }

    pub fn modified_ids(&self) -> Vec<&str> {
        self.modified.iter().map(ModifiedListing::identifier).collect()
    }

    pub fn unchanged_ids(&self) -> Vec<&str> {
        self.unchanged.iter().map(|r| r.identifier.as_str()).collect()
    }
}

pub fn diff(previous: Option<&Snapshot>, current: &Snapshot) -> ChangeSet {
    diff_records(previous.map(|s| s.records.as_slice()), &current.records)
}

pub fn diff_records(previous: Option<&[ListingRecord]>, current: &[ListingRecord]) -> ChangeSet {
    let Some(previous) = previous else {
        return ChangeSet {
            first_run: true,
            added: unique_by_identifier(current).cloned().collect(),
            ..ChangeSet::default()
        };
    };

    let previous_by_id = index_by_identifier(previous);
    let current_by_id = index_by_identifier(current);
    let mut changes = ChangeSet::default();

    for record in unique_by_identifier(current) {
        match previous_by_id.get(record.identifier.as_str()) {
            None => changes.added.push(record.clone()),
            Some(before) => {
                let field_changes = field_changes(before, record);
                if field_changes.is_empty() {
                    changes.unchanged.push(record.clone());
                } else {
                    changes.modified.push(ModifiedListing {
                        previous: (*before).clone(),
                        current: record.clone(),
                        changes: field_changes,
                    });
                }
            }
        }
    }

    changes.removed = unique_by_identifier(previous)
        .filter(|r| !current_by_id.contains_key(r.identifier.as_str()))
        .cloned()
        .collect();

    changes
}

/// Every non-identifier field whose text differs, in column order.
pub fn field_changes(before: &ListingRecord, after: &ListingRecord) -> Vec<FieldChange> {
    ListingField::ALL
        .iter()
        .filter(|field| before.field(**field) != after.field(**field))
        .map(|field| FieldChange {
            field: *field,
            before: before.field(*field).to_string(),
            after: after.field(*field).to_string(),
        })
        .collect()
}

// First occurrence wins when a hand-edited snapshot repeats an identifier.
fn index_by_identifier(records: &[ListingRecord]) -> HashMap<&str, &ListingRecord> {
    let mut index = HashMap::with_capacity(records.len());
    for record in records {
        index.entry(record.identifier.as_str()).or_insert(record);
    }
    index
}

fn unique_by_identifier(records: &[ListingRecord]) -> impl Iterator<Item = &ListingRecord> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(move |r| seen.insert(r.identifier.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use yhmon_core::{Category, SnapshotDate};

    fn rec(id: &str, title: &str) -> ListingRecord {
        ListingRecord {
            identifier: id.to_string(),
            title: title.to_string(),
            ..Default::default()
        }
    }

    fn snap(day: &str, records: Vec<ListingRecord>) -> Snapshot {
        Snapshot::new(Category::OnSite, day.parse::<SnapshotDate>().unwrap(), records)
    }

    #[test]
    fn classifies_added_removed_and_modified() {
        let previous = snap("20250601", vec![rec("1", "A"), rec("2", "B")]);
        let current = snap("20250602", vec![rec("2", "B2"), rec("3", "C")]);

        let changes = diff(Some(&previous), &current);
        assert!(!changes.first_run);
        assert_eq!(changes.added_ids(), vec!["3"]);
        assert_eq!(changes.removed_ids(), vec!["1"]);
        assert_eq!(changes.modified_ids(), vec!["2"]);
        assert!(changes.unchanged.is_empty());
        assert_eq!(
            changes.modified[0].changes,
            vec![FieldChange {
                field: ListingField::Title,
                before: "B".into(),
                after: "B2".into(),
            }]
        );
        assert_eq!(changes.modified[0].previous.title, "B");
        assert_eq!(changes.modified[0].current.title, "B2");
    }

    #[test]
    fn first_run_reports_everything_as_added() {
        let current = snap("20250601", vec![rec("a", "A"), rec("b", "B"), rec("c", "C")]);
        let changes = diff(None, &current);
        assert!(changes.first_run);
        assert_eq!(changes.added_ids(), vec!["a", "b", "c"]);
        assert!(changes.removed.is_empty());
        assert!(changes.modified.is_empty());
        assert!(changes.unchanged.is_empty());
    }

    #[test]
    fn empty_current_removes_everything_in_previous_order() {
        let previous = snap("20250601", vec![rec("z", "Z"), rec("a", "A")]);
        let current = snap("20250602", vec![]);
        let changes = diff(Some(&previous), &current);
        assert_eq!(changes.removed_ids(), vec!["z", "a"]);
        assert!(changes.added.is_empty());
        assert!(changes.has_changes());
    }

    #[test]
    fn identical_snapshots_are_all_unchanged() {
        let records = vec![rec("1", "A"), rec("2", "B")];
        let changes = diff_records(Some(&records), &records);
        assert!(!changes.has_changes());
        assert_eq!(changes.unchanged_ids(), vec!["1", "2"]);
    }

    #[test]
    fn groups_follow_current_order_and_removed_follows_previous() {
        let previous = vec![rec("r2", ""), rec("m", "old"), rec("u", "same"), rec("r1", "")];
        let current = vec![rec("n2", ""), rec("u", "same"), rec("n1", ""), rec("m", "new")];
        let changes = diff_records(Some(&previous), &current);
        assert_eq!(changes.added_ids(), vec!["n2", "n1"]);
        assert_eq!(changes.removed_ids(), vec!["r2", "r1"]);
        assert_eq!(changes.modified_ids(), vec!["m"]);
        assert_eq!(changes.unchanged_ids(), vec!["u"]);
    }

    #[test]
    fn reports_every_changed_field() {
        let before = ListingRecord {
            identifier: "x".into(),
            title: "T".into(),
            status: "".into(),
            url: "u1".into(),
            ..Default::default()
        };
        let after = ListingRecord {
            status: "Sen anmälan öppen".into(),
            url: "u2".into(),
            ..before.clone()
        };
        let fields: Vec<_> = field_changes(&before, &after).into_iter().map(|c| c.field).collect();
        assert_eq!(fields, vec![ListingField::Status, ListingField::Url]);
    }

    #[test]
    fn repeated_identifiers_count_once() {
        let previous = vec![rec("1", "A"), rec("1", "A again")];
        let current = vec![rec("2", "B"), rec("2", "B again")];
        let changes = diff_records(Some(&previous), &current);
        assert_eq!(changes.added_ids(), vec!["2"]);
        assert_eq!(changes.added[0].title, "B");
        assert_eq!(changes.removed_ids(), vec!["1"]);
    }
}
