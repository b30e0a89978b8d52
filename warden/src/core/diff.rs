//! Line-level diff between current file content and a prospective write.

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

/// Kind of a single line change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Remove,
    Context,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineChange {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub line: String,
}

/// Ordered change records describing `old -> new`. Computed on demand, never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub changes: Vec<LineChange>,
}

impl DiffResult {
    pub fn additions(&self) -> usize {
        self.count(ChangeKind::Add)
    }

    pub fn removals(&self) -> usize {
        self.count(ChangeKind::Remove)
    }

    fn count(&self, kind: ChangeKind) -> usize {
        self.changes
            .iter()
            .filter(|change| change.kind == kind)
            .count()
    }
}

pub fn diff_lines(old: &str, new: &str) -> DiffResult {
    let diff = TextDiff::from_lines(old, new);
    let changes = diff
        .iter_all_changes()
        .map(|change| {
            let kind = match change.tag() {
                ChangeTag::Equal => ChangeKind::Context,
                ChangeTag::Insert => ChangeKind::Add,
                ChangeTag::Delete => ChangeKind::Remove,
            };
            let line = change.value();
            LineChange {
                kind,
                line: line.strip_suffix('\n').unwrap_or(line).to_string(),
            }
        })
        .collect();
    DiffResult { changes }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(diff: &DiffResult) -> Vec<ChangeKind> {
        diff.changes.iter().map(|change| change.kind).collect()
    }

    #[test]
    fn new_file_is_all_additions() {
        let diff = diff_lines("", "a\nb\n");
        assert_eq!(kinds(&diff), vec![ChangeKind::Add, ChangeKind::Add]);
        assert_eq!(diff.additions(), 2);
        assert_eq!(diff.removals(), 0);
    }

    #[test]
    fn changed_line_is_remove_then_add() {
        let diff = diff_lines("keep\nold\ntail\n", "keep\nnew\ntail\n");
        assert_eq!(
            kinds(&diff),
            vec![
                ChangeKind::Context,
                ChangeKind::Remove,
                ChangeKind::Add,
                ChangeKind::Context,
            ]
        );
        assert_eq!(diff.changes[1].line, "old");
        assert_eq!(diff.changes[2].line, "new");
    }

    #[test]
    fn identical_content_has_only_context() {
        let diff = diff_lines("same\n", "same\n");
        assert_eq!(diff.additions(), 0);
        assert_eq!(diff.removals(), 0);
    }

    #[test]
    fn serializes_with_type_tag() {
        let diff = diff_lines("", "x");
        let json = serde_json::to_value(&diff).expect("serialize");
        assert_eq!(json["changes"][0]["type"], "add");
        assert_eq!(json["changes"][0]["line"], "x");
    }
}
