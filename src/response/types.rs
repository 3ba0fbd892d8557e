//! Change-set types produced from a model response.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Placeholder used when the model gives no rationale for a file.
pub const DEFAULT_EXPLANATION: &str = "No explanation provided.";

/// A single file's target path, full new content and rationale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub content: String,
    pub explanation: String,
}

impl FileChange {
    /// Create a change, falling back to [`DEFAULT_EXPLANATION`] when the
    /// explanation is missing or blank.
    pub fn new(
        path: impl Into<String>,
        content: impl Into<String>,
        explanation: Option<String>,
    ) -> Self {
        let explanation = explanation
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| DEFAULT_EXPLANATION.to_string());
        Self {
            path: path.into(),
            content: content.into(),
            explanation,
        }
    }
}

/// Ordered set of file changes with unique paths.
///
/// Inserting a path that is already present overwrites the earlier entry in
/// place, so the last declaration wins while the first declaration's
/// position is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet {
    changes: Vec<FileChange>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap changes as-is, without deduplicating paths.
    ///
    /// Sets built this way may violate the unique-path invariant; run them
    /// through [`crate::response::validate`] before use.
    pub fn from_changes(changes: Vec<FileChange>) -> Self {
        Self { changes }
    }

    /// Insert or overwrite by path. Returns `true` when an existing entry was replaced.
    pub fn upsert(&mut self, change: FileChange) -> bool {
        match self.changes.iter_mut().find(|c| c.path == change.path) {
            Some(existing) => {
                *existing = change;
                true
            }
            None => {
                self.changes.push(change);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileChange> {
        self.changes.iter()
    }

    pub fn get(&self, path: &str) -> Option<&FileChange> {
        self.changes.iter().find(|c| c.path == path)
    }

    pub fn paths(&self) -> Vec<&str> {
        self.changes.iter().map(|c| c.path.as_str()).collect()
    }

    pub fn as_slice(&self) -> &[FileChange] {
        &self.changes
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a FileChange;
    type IntoIter = std::slice::Iter<'a, FileChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

impl IntoIterator for ChangeSet {
    type Item = FileChange;
    type IntoIter = std::vec::IntoIter<FileChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

/// Output format of the code generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// `# file:` / `# explanation:` marker lines, usually inside fenced blocks.
    Marker,
    /// `## Files` / `## Changes` / `## Explanation` / `## Considerations` sections
    /// with bold filenames above fenced blocks.
    Section,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Marker => "marker",
            Self::Section => "section",
        }
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "marker" => Ok(Self::Marker),
            "section" => Ok(Self::Section),
            _ => Err(format!("Invalid dialect '{}'. Valid values: marker, section", s)),
        }
    }
}

/// Everything extracted from one model response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedResponse {
    pub dialect: Dialect,
    pub changes: ChangeSet,
    /// Paths listed under `## Files` (section dialect only).
    #[serde(default)]
    pub listed_files: Vec<String>,
    /// Prose from `## Explanation` (section dialect only).
    #[serde(default)]
    pub explanation: Option<String>,
    /// Prose from `## Considerations` (section dialect only).
    #[serde(default)]
    pub considerations: Option<String>,
    /// Malformed fragments that were skipped.
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ParsedResponse {
    pub fn empty(dialect: Dialect) -> Self {
        Self {
            dialect,
            changes: ChangeSet::new(),
            listed_files: Vec::new(),
            explanation: None,
            considerations: None,
            warnings: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_change_defaults_explanation() {
        let change = FileChange::new("a.py", "x=1", None);
        assert_eq!(change.explanation, DEFAULT_EXPLANATION);

        let change = FileChange::new("a.py", "x=1", Some("   ".into()));
        assert_eq!(change.explanation, DEFAULT_EXPLANATION);

        let change = FileChange::new("a.py", "x=1", Some(" add x ".into()));
        assert_eq!(change.explanation, "add x");
    }

    #[test]
    fn test_upsert_overwrites_in_place() {
        let mut set = ChangeSet::new();
        assert!(!set.upsert(FileChange::new("a.py", "one", None)));
        assert!(!set.upsert(FileChange::new("b.py", "two", None)));
        assert!(set.upsert(FileChange::new("a.py", "three", Some("redo".into()))));

        assert_eq!(set.len(), 2);
        assert_eq!(set.paths(), vec!["a.py", "b.py"]);
        assert_eq!(set.get("a.py").unwrap().content, "three");
        assert_eq!(set.get("a.py").unwrap().explanation, "redo");
    }

    #[test]
    fn test_from_changes_keeps_duplicates() {
        let set = ChangeSet::from_changes(vec![
            FileChange::new("a.py", "1", None),
            FileChange::new("a.py", "2", None),
        ]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_change_set_serializes_as_array() {
        let mut set = ChangeSet::new();
        set.upsert(FileChange::new("a.py", "x=1", Some("add x".into())));
        let json = serde_json::to_value(&set).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["path"], "a.py");
        assert_eq!(json[0]["explanation"], "add x");
    }

    #[test]
    fn test_dialect_from_str() {
        assert_eq!("marker".parse::<Dialect>().unwrap(), Dialect::Marker);
        assert_eq!("SECTION".parse::<Dialect>().unwrap(), Dialect::Section);
        assert!("yaml".parse::<Dialect>().is_err());
    }
}
