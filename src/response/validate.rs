//! Change-set validation before anything touches the repository.

use std::collections::HashSet;

use crate::errors::ValidationError;

use super::types::ChangeSet;

/// Normalize a path for comparison: trim whitespace and leading `./` segments.
pub fn normalize_path(path: &str) -> &str {
    let mut p = path.trim();
    while let Some(rest) = p.strip_prefix("./") {
        p = rest.trim_start_matches('/');
    }
    p
}

fn is_unsafe(path: &str) -> bool {
    path.starts_with('/') || path.starts_with('\\') || path.split(['/', '\\']).any(|seg| seg == "..")
}

/// Reject degenerate change sets; return the set unchanged otherwise.
///
/// Paths are compared case-sensitively after [`normalize_path`].
pub fn validate(change_set: ChangeSet) -> Result<ChangeSet, ValidationError> {
    if change_set.is_empty() {
        return Err(ValidationError::Empty);
    }

    let mut seen = HashSet::new();
    for (index, change) in change_set.iter().enumerate() {
        let path = normalize_path(&change.path);
        if path.is_empty() {
            return Err(ValidationError::EmptyPath { index });
        }
        if is_unsafe(path) {
            return Err(ValidationError::UnsafePath {
                path: path.to_string(),
            });
        }
        if !seen.insert(path) {
            return Err(ValidationError::DuplicatePath {
                path: path.to_string(),
            });
        }
    }

    Ok(change_set)
}
