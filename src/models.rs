use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Stable identity of a tracked issue: repository plus issue number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IssueRef {
    /// `owner/repo`
    pub repository: String,
    pub number: u64,
}

impl IssueRef {
    pub fn new(repository: impl Into<String>, number: u64) -> Self {
        Self {
            repository: repository.into(),
            number,
        }
    }
}

impl fmt::Display for IssueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repository, self.number)
    }
}

impl FromStr for IssueRef {
    type Err = String;

    /// Parses `owner/repo#N`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (repository, number) = s
            .rsplit_once('#')
            .ok_or_else(|| format!("Invalid issue reference '{}': expected owner/repo#N", s))?;
        if !is_owner_repo(repository) {
            return Err(format!("Invalid repository '{}': expected owner/repo", repository));
        }
        let number = number
            .parse::<u64>()
            .map_err(|_| format!("Invalid issue number '{}'", number))?;
        Ok(Self::new(repository, number))
    }
}

/// Whether `s` looks like an `owner/repo` slug (exactly two non-empty segments).
pub fn is_owner_repo(s: &str) -> bool {
    let parts: Vec<&str> = s.split('/').collect();
    parts.len() == 2 && parts.iter().all(|p| !p.is_empty() && !p.contains(char::is_whitespace))
}

/// A pull request opened by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
    pub branch: String,
}

/// An issue that shares a label with the one being processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedIssue {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub url: String,
}

/// A (possibly truncated) file pulled from the repository as context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileExcerpt {
    pub path: String,
    pub content: String,
    pub truncated: bool,
}

/// Repository-level context handed to the code generator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryContext {
    pub description: Option<String>,
    pub default_branch: Option<String>,
    pub topics: Vec<String>,
    pub related_issues: Vec<RelatedIssue>,
    pub file_excerpts: Vec<FileExcerpt>,
    pub documentation: Vec<FileExcerpt>,
}

impl RepositoryContext {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.default_branch.is_none()
            && self.topics.is_empty()
            && self.related_issues.is_empty()
            && self.file_excerpts.is_empty()
            && self.documentation.is_empty()
    }
}

/// Everything the code generator sees about an issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueContext {
    pub issue: IssueRef,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    #[serde(default)]
    pub repository: Option<RepositoryContext>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_context_with_only_default_branch_is_not_empty() {
        assert!(RepositoryContext::default().is_empty());
        let context = RepositoryContext {
            default_branch: Some("main".into()),
            ..RepositoryContext::default()
        };
        assert!(!context.is_empty());
    }

    #[test]
    fn test_issue_ref_display() {
        let issue = IssueRef::new("owner/repo", 28);
        assert_eq!(issue.to_string(), "owner/repo#28");
    }

    #[test]
    fn test_issue_ref_from_str() {
        let issue: IssueRef = "owner/repo#28".parse().unwrap();
        assert_eq!(issue, IssueRef::new("owner/repo", 28));
    }

    #[test]
    fn test_issue_ref_from_str_rejects_bad_input() {
        assert!("owner/repo".parse::<IssueRef>().is_err());
        assert!("owner#1".parse::<IssueRef>().is_err());
        assert!("owner/repo#abc".parse::<IssueRef>().is_err());
    }

    #[test]
    fn test_is_owner_repo() {
        assert!(is_owner_repo("owner/repo"));
        assert!(!is_owner_repo("owner"));
        assert!(!is_owner_repo("owner/repo/extra"));
        assert!(!is_owner_repo("/repo"));
        assert!(!is_owner_repo("owner/re po"));
    }

    #[test]
    fn test_issue_refs_hash_by_repository_and_number() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(IssueRef::new("a/b", 1));
        set.insert(IssueRef::new("a/b", 1));
        set.insert(IssueRef::new("a/c", 1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_repository_context_is_empty() {
        let mut ctx = RepositoryContext::default();
        assert!(ctx.is_empty());
        ctx.topics.push("rust".into());
        assert!(!ctx.is_empty());
    }
}
