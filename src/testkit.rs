//! In-memory collaborators for exercising the pipeline without a network.
//!
//! [`ScriptedGenerator`] returns canned model output and remembers every
//! context it was asked about; [`RecordingRepository`] records every remote
//! operation and can be told to fail at a given point.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::errors::{ApplyError, GenerationError};
use crate::generator::CodeGenerator;
use crate::models::{IssueContext, IssueRef, PullRequest, RepositoryContext};
use crate::pipeline::{ContextProvider, PullRequestDraft, RepositoryClient};
use crate::response::FileChange;
use crate::webhook::IssueEvent;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Generator ─────────────────────────────────────────────────────────

enum Script {
    Always(String),
    FailAlways(String),
    Sequence(VecDeque<Result<String, GenerationError>>),
}

pub struct ScriptedGenerator {
    script: Mutex<Script>,
    calls: AtomicUsize,
    contexts: Mutex<Vec<IssueContext>>,
}

impl ScriptedGenerator {
    fn with_script(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// Return `response` on every call.
    pub fn always(response: impl Into<String>) -> Self {
        Self::with_script(Script::Always(response.into()))
    }

    /// Fail every call with a request error.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_script(Script::FailAlways(message.into()))
    }

    /// Return the scripted results in order; once exhausted, calls fail.
    pub fn sequence(results: Vec<Result<String, GenerationError>>) -> Self {
        Self::with_script(Script::Sequence(results.into()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn contexts(&self) -> Vec<IssueContext> {
        lock(&self.contexts).clone()
    }
}

#[async_trait]
impl CodeGenerator for ScriptedGenerator {
    async fn generate(&self, context: &IssueContext) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.contexts).push(context.clone());
        match &mut *lock(&self.script) {
            Script::Always(response) => Ok(response.clone()),
            Script::FailAlways(message) => Err(GenerationError::Request(message.clone())),
            Script::Sequence(queue) => queue.pop_front().unwrap_or_else(|| {
                Err(GenerationError::Request("script exhausted".to_string()))
            }),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ── Context ───────────────────────────────────────────────────────────

/// Returns the same repository context for every issue.
pub struct StaticContext {
    context: RepositoryContext,
}

impl StaticContext {
    pub fn new(context: RepositoryContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ContextProvider for StaticContext {
    async fn repository_context(&self, _event: &IssueEvent) -> RepositoryContext {
        self.context.clone()
    }
}

// ── Repository ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoCall {
    DefaultBranch {
        repository: String,
    },
    CreateBranch {
        repository: String,
        branch: String,
        base: String,
    },
    ApplyFile {
        repository: String,
        branch: String,
        path: String,
        message: String,
    },
    CreatePullRequest {
        repository: String,
        draft: PullRequestDraft,
    },
    AnnotateIssue {
        issue: IssueRef,
        body: String,
    },
    AddLabels {
        issue: IssueRef,
        labels: Vec<String>,
    },
    DeleteBranch {
        repository: String,
        branch: String,
    },
}

/// Where [`RecordingRepository`] should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    DefaultBranch,
    CreateBranch,
    /// Fail the `nth` file commit (0-based).
    ApplyFile { nth: usize },
    CreatePullRequest,
    AnnotateIssue,
    DeleteBranch,
}

pub struct RecordingRepository {
    calls: Mutex<Vec<RepoCall>>,
    default_branch: String,
    fail_at: Vec<FailPoint>,
    files_attempted: AtomicUsize,
    next_pr: AtomicU64,
}

impl Default for RecordingRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingRepository {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            default_branch: "main".to_string(),
            fail_at: Vec::new(),
            files_attempted: AtomicUsize::new(0),
            next_pr: AtomicU64::new(100),
        }
    }

    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }

    /// Fail at `point`; may be called more than once.
    pub fn fail_at(mut self, point: FailPoint) -> Self {
        self.fail_at.push(point);
        self
    }

    fn record(&self, call: RepoCall) {
        lock(&self.calls).push(call);
    }

    fn check(&self, point: FailPoint, operation: &str) -> Result<(), ApplyError> {
        if self.fail_at.contains(&point) {
            Err(ApplyError::new(operation, "injected failure"))
        } else {
            Ok(())
        }
    }

    pub fn calls(&self) -> Vec<RepoCall> {
        lock(&self.calls).clone()
    }

    pub fn branches_created(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RepoCall::CreateBranch { branch, .. } => Some(branch),
                _ => None,
            })
            .collect()
    }

    /// Paths committed successfully, in order.
    pub fn files_applied(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RepoCall::ApplyFile { path, .. } => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn commit_messages(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RepoCall::ApplyFile { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn pull_requests(&self) -> Vec<PullRequestDraft> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RepoCall::CreatePullRequest { draft, .. } => Some(draft),
                _ => None,
            })
            .collect()
    }

    pub fn annotations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RepoCall::AnnotateIssue { body, .. } => Some(body),
                _ => None,
            })
            .collect()
    }

    pub fn labels_added(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RepoCall::AddLabels { labels, .. } => Some(labels),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl RepositoryClient for RecordingRepository {
    async fn default_branch(&self, repository: &str) -> Result<String, ApplyError> {
        self.check(FailPoint::DefaultBranch, "get default branch")?;
        self.record(RepoCall::DefaultBranch {
            repository: repository.to_string(),
        });
        Ok(self.default_branch.clone())
    }

    async fn create_branch(
        &self,
        repository: &str,
        branch: &str,
        base: &str,
    ) -> Result<(), ApplyError> {
        self.check(FailPoint::CreateBranch, "create branch")?;
        self.record(RepoCall::CreateBranch {
            repository: repository.to_string(),
            branch: branch.to_string(),
            base: base.to_string(),
        });
        Ok(())
    }

    async fn apply_file(
        &self,
        repository: &str,
        branch: &str,
        change: &FileChange,
        message: &str,
    ) -> Result<(), ApplyError> {
        let nth = self.files_attempted.fetch_add(1, Ordering::SeqCst);
        self.check(FailPoint::ApplyFile { nth }, "commit file")?;
        self.record(RepoCall::ApplyFile {
            repository: repository.to_string(),
            branch: branch.to_string(),
            path: change.path.clone(),
            message: message.to_string(),
        });
        Ok(())
    }

    async fn create_pull_request(
        &self,
        repository: &str,
        draft: &PullRequestDraft,
    ) -> Result<PullRequest, ApplyError> {
        self.check(FailPoint::CreatePullRequest, "create pull request")?;
        self.record(RepoCall::CreatePullRequest {
            repository: repository.to_string(),
            draft: draft.clone(),
        });
        let number = self.next_pr.fetch_add(1, Ordering::SeqCst);
        Ok(PullRequest {
            number,
            url: format!("https://github.com/{}/pull/{}", repository, number),
            branch: draft.head.clone(),
        })
    }

    async fn annotate_issue(&self, issue: &IssueRef, body: &str) -> Result<(), ApplyError> {
        self.check(FailPoint::AnnotateIssue, "comment on issue")?;
        self.record(RepoCall::AnnotateIssue {
            issue: issue.clone(),
            body: body.to_string(),
        });
        Ok(())
    }

    async fn add_labels(&self, issue: &IssueRef, labels: &[String]) -> Result<(), ApplyError> {
        self.record(RepoCall::AddLabels {
            issue: issue.clone(),
            labels: labels.to_vec(),
        });
        Ok(())
    }

    async fn delete_branch(&self, repository: &str, branch: &str) -> Result<(), ApplyError> {
        self.check(FailPoint::DeleteBranch, "delete branch")?;
        self.record(RepoCall::DeleteBranch {
            repository: repository.to_string(),
            branch: branch.to_string(),
        });
        Ok(())
    }
}
