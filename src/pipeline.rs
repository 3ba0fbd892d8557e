//! Per-issue orchestration.
//!
//! [`Pipeline::process`] takes an authenticated, classified
//! [`WebhookEvent`] and drives it through
//!
//! ```text
//! Received → AuthOk → FilteredIn → DedupPassed → Generating → Parsed
//!          → Validated → Applying → PrCreated
//! ```
//!
//! ending in `Skipped` (ignored or duplicate) or `Failed` (generation, empty
//! or invalid change set, remote failure). Every failure after dedup is
//! reported on the issue and recorded with the idempotency tracker, so an
//! issue gets at most one branch and one pull request per process lifetime.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::errors::{ApplyError, BranchCleanup, PipelineError, PipelineFault};
use crate::generator::CodeGenerator;
use crate::idempotency::{IdempotencyTracker, Outcome};
use crate::models::{IssueContext, IssueRef, PullRequest, RepositoryContext};
use crate::response::{ChangeSet, FileChange, ParsedResponse, ResponseParser, validate};
use crate::webhook::{IssueEvent, WebhookEvent};

// ── Collaborators ─────────────────────────────────────────────────────

/// A pull request about to be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestDraft {
    pub title: String,
    pub body: String,
    /// Branch holding the changes.
    pub head: String,
    /// Branch the changes merge into.
    pub base: String,
}

/// Remote repository operations. Every failure is an [`ApplyError`].
#[async_trait]
pub trait RepositoryClient: Send + Sync {
    async fn default_branch(&self, repository: &str) -> Result<String, ApplyError>;

    /// Create `branch` pointing at the head of `base`.
    async fn create_branch(
        &self,
        repository: &str,
        branch: &str,
        base: &str,
    ) -> Result<(), ApplyError>;

    /// Commit one file (create or overwrite) on `branch`.
    async fn apply_file(
        &self,
        repository: &str,
        branch: &str,
        change: &FileChange,
        message: &str,
    ) -> Result<(), ApplyError>;

    async fn create_pull_request(
        &self,
        repository: &str,
        draft: &PullRequestDraft,
    ) -> Result<PullRequest, ApplyError>;

    /// Post a comment on the issue.
    async fn annotate_issue(&self, issue: &IssueRef, body: &str) -> Result<(), ApplyError>;

    async fn add_labels(&self, issue: &IssueRef, labels: &[String]) -> Result<(), ApplyError>;

    async fn delete_branch(&self, repository: &str, branch: &str) -> Result<(), ApplyError>;
}

/// Best-effort repository context for the code generator. Never fails;
/// sections that cannot be fetched are left empty.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn repository_context(&self, event: &IssueEvent) -> RepositoryContext;
}

/// Provides no context at all.
pub struct NoContext;

#[async_trait]
impl ContextProvider for NoContext {
    async fn repository_context(&self, _event: &IssueEvent) -> RepositoryContext {
        RepositoryContext::default()
    }
}

// ── States and outcomes ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Received,
    AuthOk,
    FilteredIn,
    DedupPassed,
    Generating,
    Parsed,
    Validated,
    Applying,
    PrCreated,
    Skipped,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::AuthOk => "AUTH_OK",
            Self::FilteredIn => "FILTERED_IN",
            Self::DedupPassed => "DEDUP_PASSED",
            Self::Generating => "GENERATING",
            Self::Parsed => "PARSED",
            Self::Validated => "VALIDATED",
            Self::Applying => "APPLYING",
            Self::PrCreated => "PR_CREATED",
            Self::Skipped => "SKIPPED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PrCreated | Self::Skipped | Self::Failed)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with a branch when applying a change set fails midway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialApplyPolicy {
    /// Leave the branch and its commits for a human to inspect.
    #[default]
    KeepBranch,
    /// Delete the branch (best effort).
    DeleteBranch,
}

/// Result of processing one event. Serialized as the webhook response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub issue: Option<IssueRef>,
    pub state: PipelineState,
    pub trail: Vec<PipelineState>,
    pub pull_request: Option<PullRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl PipelineOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == PipelineState::PrCreated
    }
}

/// Ordered record of the states one event passed through.
struct Trail {
    issue: Option<IssueRef>,
    states: Vec<PipelineState>,
}

impl Trail {
    fn new() -> Self {
        Self {
            issue: None,
            states: vec![PipelineState::Received, PipelineState::AuthOk],
        }
    }

    fn push(&mut self, state: PipelineState) {
        match &self.issue {
            Some(issue) => tracing::info!(issue = %issue, state = %state, "pipeline transition"),
            None => tracing::debug!(state = %state, "pipeline transition"),
        }
        self.states.push(state);
    }

    fn finish(mut self, state: PipelineState) -> PipelineOutcome {
        self.push(state);
        PipelineOutcome {
            issue: self.issue,
            state,
            trail: self.states,
            pull_request: None,
            error_kind: None,
            error: None,
            skip_reason: None,
        }
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────

pub struct Pipeline {
    generator: Arc<dyn CodeGenerator>,
    repository: Arc<dyn RepositoryClient>,
    context: Arc<dyn ContextProvider>,
    tracker: IdempotencyTracker,
    parser: ResponseParser,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        generator: Arc<dyn CodeGenerator>,
        repository: Arc<dyn RepositoryClient>,
        tracker: IdempotencyTracker,
        config: PipelineConfig,
    ) -> Self {
        Self {
            generator,
            repository,
            context: Arc::new(NoContext),
            tracker,
            parser: ResponseParser::new(),
            config,
        }
    }

    pub fn with_context_provider(mut self, context: Arc<dyn ContextProvider>) -> Self {
        self.context = context;
        self
    }

    pub fn with_parser(mut self, parser: ResponseParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn tracker(&self) -> &IdempotencyTracker {
        &self.tracker
    }

    pub fn branch_name(&self, issue: &IssueRef) -> String {
        format!("{}{}", self.config.branch_prefix, issue.number)
    }

    /// Process one authenticated event to a terminal state.
    ///
    /// Pipeline failures are part of the outcome; only idempotency store
    /// faults are returned as errors.
    pub async fn process(&self, event: WebhookEvent) -> Result<PipelineOutcome, PipelineFault> {
        let mut trail = Trail::new();

        let event = match event {
            WebhookEvent::Ignored { reason } => {
                tracing::debug!(reason = reason.as_str(), "event ignored");
                let mut outcome = trail.finish(PipelineState::Skipped);
                outcome.skip_reason = Some(reason.as_str().to_string());
                return Ok(outcome);
            }
            other => match other.into_issue_event() {
                Some(e) => e,
                None => return Ok(trail.finish(PipelineState::Skipped)),
            },
        };
        trail.issue = Some(event.issue.clone());
        trail.push(PipelineState::FilteredIn);

        if event.urgent {
            tracing::info!(issue = %event.issue, "processing urgent issue");
        }

        if !self.tracker.try_begin(&event.issue).await? {
            let mut outcome = trail.finish(PipelineState::Skipped);
            outcome.skip_reason = Some("duplicate".to_string());
            return Ok(outcome);
        }
        trail.push(PipelineState::DedupPassed);

        match self.run(&event, &mut trail).await {
            Ok(pull_request) => {
                self.report_success(&event, &pull_request).await;
                self.tracker.complete(&event.issue, Outcome::Succeeded).await?;
                let mut outcome = trail.finish(PipelineState::PrCreated);
                outcome.pull_request = Some(pull_request);
                Ok(outcome)
            }
            Err(err) => {
                tracing::warn!(
                    issue = %event.issue,
                    kind = err.kind(),
                    error = %err,
                    "pipeline failed"
                );
                self.report_failure(&event, &err).await;
                self.tracker.complete(&event.issue, Outcome::Failed).await?;
                let mut outcome = trail.finish(PipelineState::Failed);
                outcome.error_kind = Some(err.kind().to_string());
                outcome.error = Some(err.to_string());
                Ok(outcome)
            }
        }
    }

    /// Generate, parse and validate without touching the tracker or the
    /// repository.
    pub async fn preview(&self, event: &IssueEvent) -> Result<ParsedResponse, PipelineError> {
        let context = self.issue_context(event).await;
        let raw = self.generator.generate(&context).await?;
        self.parse_and_validate(&raw)
    }

    async fn run(&self, event: &IssueEvent, trail: &mut Trail) -> Result<PullRequest, PipelineError> {
        trail.push(PipelineState::Generating);
        let context = self.issue_context(event).await;
        let raw = self.generator.generate(&context).await?;

        let parsed = self.parser.parse(&raw);
        if parsed.changes.is_empty() {
            return Err(PipelineError::Parse {
                skipped_fragments: parsed.warnings.len(),
            });
        }
        trail.push(PipelineState::Parsed);

        let changes = validate(parsed.changes.clone())?;
        trail.push(PipelineState::Validated);

        trail.push(PipelineState::Applying);
        self.apply(event, &parsed, &changes).await
    }

    fn parse_and_validate(&self, raw: &str) -> Result<ParsedResponse, PipelineError> {
        let mut parsed = self.parser.parse(raw);
        if parsed.changes.is_empty() {
            return Err(PipelineError::Parse {
                skipped_fragments: parsed.warnings.len(),
            });
        }
        parsed.changes = validate(parsed.changes)?;
        Ok(parsed)
    }

    async fn issue_context(&self, event: &IssueEvent) -> IssueContext {
        let repository = self.context.repository_context(event).await;
        IssueContext {
            issue: event.issue.clone(),
            title: event.title.clone(),
            body: event.body.clone(),
            labels: event.labels.clone(),
            repository: (!repository.is_empty()).then_some(repository),
        }
    }

    async fn apply(
        &self,
        event: &IssueEvent,
        parsed: &ParsedResponse,
        changes: &ChangeSet,
    ) -> Result<PullRequest, PipelineError> {
        let repo = event.issue.repository.as_str();
        let mut applied: Vec<String> = Vec::new();
        let fail = |source: ApplyError, applied: &[String], branch: BranchCleanup| {
            PipelineError::Apply {
                source,
                applied: applied.to_vec(),
                branch,
            }
        };

        let base = match &self.config.base_branch {
            Some(base) => base.clone(),
            None => self
                .repository
                .default_branch(repo)
                .await
                .map_err(|e| fail(e, &applied, BranchCleanup::NotCreated))?,
        };
        let branch = self.branch_name(&event.issue);

        self.repository
            .create_branch(repo, &branch, &base)
            .await
            .map_err(|e| fail(e, &applied, BranchCleanup::NotCreated))?;
        tracing::info!(issue = %event.issue, branch = %branch, base = %base, "branch created");

        for change in changes {
            let message = format!("{} (#{})", change.explanation, event.issue.number);
            if let Err(e) = self
                .repository
                .apply_file(repo, &branch, change, &message)
                .await
            {
                let cleanup = self.handle_partial_apply(event, &branch).await;
                return Err(fail(e, &applied, cleanup));
            }
            tracing::debug!(issue = %event.issue, path = %change.path, "file committed");
            applied.push(change.path.clone());
        }

        let draft = PullRequestDraft {
            title: format!("Fix #{}: {}", event.issue.number, event.title),
            body: pull_request_body(event, parsed, changes),
            head: branch.clone(),
            base,
        };
        match self.repository.create_pull_request(repo, &draft).await {
            Ok(pr) => Ok(pr),
            Err(e) => {
                let cleanup = self.handle_partial_apply(event, &branch).await;
                Err(fail(e, &applied, cleanup))
            }
        }
    }

    async fn handle_partial_apply(&self, event: &IssueEvent, branch: &str) -> BranchCleanup {
        match self.config.partial_apply {
            PartialApplyPolicy::KeepBranch => {
                tracing::info!(issue = %event.issue, branch = %branch, "keeping partially applied branch");
                BranchCleanup::Kept
            }
            PartialApplyPolicy::DeleteBranch => {
                match self
                    .repository
                    .delete_branch(&event.issue.repository, branch)
                    .await
                {
                    Ok(()) => {
                        tracing::info!(issue = %event.issue, branch = %branch, "deleted partially applied branch");
                        BranchCleanup::Deleted
                    }
                    Err(e) => {
                        tracing::warn!(issue = %event.issue, branch = %branch, error = %e, "failed to delete branch");
                        BranchCleanup::DeleteFailed
                    }
                }
            }
        }
    }

    async fn report_success(&self, event: &IssueEvent, pr: &PullRequest) {
        let body = format!(
            "I've opened a pull request to address this issue: {}",
            pr.url
        );
        if let Err(e) = self.repository.annotate_issue(&event.issue, &body).await {
            tracing::warn!(issue = %event.issue, error = %e, "failed to annotate issue");
        }
        self.add_label(event, self.config.success_label.as_deref()).await;
    }

    async fn report_failure(&self, event: &IssueEvent, err: &PipelineError) {
        let body = failure_comment(err, &self.branch_name(&event.issue));
        if let Err(e) = self.repository.annotate_issue(&event.issue, &body).await {
            tracing::warn!(issue = %event.issue, error = %e, "failed to report failure on issue");
        }
        self.add_label(event, self.config.failure_label.as_deref()).await;
    }

    async fn add_label(&self, event: &IssueEvent, label: Option<&str>) {
        let Some(label) = label else { return };
        if let Err(e) = self
            .repository
            .add_labels(&event.issue, &[label.to_string()])
            .await
        {
            tracing::warn!(issue = %event.issue, label, error = %e, "failed to add label");
        }
    }
}

// ── Rendering ─────────────────────────────────────────────────────────

/// Pull request description: explanation, per-file rationale,
/// considerations and the closing keyword.
pub fn pull_request_body(event: &IssueEvent, parsed: &ParsedResponse, changes: &ChangeSet) -> String {
    let mut body = String::new();
    match parsed.explanation.as_deref() {
        Some(explanation) => body.push_str(explanation),
        None => {
            let _ = write!(
                body,
                "This pull request was generated automatically to resolve #{}.",
                event.issue.number
            );
        }
    }
    body.push_str("\n\n### Changes\n");
    for change in changes {
        let _ = writeln!(body, "- `{}`: {}", change.path, change.explanation);
    }
    if let Some(considerations) = parsed.considerations.as_deref() {
        let _ = write!(body, "\n### Considerations\n{}\n", considerations);
    }
    let _ = write!(body, "\nCloses #{}\n", event.issue.number);
    body
}

/// Issue comment describing why no pull request was created.
pub fn failure_comment(err: &PipelineError, branch: &str) -> String {
    let mut body = format!(
        "I couldn't create a pull request for this issue.\n\n**{}**: {}\n",
        err.kind(),
        err
    );
    let PipelineError::Apply {
        applied,
        branch: cleanup,
        ..
    } = err
    else {
        return body;
    };
    if !applied.is_empty() {
        let _ = write!(body, "\nFiles already committed to `{}`:\n", branch);
        for path in applied {
            let _ = writeln!(body, "- `{}`", path);
        }
    }
    match cleanup {
        BranchCleanup::Deleted => {
            let _ = write!(body, "\nThe branch `{}` has been deleted.\n", branch);
        }
        BranchCleanup::DeleteFailed => {
            let _ = write!(
                body,
                "\nThe branch `{}` could not be deleted and still exists.\n",
                branch
            );
        }
        BranchCleanup::Kept | BranchCleanup::NotCreated => {}
    }
    body
}
