//! GitHub REST adapter.
//!
//! Implements [`RepositoryClient`] (branches, commits through the git data
//! API, pull requests, issue comments and labels) and [`ContextProvider`]
//! (repository metadata, related issues, referenced files and docs).

use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::config::{Config, ContextConfig};
use crate::errors::ApplyError;
use crate::models::{FileExcerpt, IssueRef, PullRequest, RelatedIssue, RepositoryContext};
use crate::pipeline::{ContextProvider, PullRequestDraft, RepositoryClient};
use crate::response::FileChange;
use crate::webhook::{IssueEvent, IssuePayload, URGENT_LABEL};

const API_VERSION: &str = "2022-11-28";
const RAW_ACCEPT: &str = "application/vnd.github.raw+json";
const DOC_FILES: &[&str] = &["README.md", "CONTRIBUTING.md"];

/// Inline code spans that look like paths (`src/lib.rs`, `Cargo.toml`).
static CODE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([A-Za-z0-9_.\-/]+\.[A-Za-z0-9]+)`").unwrap());

// ── API payloads (subset of fields) ───────────────────────────────────

#[derive(Debug, Deserialize)]
struct RepoInfo {
    default_branch: String,
    description: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Debug, Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitCommit {
    tree: GitObject,
}

#[derive(Debug, Deserialize)]
struct Created {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    number: u64,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct IssueSummary {
    number: u64,
    title: String,
    state: String,
    html_url: String,
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

// ── Client ────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    limits: ContextConfig,
}

impl GitHubClient {
    pub fn new(token: &str, api_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("issue2pr"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .context("GitHub token contains invalid header characters")?,
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("Failed to build GitHub HTTP client")?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            limits: ContextConfig::default(),
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let token = config
            .github
            .token
            .as_deref()
            .context("GITHUB_TOKEN is not set")?;
        Ok(Self::new(
            token,
            &config.github.api_url,
            Duration::from_secs(config.github.timeout_secs),
        )?
        .with_context_limits(config.context.clone()))
    }

    pub fn with_context_limits(mut self, limits: ContextConfig) -> Self {
        self.limits = limits;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    async fn send(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<reqwest::Response, ApplyError> {
        let resp = request
            .send()
            .await
            .map_err(|e| ApplyError::new(operation, e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or(text);
        Err(ApplyError::new(operation, format!("{}: {}", status, message)))
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<T, ApplyError> {
        self.send(operation, request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ApplyError::new(operation, format!("invalid response: {}", e)))
    }

    async fn repo_info(&self, repository: &str) -> Result<RepoInfo, ApplyError> {
        self.request_json(
            "get repository",
            self.http.get(self.url(&format!("/repos/{}", repository))),
        )
        .await
    }

    async fn branch_head(&self, repository: &str, branch: &str) -> Result<String, ApplyError> {
        let git_ref: GitRef = self
            .request_json(
                "get branch ref",
                self.http
                    .get(self.url(&format!("/repos/{}/git/ref/heads/{}", repository, branch))),
            )
            .await?;
        Ok(git_ref.object.sha)
    }

    /// Fetch a file's raw content from the default branch. `None` when absent.
    async fn file_content(&self, repository: &str, path: &str) -> Result<Option<String>, ApplyError> {
        let resp = self
            .http
            .get(self.url(&format!("/repos/{}/contents/{}", repository, path)))
            .header(ACCEPT, RAW_ACCEPT)
            .send()
            .await
            .map_err(|e| ApplyError::new("get file", e.to_string()))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(ApplyError::new("get file", resp.status().to_string()));
        }
        resp.text()
            .await
            .map(Some)
            .map_err(|e| ApplyError::new("get file", e.to_string()))
    }

    /// Fetch an issue as an actionable event (used by the CLI).
    pub async fn get_issue(&self, issue: &IssueRef) -> anyhow::Result<IssueEvent> {
        let payload: IssuePayload = self
            .request_json(
                "get issue",
                self.http.get(self.url(&format!(
                    "/repos/{}/issues/{}",
                    issue.repository, issue.number
                ))),
            )
            .await?;
        if payload.pull_request.is_some() {
            anyhow::bail!("{} is a pull request, not an issue", issue);
        }
        let labels: Vec<String> = payload.labels.into_iter().map(|l| l.name).collect();
        Ok(IssueEvent {
            issue: issue.clone(),
            title: payload.title,
            body: payload.body.unwrap_or_default(),
            urgent: labels.iter().any(|l| l == URGENT_LABEL),
            labels,
            delivery_id: None,
        })
    }

    async fn related_issues(&self, event: &IssueEvent) -> Result<Vec<RelatedIssue>, ApplyError> {
        let mut seen = BTreeSet::new();
        let mut related = Vec::new();
        let per_page = self.limits.max_related_issues.clamp(1, 100).to_string();
        for label in &event.labels {
            if related.len() >= self.limits.max_related_issues {
                break;
            }
            let issues: Vec<IssueSummary> = self
                .request_json(
                    "list related issues",
                    self.http
                        .get(self.url(&format!("/repos/{}/issues", event.issue.repository)))
                        .query(&[
                            ("state", "all"),
                            ("labels", label.as_str()),
                            ("per_page", per_page.as_str()),
                        ]),
                )
                .await?;
            for issue in issues {
                if issue.number == event.issue.number
                    || issue.pull_request.is_some()
                    || !seen.insert(issue.number)
                {
                    continue;
                }
                related.push(RelatedIssue {
                    number: issue.number,
                    title: issue.title,
                    state: issue.state,
                    url: issue.html_url,
                });
                if related.len() >= self.limits.max_related_issues {
                    break;
                }
            }
        }
        Ok(related)
    }

    async fn excerpts(&self, repository: &str, paths: &[String]) -> Vec<FileExcerpt> {
        let mut excerpts = Vec::new();
        for path in paths {
            match self.file_content(repository, path).await {
                Ok(Some(content)) => {
                    let (content, truncated) = truncate_excerpt(&content, self.limits.max_excerpt_bytes);
                    excerpts.push(FileExcerpt {
                        path: path.clone(),
                        content,
                        truncated,
                    });
                }
                Ok(None) => tracing::debug!(repository, path = %path, "referenced file not found"),
                Err(e) => tracing::debug!(repository, path = %path, error = %e, "failed to fetch file"),
            }
        }
        excerpts
    }
}

/// File paths quoted in backticks, in order of first appearance.
pub fn referenced_paths(body: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    CODE_REF
        .captures_iter(body)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim_start_matches("./").to_string()))
        .filter(|p| !p.starts_with('/') && !p.split('/').any(|seg| seg == ".."))
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

/// Cut `content` to at most `max_bytes`, on a char boundary.
pub fn truncate_excerpt(content: &str, max_bytes: usize) -> (String, bool) {
    if content.len() <= max_bytes {
        return (content.to_string(), false);
    }
    let mut end = max_bytes;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    (content[..end].to_string(), true)
}

#[async_trait]
impl RepositoryClient for GitHubClient {
    async fn default_branch(&self, repository: &str) -> Result<String, ApplyError> {
        Ok(self.repo_info(repository).await?.default_branch)
    }

    async fn create_branch(
        &self,
        repository: &str,
        branch: &str,
        base: &str,
    ) -> Result<(), ApplyError> {
        let sha = self.branch_head(repository, base).await?;
        self.send(
            "create branch",
            self.http
                .post(self.url(&format!("/repos/{}/git/refs", repository)))
                .json(&json!({ "ref": format!("refs/heads/{}", branch), "sha": sha })),
        )
        .await?;
        Ok(())
    }

    async fn apply_file(
        &self,
        repository: &str,
        branch: &str,
        change: &FileChange,
        message: &str,
    ) -> Result<(), ApplyError> {
        let head = self.branch_head(repository, branch).await?;
        let commit: GitCommit = self
            .request_json(
                "get commit",
                self.http
                    .get(self.url(&format!("/repos/{}/git/commits/{}", repository, head))),
            )
            .await?;
        let tree: Created = self
            .request_json(
                "create tree",
                self.http
                    .post(self.url(&format!("/repos/{}/git/trees", repository)))
                    .json(&json!({
                        "base_tree": commit.tree.sha,
                        "tree": [{
                            "path": change.path,
                            "mode": "100644",
                            "type": "blob",
                            "content": change.content,
                        }],
                    })),
            )
            .await?;
        let new_commit: Created = self
            .request_json(
                "create commit",
                self.http
                    .post(self.url(&format!("/repos/{}/git/commits", repository)))
                    .json(&json!({
                        "message": message,
                        "tree": tree.sha,
                        "parents": [head],
                    })),
            )
            .await?;
        self.send(
            "update branch ref",
            self.http
                .patch(self.url(&format!("/repos/{}/git/refs/heads/{}", repository, branch)))
                .json(&json!({ "sha": new_commit.sha, "force": false })),
        )
        .await?;
        Ok(())
    }

    async fn create_pull_request(
        &self,
        repository: &str,
        draft: &PullRequestDraft,
    ) -> Result<PullRequest, ApplyError> {
        let pr: PullResponse = self
            .request_json(
                "create pull request",
                self.http
                    .post(self.url(&format!("/repos/{}/pulls", repository)))
                    .json(&json!({
                        "title": draft.title,
                        "body": draft.body,
                        "head": draft.head,
                        "base": draft.base,
                    })),
            )
            .await?;
        tracing::info!(repository, number = pr.number, url = %pr.html_url, "pull request created");
        Ok(PullRequest {
            number: pr.number,
            url: pr.html_url,
            branch: draft.head.clone(),
        })
    }

    async fn annotate_issue(&self, issue: &IssueRef, body: &str) -> Result<(), ApplyError> {
        self.send(
            "comment on issue",
            self.http
                .post(self.url(&format!(
                    "/repos/{}/issues/{}/comments",
                    issue.repository, issue.number
                )))
                .json(&json!({ "body": body })),
        )
        .await?;
        Ok(())
    }

    async fn add_labels(&self, issue: &IssueRef, labels: &[String]) -> Result<(), ApplyError> {
        self.send(
            "add labels",
            self.http
                .post(self.url(&format!(
                    "/repos/{}/issues/{}/labels",
                    issue.repository, issue.number
                )))
                .json(&json!({ "labels": labels })),
        )
        .await?;
        Ok(())
    }

    async fn delete_branch(&self, repository: &str, branch: &str) -> Result<(), ApplyError> {
        self.send(
            "delete branch",
            self.http
                .delete(self.url(&format!("/repos/{}/git/refs/heads/{}", repository, branch))),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ContextProvider for GitHubClient {
    async fn repository_context(&self, event: &IssueEvent) -> RepositoryContext {
        let mut context = RepositoryContext::default();
        if !self.limits.enabled {
            return context;
        }
        let repository = event.issue.repository.as_str();

        match self.repo_info(repository).await {
            Ok(info) => {
                context.description = info.description;
                context.topics = info.topics;
                context.default_branch = Some(info.default_branch);
            }
            Err(e) => tracing::warn!(issue = %event.issue, error = %e, "failed to fetch repository info"),
        }

        if self.limits.max_related_issues > 0 {
            match self.related_issues(event).await {
                Ok(related) => context.related_issues = related,
                Err(e) => tracing::warn!(issue = %event.issue, error = %e, "failed to fetch related issues"),
            }
        }

        context.file_excerpts = self.excerpts(repository, &referenced_paths(&event.body)).await;
        let docs: Vec<String> = DOC_FILES.iter().map(|d| d.to_string()).collect();
        context.documentation = self.excerpts(repository, &docs).await;

        tracing::debug!(
            issue = %event.issue,
            related = context.related_issues.len(),
            files = context.file_excerpts.len(),
            docs = context.documentation.len(),
            "gathered repository context"
        );
        context
    }
}
