//! One-shot processing command: `issue2pr process`.

use anyhow::{Context, Result};
use serde_json::json;

use issue2pr::config::Config;
use issue2pr::github::GitHubClient;
use issue2pr::models::{IssueRef, is_owner_repo};
use issue2pr::pipeline::pull_request_body;
use issue2pr::server::AppState;
use issue2pr::webhook::WebhookEvent;

pub async fn cmd_process(
    config: &Config,
    repo: Option<&str>,
    issue: u64,
    dry_run: bool,
) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let repository = repo
        .map(str::to_string)
        .or_else(|| config.github.repository.clone())
        .context("No repository given: pass --repo or set REPOSITORY")?;
    if !is_owner_repo(&repository) {
        anyhow::bail!("Invalid repository '{}': expected owner/repo", repository);
    }
    let issue_ref = IssueRef::new(repository, issue);

    let github = GitHubClient::from_config(config)?;
    let event = github
        .get_issue(&issue_ref)
        .await
        .with_context(|| format!("Failed to fetch {}", issue_ref))?;
    let state = AppState::from_config(config)?;

    if dry_run {
        let parsed = state.pipeline.preview(&event).await?;
        let preview = json!({
            "title": format!("Fix #{}: {}", issue_ref.number, event.title),
            "branch": state.pipeline.branch_name(&issue_ref),
            "body": pull_request_body(&event, &parsed, &parsed.changes),
            "files": parsed.changes.paths(),
            "warnings": parsed.warnings,
        });
        println!("{}", serde_json::to_string_pretty(&preview)?);
        return Ok(());
    }

    let outcome = state
        .pipeline
        .process(WebhookEvent::IssueOpened(event))
        .await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.succeeded() {
        anyhow::bail!(
            "{} ended in {}{}",
            issue_ref,
            outcome.state,
            outcome
                .error
                .map(|e| format!(": {}", e))
                .unwrap_or_default()
        );
    }
    Ok(())
}
