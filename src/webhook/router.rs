use axum::http::HeaderMap;

use crate::errors::{RouteError, SignatureError};
use crate::models::IssueRef;

use super::events::{
    DELIVERY_HEADER, EVENT_HEADER, IgnoreReason, IssueEvent, SIGNATURE_HEADER, WebhookEvent,
    WebhookPayload,
};
use super::signature::verify_signature;

/// Label that keeps the bot away from an issue.
pub const IGNORE_LABEL: &str = "bot:ignore";
/// Label that marks an issue as urgent.
pub const URGENT_LABEL: &str = "bot:urgent";
/// Default comment token that triggers processing.
pub const DEFAULT_TRIGGER_TOKEN: &str = "@issue2pr";

/// The delivery headers the router needs, extracted once from the request.
#[derive(Debug, Clone, Default)]
pub struct WebhookHeaders {
    pub event: Option<String>,
    pub signature: Option<String>,
    pub delivery: Option<String>,
}

impl WebhookHeaders {
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        };
        Self {
            event: get(EVENT_HEADER),
            signature: get(SIGNATURE_HEADER),
            delivery: get(DELIVERY_HEADER),
        }
    }
}

/// Authenticates, classifies and filters webhook deliveries.
#[derive(Debug, Clone)]
pub struct WebhookRouter {
    secret: Option<String>,
    trigger_token: String,
    trigger_label: Option<String>,
}

impl WebhookRouter {
    /// Create a router. Without a secret, signature checks are skipped.
    pub fn new(secret: Option<String>) -> Self {
        let secret = secret.filter(|s| !s.is_empty());
        if secret.is_none() {
            tracing::warn!(
                "No webhook secret configured: signature verification is DISABLED and every delivery is trusted"
            );
        }
        Self {
            secret,
            trigger_token: DEFAULT_TRIGGER_TOKEN.to_string(),
            trigger_label: None,
        }
    }

    /// Replace the comment trigger. A blank token would match every comment,
    /// so it is ignored and the current token kept.
    pub fn with_trigger_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        if token.trim().is_empty() {
            tracing::warn!(kept = %self.trigger_token, "ignoring blank trigger token");
        } else {
            self.trigger_token = token.trim().to_string();
        }
        self
    }

    /// Only react to `labeled` events that add this label.
    pub fn with_trigger_label(mut self, label: Option<String>) -> Self {
        self.trigger_label = label.filter(|l| !l.is_empty());
        self
    }

    pub fn verifies_signatures(&self) -> bool {
        self.secret.is_some()
    }

    /// Check the delivery signature against the raw body.
    pub fn authenticate(
        &self,
        headers: &WebhookHeaders,
        raw_body: &[u8],
    ) -> Result<(), SignatureError> {
        match &self.secret {
            Some(secret) => verify_signature(secret, raw_body, headers.signature.as_deref()),
            None => {
                tracing::debug!(
                    delivery = headers.delivery.as_deref().unwrap_or("-"),
                    "signature check skipped (no secret configured)"
                );
                Ok(())
            }
        }
    }

    /// Authenticate, parse and classify one delivery.
    pub fn route(
        &self,
        headers: &WebhookHeaders,
        raw_body: &[u8],
    ) -> Result<WebhookEvent, RouteError> {
        self.authenticate(headers, raw_body)?;

        let event_type = headers
            .event
            .as_deref()
            .ok_or_else(|| RouteError::MalformedPayload("missing X-GitHub-Event header".into()))?;

        let event = match event_type {
            "issues" | "issue_comment" => {
                let payload: WebhookPayload = serde_json::from_slice(raw_body)
                    .map_err(|e| RouteError::MalformedPayload(e.to_string()))?;
                self.classify(event_type, payload, headers.delivery.clone())?
            }
            _ => WebhookEvent::ignored(IgnoreReason::UnsupportedEvent),
        };

        tracing::info!(
            delivery = headers.delivery.as_deref().unwrap_or("-"),
            event_type,
            event = event.kind(),
            issue = event.issue_event().map(|e| e.issue.to_string()).unwrap_or_default(),
            "routed webhook delivery"
        );
        Ok(event)
    }

    fn classify(
        &self,
        event_type: &str,
        payload: WebhookPayload,
        delivery_id: Option<String>,
    ) -> Result<WebhookEvent, RouteError> {
        let action = payload
            .action
            .clone()
            .ok_or_else(|| RouteError::MalformedPayload("missing 'action'".into()))?;

        if event_type == "issues" {
            if action != "opened" && action != "labeled" {
                return Ok(WebhookEvent::ignored(IgnoreReason::UnsupportedAction));
            }
            let added_label = payload.label.as_ref().map(|l| l.name.clone());
            let issue_event = match issue_event(payload, delivery_id)? {
                Ok(e) => e,
                Err(reason) => return Ok(WebhookEvent::ignored(reason)),
            };
            if action == "labeled"
                && let Some(trigger) = &self.trigger_label
                && added_label.as_deref() != Some(trigger.as_str())
                && !issue_event.has_label(IGNORE_LABEL)
            {
                return Ok(WebhookEvent::ignored(IgnoreReason::OtherLabel));
            }
            return Ok(filter(issue_event, |e| {
                if action == "opened" {
                    WebhookEvent::IssueOpened(e)
                } else {
                    WebhookEvent::IssueLabeled(e)
                }
            }));
        }

        // issue_comment
        if action != "created" {
            return Ok(WebhookEvent::ignored(IgnoreReason::UnsupportedAction));
        }
        let comment = payload
            .comment
            .as_ref()
            .ok_or_else(|| RouteError::MalformedPayload("missing 'comment'".into()))?;
        let from_bot = comment
            .user
            .as_ref()
            .and_then(|u| u.kind.as_deref())
            .is_some_and(|kind| kind.eq_ignore_ascii_case("bot"));
        if from_bot {
            return Ok(WebhookEvent::ignored(IgnoreReason::BotComment));
        }
        let body = comment.body.as_deref().unwrap_or_default();
        if !body
            .to_lowercase()
            .contains(&self.trigger_token.to_lowercase())
        {
            return Ok(WebhookEvent::ignored(IgnoreReason::NoTrigger));
        }
        let issue_event = match issue_event(payload, delivery_id)? {
            Ok(e) => e,
            Err(reason) => return Ok(WebhookEvent::ignored(reason)),
        };
        Ok(filter(issue_event, WebhookEvent::CommentTrigger))
    }
}

/// Build the typed issue data. The outer error is a malformed payload, the
/// inner one a reason to ignore the delivery.
fn issue_event(
    payload: WebhookPayload,
    delivery_id: Option<String>,
) -> Result<Result<IssueEvent, IgnoreReason>, RouteError> {
    let issue = payload
        .issue
        .ok_or_else(|| RouteError::MalformedPayload("missing 'issue'".into()))?;
    let repository = payload
        .repository
        .ok_or_else(|| RouteError::MalformedPayload("missing 'repository'".into()))?;
    if issue.pull_request.is_some() {
        return Ok(Err(IgnoreReason::PullRequest));
    }
    let labels: Vec<String> = issue.labels.into_iter().map(|l| l.name).collect();
    let urgent = labels.iter().any(|l| l == URGENT_LABEL);
    Ok(Ok(IssueEvent {
        issue: IssueRef::new(repository.full_name, issue.number),
        title: issue.title,
        body: issue.body.unwrap_or_default(),
        labels,
        urgent,
        delivery_id,
    }))
}

/// Apply label filtering to an actionable event.
fn filter(event: IssueEvent, wrap: impl FnOnce(IssueEvent) -> WebhookEvent) -> WebhookEvent {
    if event.has_label(IGNORE_LABEL) {
        tracing::info!(issue = %event.issue, "issue carries {}, ignoring", IGNORE_LABEL);
        return WebhookEvent::ignored(IgnoreReason::IgnoreLabel);
    }
    if event.urgent {
        tracing::info!(issue = %event.issue, "issue flagged urgent");
    }
    wrap(event)
}
