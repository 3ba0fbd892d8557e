use serde::{Deserialize, Serialize};

use crate::models::IssueRef;

/// Header carrying the event category (`issues`, `issue_comment`, `ping`, ...).
pub const EVENT_HEADER: &str = "x-github-event";
/// Header carrying `sha256=<hex HMAC of the raw body>`.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
/// Header carrying the unique delivery id.
pub const DELIVERY_HEADER: &str = "x-github-delivery";

// ── Raw payload (subset of fields we care about) ─────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub action: Option<String>,
    pub issue: Option<IssuePayload>,
    pub repository: Option<RepositoryPayload>,
    pub comment: Option<CommentPayload>,
    /// The label that was just added, on `labeled` events.
    pub label: Option<LabelPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssuePayload {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    #[serde(default)]
    pub labels: Vec<LabelPayload>,
    /// Present when the "issue" is actually a pull request.
    pub pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelPayload {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryPayload {
    pub full_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentPayload {
    pub body: Option<String>,
    pub user: Option<UserPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserPayload {
    pub login: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

// ── Typed events ──────────────────────────────────────────────────────

/// The issue data carried by every actionable event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueEvent {
    pub issue: IssueRef,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    /// Set when the issue carries the urgent label.
    pub urgent: bool,
    pub delivery_id: Option<String>,
}

impl IssueEvent {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// Why a delivery was classified as not actionable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// Event category we do not handle (including `ping`).
    UnsupportedEvent,
    /// Issue event with an action other than opened/labeled.
    UnsupportedAction,
    /// Comment without the trigger token.
    NoTrigger,
    /// Comment written by a bot account.
    BotComment,
    /// Event concerning a pull request rather than an issue.
    PullRequest,
    /// A label other than the configured trigger label was added.
    OtherLabel,
    /// The issue carries the ignore label.
    IgnoreLabel,
}

impl IgnoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedEvent => "unsupported_event",
            Self::UnsupportedAction => "unsupported_action",
            Self::NoTrigger => "no_trigger",
            Self::BotComment => "bot_comment",
            Self::PullRequest => "pull_request",
            Self::OtherLabel => "other_label",
            Self::IgnoreLabel => "ignore_label",
        }
    }
}

/// A classified webhook delivery. Produced once at the boundary; downstream
/// code never looks at the raw payload again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookEvent {
    IssueOpened(IssueEvent),
    IssueLabeled(IssueEvent),
    CommentTrigger(IssueEvent),
    Ignored { reason: IgnoreReason },
}

impl WebhookEvent {
    pub fn ignored(reason: IgnoreReason) -> Self {
        Self::Ignored { reason }
    }

    /// The issue data, unless the event is ignored.
    pub fn issue_event(&self) -> Option<&IssueEvent> {
        match self {
            Self::IssueOpened(e) | Self::IssueLabeled(e) | Self::CommentTrigger(e) => Some(e),
            Self::Ignored { .. } => None,
        }
    }

    pub fn into_issue_event(self) -> Option<IssueEvent> {
        match self {
            Self::IssueOpened(e) | Self::IssueLabeled(e) | Self::CommentTrigger(e) => Some(e),
            Self::Ignored { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::IssueOpened(_) => "issue_opened",
            Self::IssueLabeled(_) => "issue_labeled",
            Self::CommentTrigger(_) => "comment_trigger",
            Self::Ignored { .. } => "ignored",
        }
    }
}
