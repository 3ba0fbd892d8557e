//! Typed error hierarchy for issue2pr.
//!
//! The enums follow the pipeline boundaries:
//! - `SignatureError` / `RouteError`: rejected at the webhook boundary,
//!   before any business logic runs
//! - `GenerationError`, `ValidationError`, `ApplyError`: collaborator and
//!   change-set failures, folded into `PipelineError`
//! - `PipelineError`: everything that ends an issue in FAILED and is
//!   reported back on the issue
//! - `StoreError` / `PipelineFault`: unexpected faults that surface as 500
//! - `ConfigError`: configuration loading and validation

use std::path::PathBuf;

use thiserror::Error;

/// Errors from webhook signature verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("Missing X-Hub-Signature-256 header")]
    Missing,

    #[error("Malformed signature header: {0}")]
    Malformed(String),

    #[error("Signature does not match the request body")]
    Mismatch,
}

/// Errors that reject a webhook delivery at the boundary.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Webhook authentication failed: {0}")]
    Auth(#[from] SignatureError),

    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),
}

/// Errors from the code generation collaborator.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Unsupported code generation engine '{0}'")]
    UnsupportedEngine(String),

    #[error("Code generation request failed: {0}")]
    Request(String),

    #[error("Code generator returned an unusable response: {0}")]
    InvalidResponse(String),
}

/// Reasons a change set is rejected before anything is applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Change set is empty")]
    Empty,

    #[error("Change {index} has an empty path")]
    EmptyPath { index: usize },

    #[error("Path '{path}' appears more than once")]
    DuplicatePath { path: String },

    #[error("Path '{path}' is absolute or escapes the repository root")]
    UnsafePath { path: String },
}

/// A remote failure while materializing changes on the repository.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: {message}")]
pub struct ApplyError {
    pub operation: String,
    pub message: String,
}

impl ApplyError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Errors that terminate a pipeline run in FAILED.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("No changes generated: the model response contained no usable file changes")]
    Parse { skipped_fragments: usize },

    #[error("Invalid change set: {0}")]
    Validation(#[from] ValidationError),

    #[error("{source}")]
    Apply {
        #[source]
        source: ApplyError,
        /// Paths already committed before the failure.
        applied: Vec<String>,
        branch: BranchCleanup,
    },
}

/// What happened to the working branch after an apply failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BranchCleanup {
    /// The failure came before the branch existed.
    #[default]
    NotCreated,
    Kept,
    Deleted,
    DeleteFailed,
}

impl PipelineError {
    /// Short name of the error kind, used in issue annotations and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Generation(_) => "GenerationError",
            PipelineError::Parse { .. } => "ParseError",
            PipelineError::Validation(_) => "ValidationError",
            PipelineError::Apply { .. } => "ApplyError",
        }
    }
}

/// Errors from an idempotency store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Idempotency store lock poisoned")]
    LockPoisoned,

    #[error("Idempotency store error: {0}")]
    Backend(#[source] anyhow::Error),
}

/// Unexpected faults that abort event handling entirely.
#[derive(Debug, Error)]
pub enum PipelineFault {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}
