//! Code generation collaborators.
//!
//! A [`CodeGenerator`] turns an [`IssueContext`] into the model's raw text
//! response. Parsing that text is the response parser's job; generators only
//! deal with transport.

use std::fmt::Write as _;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::config::GeneratorConfig;
use crate::errors::GenerationError;
use crate::models::{IssueContext, RepositoryContext};

pub const SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant that generates code to resolve GitHub issues.";

const FORMAT_INSTRUCTIONS: &str = r#"Please provide the code changes needed to resolve this issue.
Format your response as a list of file changes. For each file, open a fenced
code block whose first lines are the file path and a brief explanation,
followed by the complete new content of the file:

```python
# file: path/to/file.py
# explanation: Added new function to handle X
def new_function():
    ...
```

Use repository-relative paths. Emit each file at most once."#;

// ── Engine selection ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Engine {
    #[default]
    #[serde(rename = "openai", alias = "gpt4", alias = "gpt-4")]
    OpenAi,
    #[serde(rename = "claude-cli", alias = "claude")]
    ClaudeCli,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::OpenAi => "openai",
            Engine::ClaudeCli => "claude-cli",
        }
    }
}

impl FromStr for Engine {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "gpt4" | "gpt-4" => Ok(Engine::OpenAi),
            "claude-cli" | "claude" => Ok(Engine::ClaudeCli),
            other => Err(GenerationError::UnsupportedEngine(other.to_string())),
        }
    }
}

// ── Trait ─────────────────────────────────────────────────────────────

#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Produce the raw model response for an issue.
    async fn generate(&self, context: &IssueContext) -> Result<String, GenerationError>;

    fn name(&self) -> &str;
}

/// Build the generator selected by `config`.
pub fn from_config(config: &GeneratorConfig) -> Result<Arc<dyn CodeGenerator>, GenerationError> {
    match config.engine {
        Engine::OpenAi => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                GenerationError::Request("OPENAI_API_KEY is not set".to_string())
            })?;
            Ok(Arc::new(OpenAiGenerator::new(OpenAiSettings {
                api_key,
                api_url: config.openai_api_url.clone(),
                model: config.model.clone(),
                temperature: config.temperature,
                max_tokens: config.max_tokens,
                timeout: Duration::from_secs(config.timeout_secs),
            })?))
        }
        Engine::ClaudeCli => Ok(Arc::new(ClaudeCliGenerator::new(&config.claude_cmd))),
    }
}

// ── Prompt ────────────────────────────────────────────────────────────

/// Render the user prompt for an issue, including whatever repository
/// context was gathered.
pub fn build_prompt(context: &IssueContext) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Issue Title: {}", context.title);
    let body = if context.body.trim().is_empty() {
        "(no description)"
    } else {
        context.body.trim()
    };
    let _ = writeln!(prompt, "Issue Description: {}", body);
    if !context.labels.is_empty() {
        let _ = writeln!(prompt, "Labels: {}", context.labels.join(", "));
    }
    if let Some(repo) = context.repository.as_ref().filter(|r| !r.is_empty()) {
        prompt.push('\n');
        prompt.push_str(&render_repository_context(repo));
    }
    prompt.push('\n');
    prompt.push_str(FORMAT_INSTRUCTIONS);
    prompt.push('\n');
    prompt
}

fn render_repository_context(repo: &RepositoryContext) -> String {
    let mut out = String::from("## Repository Context\n");
    if let Some(description) = &repo.description {
        let _ = writeln!(out, "Description: {}", description);
    }
    if let Some(branch) = &repo.default_branch {
        let _ = writeln!(out, "Default branch: {}", branch);
    }
    if !repo.topics.is_empty() {
        let _ = writeln!(out, "Topics: {}", repo.topics.join(", "));
    }
    if !repo.related_issues.is_empty() {
        out.push_str("\n### Related issues\n");
        for issue in &repo.related_issues {
            let _ = writeln!(out, "- #{} [{}] {}", issue.number, issue.state, issue.title);
        }
    }
    for (heading, excerpts) in [
        ("Referenced files", &repo.file_excerpts),
        ("Documentation", &repo.documentation),
    ] {
        if excerpts.is_empty() {
            continue;
        }
        let _ = write!(out, "\n### {}\n", heading);
        for excerpt in excerpts {
            let marker = if excerpt.truncated { " (truncated)" } else { "" };
            let _ = write!(
                out,
                "\n#### {}{}\n```\n{}\n```\n",
                excerpt.path,
                marker,
                excerpt.content.trim_end()
            );
        }
    }
    out
}

// ── OpenAI chat completions ───────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

pub struct OpenAiGenerator {
    http: reqwest::Client,
    settings: OpenAiSettings,
}

impl OpenAiGenerator {
    pub fn new(settings: OpenAiSettings) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| GenerationError::Request(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http, settings })
    }
}

#[async_trait]
impl CodeGenerator for OpenAiGenerator {
    async fn generate(&self, context: &IssueContext) -> Result<String, GenerationError> {
        let prompt = build_prompt(context);
        let request = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        tracing::info!(
            issue = %context.issue,
            model = %self.settings.model,
            "requesting code generation"
        );

        let resp = self
            .http
            .post(&self.settings.api_url)
            .bearer_auth(&self.settings.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Request(format!(
                "chat completions returned {}: {}",
                status,
                body.chars().take(500).collect::<String>()
            )));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerationError::InvalidResponse("response has no choices".to_string()))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// ── Claude CLI ────────────────────────────────────────────────────────

/// Runs the `claude` CLI in print mode and returns its stdout.
pub struct ClaudeCliGenerator {
    command: String,
}

impl ClaudeCliGenerator {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }
}

#[async_trait]
impl CodeGenerator for ClaudeCliGenerator {
    async fn generate(&self, context: &IssueContext) -> Result<String, GenerationError> {
        let prompt = build_prompt(context);
        tracing::info!(issue = %context.issue, command = %self.command, "running claude CLI");

        let output = Command::new(&self.command)
            .args([
                "--print",
                "--output-format",
                "text",
                "-p",
                &prompt,
                "--system",
                SYSTEM_PROMPT,
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                GenerationError::Request(format!("failed to run '{}': {}", self.command, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GenerationError::Request(format!(
                "'{}' exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn name(&self) -> &str {
        "claude-cli"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileExcerpt, IssueRef, RelatedIssue};

    fn context() -> IssueContext {
        IssueContext {
            issue: IssueRef::new("owner/repo", 12),
            title: "Add greet helper".into(),
            body: "We need `src/greet.py`.".into(),
            labels: vec!["enhancement".into()],
            repository: None,
        }
    }

    #[test]
    fn test_engine_from_str() {
        assert_eq!("openai".parse::<Engine>().unwrap(), Engine::OpenAi);
        assert_eq!("gpt4".parse::<Engine>().unwrap(), Engine::OpenAi);
        assert_eq!("Claude-CLI".parse::<Engine>().unwrap(), Engine::ClaudeCli);
        match "sweep".parse::<Engine>() {
            Err(GenerationError::UnsupportedEngine(name)) => assert_eq!(name, "sweep"),
            other => panic!("Expected UnsupportedEngine, got {:?}", other),
        }
    }

    #[test]
    fn test_engine_deserializes_aliases() {
        #[derive(Deserialize)]
        struct Wrapper {
            engine: Engine,
        }
        let w: Wrapper = toml::from_str("engine = \"gpt4\"").unwrap();
        assert_eq!(w.engine, Engine::OpenAi);
        let w: Wrapper = toml::from_str("engine = \"claude-cli\"").unwrap();
        assert_eq!(w.engine, Engine::ClaudeCli);
    }

    #[test]
    fn test_build_prompt_basic() {
        let prompt = build_prompt(&context());
        assert!(prompt.contains("Issue Title: Add greet helper"));
        assert!(prompt.contains("Issue Description: We need `src/greet.py`."));
        assert!(prompt.contains("Labels: enhancement"));
        assert!(prompt.contains("# file: path/to/file.py"));
        assert!(prompt.contains("# explanation:"));
        assert!(!prompt.contains("Repository Context"));
    }

    #[test]
    fn test_build_prompt_empty_body() {
        let mut ctx = context();
        ctx.body = "  ".into();
        assert!(build_prompt(&ctx).contains("Issue Description: (no description)"));
    }

    #[test]
    fn test_build_prompt_with_repository_context() {
        let mut ctx = context();
        ctx.repository = Some(RepositoryContext {
            description: Some("A greeting library".into()),
            default_branch: Some("main".into()),
            topics: vec!["python".into()],
            related_issues: vec![RelatedIssue {
                number: 3,
                title: "Add farewell".into(),
                state: "closed".into(),
                url: "https://github.com/owner/repo/issues/3".into(),
            }],
            file_excerpts: vec![FileExcerpt {
                path: "src/greet.py".into(),
                content: "def greet(): pass\n".into(),
                truncated: true,
            }],
            documentation: vec![],
        });
        let prompt = build_prompt(&ctx);
        assert!(prompt.contains("## Repository Context"));
        assert!(prompt.contains("Description: A greeting library"));
        assert!(prompt.contains("Default branch: main"));
        assert!(prompt.contains("- #3 [closed] Add farewell"));
        assert!(prompt.contains("#### src/greet.py (truncated)"));
        assert!(!prompt.contains("### Documentation"));
    }

    #[test]
    fn test_from_config_openai_requires_key() {
        let config = GeneratorConfig::default();
        assert!(matches!(
            from_config(&config),
            Err(GenerationError::Request(_))
        ));
    }

    #[test]
    fn test_from_config_claude_cli() {
        let config = GeneratorConfig {
            engine: Engine::ClaudeCli,
            ..GeneratorConfig::default()
        };
        assert_eq!(from_config(&config).unwrap().name(), "claude-cli");
    }

    #[tokio::test]
    async fn test_claude_cli_missing_binary_is_request_error() {
        let generator = ClaudeCliGenerator::new("/nonexistent/claude-binary");
        let err = generator.generate(&context()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Request(_)));
    }
}
