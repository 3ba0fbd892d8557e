//! Integration tests for issue2pr
//!
//! CLI tests drive the built binary; pipeline tests drive the webhook router
//! end to end with the in-memory collaborators from `issue2pr::testkit`.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create an issue2pr Command with no ambient configuration
fn issue2pr(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("issue2pr");
    cmd.current_dir(dir.path())
        .env_remove("GITHUB_TOKEN")
        .env_remove("REPOSITORY")
        .env_remove("WEBHOOK_SECRET")
        .env_remove("OPENAI_API_KEY")
        .env_remove("AI_ENGINE")
        .env_remove("RUST_LOG");
    cmd
}

fn write_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        let dir = TempDir::new().unwrap();
        issue2pr(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("process"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        issue2pr(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_process_requires_issue_number() {
        let dir = TempDir::new().unwrap();
        issue2pr(&dir)
            .args(["process", "--repo", "owner/repo"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--issue"));
    }
}

// =============================================================================
// Parse / Sign
// =============================================================================

mod parse_command {
    use super::*;

    #[test]
    fn test_parse_marker_dialect() {
        let dir = TempDir::new().unwrap();
        let input = write_file(&dir, "response.txt", "# file: a.py\n# explanation: add foo\nprint(1)\n");
        issue2pr(&dir)
            .arg("parse")
            .arg(&input)
            .assert()
            .success()
            .stdout(predicate::str::contains("\"path\": \"a.py\""))
            .stdout(predicate::str::contains("\"explanation\": \"add foo\""))
            .stdout(predicate::str::contains("\"content\": \"print(1)\""));
    }

    #[test]
    fn test_parse_section_dialect_from_stdin() {
        let dir = TempDir::new().unwrap();
        issue2pr(&dir)
            .args(["parse", "-"])
            .write_stdin("## Files\n- a.py\n## Changes\n**a.py**\n```python\nx=1\n```")
            .assert()
            .success()
            .stdout(predicate::str::contains("\"dialect\": \"section\""))
            .stdout(predicate::str::contains("\"content\": \"x=1\""));
    }

    #[test]
    fn test_parse_rejects_unknown_dialect() {
        let dir = TempDir::new().unwrap();
        let input = write_file(&dir, "response.txt", "# file: a.py\nx\n");
        issue2pr(&dir)
            .arg("parse")
            .arg(&input)
            .args(["--dialect", "yaml"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid dialect"));
    }

    #[test]
    fn test_parse_validate_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let input = write_file(&dir, "response.txt", "# file: ../etc/passwd\nroot\n");
        issue2pr(&dir)
            .arg("parse")
            .arg(&input)
            .arg("--validate")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Change set rejected"));
    }

    #[test]
    fn test_parse_missing_file() {
        let dir = TempDir::new().unwrap();
        issue2pr(&dir)
            .args(["parse", "nope.txt"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to read"));
    }

    #[test]
    fn test_sign_known_vector() {
        let dir = TempDir::new().unwrap();
        let input = write_file(&dir, "payload.json", "Hello, World!");
        issue2pr(&dir)
            .args(["sign", "--secret", "It's a Secret to Everybody"])
            .arg(&input)
            .assert()
            .success()
            .stdout(
                "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17\n",
            );
    }

    #[test]
    fn test_sign_reads_secret_from_env() {
        let dir = TempDir::new().unwrap();
        let input = write_file(&dir, "payload.json", "Hello, World!");
        issue2pr(&dir)
            .env("WEBHOOK_SECRET", "It's a Secret to Everybody")
            .arg("sign")
            .arg(&input)
            .assert()
            .success()
            .stdout(predicate::str::starts_with("sha256=757107ea"));
    }
}

// =============================================================================
// Config
// =============================================================================

mod config_command {
    use super::*;

    #[test]
    fn test_validate_fails_without_token() {
        let dir = TempDir::new().unwrap();
        issue2pr(&dir)
            .args(["config", "validate"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("GITHUB_TOKEN"));
    }

    #[test]
    fn test_validate_accepts_file_and_env() {
        let dir = TempDir::new().unwrap();
        write_file(
            &dir,
            "issue2pr.toml",
            "[generator]\nengine = \"claude-cli\"\n\n[github]\nrepository = \"owner/repo\"\n",
        );
        issue2pr(&dir)
            .env("GITHUB_TOKEN", "ghp_test")
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid"));
    }

    #[test]
    fn test_show_redacts_secrets() {
        let dir = TempDir::new().unwrap();
        issue2pr(&dir)
            .env("GITHUB_TOKEN", "ghp_very_secret")
            .env("WEBHOOK_SECRET", "hook_secret")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("********"))
            .stdout(predicate::str::contains("ghp_very_secret").not())
            .stdout(predicate::str::contains("hook_secret").not());
    }

    #[test]
    fn test_invalid_config_file_reported() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "broken.toml", "[server\nport = 1");
        issue2pr(&dir)
            .arg("--config")
            .arg(&path)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to load configuration"));
    }

    #[test]
    fn test_serve_refuses_invalid_config() {
        let dir = TempDir::new().unwrap();
        issue2pr(&dir)
            .args(["serve", "--port", "0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }
}

// =============================================================================
// Webhook → Pipeline
// =============================================================================

mod webhook_pipeline {
    use std::sync::Arc;

    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use issue2pr::config::PipelineConfig;
    use issue2pr::idempotency::{IdempotencyTracker, RecordState, SqliteStore};
    use issue2pr::models::IssueRef;
    use issue2pr::server::{AppState, build_router};
    use issue2pr::testkit::{FailPoint, RecordingRepository, ScriptedGenerator};
    use issue2pr::webhook::{WebhookRouter, format_signature_header};

    const SECRET: &str = "integration-secret";

    struct Harness {
        app: Router,
        generator: Arc<ScriptedGenerator>,
        repository: Arc<RecordingRepository>,
        tracker: IdempotencyTracker,
    }

    fn harness(
        generator: ScriptedGenerator,
        repository: RecordingRepository,
        tracker: IdempotencyTracker,
    ) -> Harness {
        let generator = Arc::new(generator);
        let repository = Arc::new(repository);
        let pipeline = issue2pr::pipeline::Pipeline::new(
            generator.clone(),
            repository.clone(),
            tracker.clone(),
            PipelineConfig::default(),
        );
        let router = WebhookRouter::new(Some(SECRET.to_string()));
        Harness {
            app: build_router(AppState::new(router, pipeline)),
            generator,
            repository,
            tracker,
        }
    }

    fn request(event: &str, body: Value) -> Request<Body> {
        let body = body.to_string().into_bytes();
        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .header("X-GitHub-Event", event)
            .header("X-GitHub-Delivery", "it-1")
            .header("X-Hub-Signature-256", format_signature_header(SECRET, &body))
            .body(Body::from(body))
            .unwrap()
    }

    fn issue_opened(number: u64) -> Value {
        json!({
            "action": "opened",
            "issue": {"number": number, "title": "Add greeting", "body": "Say hi", "labels": []},
            "repository": {"full_name": "owner/repo"}
        })
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_comment_trigger_with_section_dialect() {
        let h = harness(
            ScriptedGenerator::always(
                "## Files\n- src/greet.py\n## Changes\n**src/greet.py**\n```python\nprint('hi')\n```\n## Explanation\nAdds a greeting.",
            ),
            RecordingRepository::new(),
            IdempotencyTracker::in_memory(),
        );
        let body = json!({
            "action": "created",
            "issue": {"number": 12, "title": "Greet", "body": null, "labels": []},
            "repository": {"full_name": "owner/repo"},
            "comment": {"body": "@issue2pr please", "user": {"login": "alice", "type": "User"}}
        });

        let (status, outcome) = send(&h.app, request("issue_comment", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["state"], "PR_CREATED");
        assert_eq!(h.repository.files_applied(), vec!["src/greet.py"]);
        let drafts = h.repository.pull_requests();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].title, "Fix #12: Greet");
        assert!(drafts[0].body.contains("Adds a greeting."));
    }

    #[tokio::test]
    async fn test_bot_comment_never_reaches_generator() {
        let h = harness(
            ScriptedGenerator::always("# file: a.py\nx\n"),
            RecordingRepository::new(),
            IdempotencyTracker::in_memory(),
        );
        let body = json!({
            "action": "created",
            "issue": {"number": 12, "title": "Greet", "body": null, "labels": []},
            "repository": {"full_name": "owner/repo"},
            "comment": {"body": "@issue2pr opened a PR", "user": {"login": "issue2pr[bot]", "type": "Bot"}}
        });

        let (status, outcome) = send(&h.app, request("issue_comment", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["state"], "SKIPPED");
        assert_eq!(outcome["skip_reason"], "bot_comment");
        assert_eq!(h.generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_generation_fails_without_branch() {
        let h = harness(
            ScriptedGenerator::always(""),
            RecordingRepository::new(),
            IdempotencyTracker::in_memory(),
        );

        let (_, outcome) = send(&h.app, request("issues", issue_opened(3))).await;
        assert_eq!(outcome["state"], "FAILED");
        assert!(h.repository.branches_created().is_empty());
        let annotations = h.repository.annotations();
        assert_eq!(annotations.len(), 1);
        assert!(annotations[0].contains("No changes generated"));
    }

    #[tokio::test]
    async fn test_partial_apply_keeps_committed_files() {
        let response = "# file: a.py\nA\n\n# file: b.py\nB\n\n# file: c.py\nC\n";
        let h = harness(
            ScriptedGenerator::always(response),
            RecordingRepository::new().fail_at(FailPoint::ApplyFile { nth: 1 }),
            IdempotencyTracker::in_memory(),
        );

        let (_, outcome) = send(&h.app, request("issues", issue_opened(9))).await;
        assert_eq!(outcome["state"], "FAILED");
        assert_eq!(outcome["error_kind"], "ApplyError");
        assert_eq!(h.repository.files_applied(), vec!["a.py"]);
        assert!(h.repository.pull_requests().is_empty());
        let record = h
            .tracker
            .record(&IssueRef::new("owner/repo", 9))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, RecordState::Failed);
    }

    #[tokio::test]
    async fn test_sqlite_tracker_survives_restart() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = dir.path().join("idempotency.db");
        let response = "# file: a.py\nprint(1)\n";

        {
            let tracker = IdempotencyTracker::new(Arc::new(SqliteStore::open(&db).unwrap()));
            let h = harness(ScriptedGenerator::always(response), RecordingRepository::new(), tracker);
            let (_, outcome) = send(&h.app, request("issues", issue_opened(5))).await;
            assert_eq!(outcome["state"], "PR_CREATED");
        }

        let tracker = IdempotencyTracker::new(Arc::new(SqliteStore::open(&db).unwrap()));
        let h = harness(ScriptedGenerator::always(response), RecordingRepository::new(), tracker);
        let (_, outcome) = send(&h.app, request("issues", issue_opened(5))).await;
        assert_eq!(outcome["state"], "SKIPPED");
        assert_eq!(outcome["skip_reason"], "duplicate");
        assert_eq!(h.generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_deliveries_open_one_pull_request() {
        let h = harness(
            ScriptedGenerator::always("# file: a.py\nprint(1)\n"),
            RecordingRepository::new(),
            IdempotencyTracker::in_memory(),
        );

        let (first, second) = tokio::join!(
            send(&h.app, request("issues", issue_opened(6))),
            send(&h.app, request("issues", issue_opened(6))),
        );
        let mut states = vec![
            first.1["state"].as_str().unwrap().to_string(),
            second.1["state"].as_str().unwrap().to_string(),
        ];
        states.sort();
        assert_eq!(states, vec!["PR_CREATED", "SKIPPED"]);
        assert_eq!(h.repository.pull_requests().len(), 1);
        assert_eq!(h.generator.calls(), 1);
    }
}
