//! Integration tests for the cast-send worker

use assert_cmd::Command;
use libcastline::service::posts::NewPost;
use libcastline::{CastlineService, Config, NewCredential, PlatformId, PostStatus};
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

struct Env {
    _dir: TempDir,
    config_path: String,
    db_path: String,
}

/// Temp config + database with alice connected to twitter and linkedin
async fn setup() -> (Env, CastlineService) {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("config.toml");
    let db_path = dir.path().join("castline.db");
    let db_str = db_path.display().to_string().replace('\\', "/");

    fs::write(
        &config_path,
        format!(
            "[database]\npath = \"{}\"\n\n[queue]\npoll_interval_ms = 50\nbackoff_ms = 0\n",
            db_str
        ),
    )
    .unwrap();

    let mut config = Config::default_config();
    config.database.path = db_str.clone();
    let service = CastlineService::from_config(config).await.unwrap();
    for platform in [PlatformId::Twitter, PlatformId::LinkedIn] {
        service
            .credentials()
            .upsert_credential(NewCredential::bearer("alice", platform, "token"))
            .await
            .unwrap();
    }

    (
        Env {
            _dir: dir,
            config_path: config_path.to_str().unwrap().to_string(),
            db_path: db_str,
        },
        service,
    )
}

async fn due_post(service: &CastlineService, content: &str) -> String {
    let post = service
        .posts()
        .create_post(NewPost::new(
            "alice",
            content,
            vec![PlatformId::Twitter, PlatformId::LinkedIn],
        ))
        .await
        .unwrap();
    service.posts().publish_now(&post.id, "alice").await.unwrap();
    post.id
}

fn cast_send(env: &Env) -> Command {
    let mut cmd = Command::cargo_bin("cast-send").unwrap();
    cmd.env("CASTLINE_CONFIG", &env.config_path)
        .env("CASTLINE_DB_PATH", &env.db_path)
        .timeout(std::time::Duration::from_secs(30));
    cmd
}

#[tokio::test]
async fn test_once_with_empty_queue() {
    let (env, service) = setup().await;
    service.close().await;

    cast_send(&env)
        .args(["--once", "--dry-run"])
        .assert()
        .success();
}

#[tokio::test]
async fn test_once_dry_run_publishes_due_post() {
    let (env, service) = setup().await;
    let id = due_post(&service, "Ship it").await;

    cast_send(&env)
        .args(["--once", "--dry-run"])
        .assert()
        .success();

    let stored = service.posts().get_post(&id, "alice").await.unwrap();
    assert_eq!(stored.post.status, PostStatus::Published);
    assert_eq!(stored.outcomes.len(), 2);
    assert!(stored.outcomes.iter().all(|o| o.success));
    assert_eq!(service.posts().queue_stats().await.waiting, 0);
}

#[tokio::test]
async fn test_once_leaves_future_posts_alone() {
    let (env, service) = setup().await;
    let mut request = NewPost::new("alice", "Next week", vec![PlatformId::Twitter]);
    request.scheduled_at = Some(chrono::Utc::now() + chrono::Duration::days(7));
    let post = service.posts().create_post(request).await.unwrap();

    cast_send(&env)
        .args(["--once", "--dry-run"])
        .assert()
        .success();

    let stored = service.posts().get_post(&post.id, "alice").await.unwrap();
    assert_eq!(stored.post.status, PostStatus::Scheduled);
    assert_eq!(service.posts().queue_stats().await.delayed, 1);
}

#[tokio::test]
async fn test_events_are_json_lines() {
    let (env, service) = setup().await;
    let id = due_post(&service, "Watch me").await;

    let output = cast_send(&env)
        .args(["--once", "--dry-run", "--events"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let events: Vec<serde_json::Value> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert!(events
        .iter()
        .any(|e| e["type"] == "publish_started" && e["post_id"] == id.as_str()));
    assert!(events.iter().any(|e| e["type"] == "publish_completed"));
}

#[tokio::test]
async fn test_invalid_config_exit_code() {
    let (env, service) = setup().await;
    service.close().await;
    fs::write(&env.config_path, "[queue\nbroken").unwrap();

    cast_send(&env)
        .arg("--once")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Configuration error"));
}
