//! Integration tests for cast-queue

use assert_cmd::Command;
use libcastline::service::posts::NewPost;
use libcastline::{CastlineService, Config, NewCredential, PlatformId};
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

struct Env {
    _dir: TempDir,
    config_path: String,
    db_path: String,
}

async fn setup() -> (Env, CastlineService) {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("config.toml");
    let db_path = dir.path().join("castline.db");
    let db_str = db_path.display().to_string().replace('\\', "/");
    fs::write(&config_path, format!("[database]\npath = \"{}\"\n", db_str)).unwrap();

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

async fn draft(service: &CastlineService, content: &str) -> String {
    service
        .posts()
        .create_post(NewPost::new("alice", content, vec![PlatformId::Twitter]))
        .await
        .unwrap()
        .id
}

fn cast_queue(env: &Env) -> Command {
    let mut cmd = Command::cargo_bin("cast-queue").unwrap();
    cmd.env("CASTLINE_CONFIG", &env.config_path)
        .env("CASTLINE_DB_PATH", &env.db_path)
        .env("CASTLINE_OWNER", "alice");
    cmd
}

fn stats(env: &Env) -> serde_json::Value {
    let output = cast_queue(env)
        .args(["stats", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).unwrap()
}

#[tokio::test]
async fn test_list_shows_drafts() {
    let (env, service) = setup().await;
    let id = draft(&service, "First draft").await;

    cast_queue(&env)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()))
        .stdout(predicate::str::contains("First draft"));

    let output = cast_queue(&env)
        .args(["list", "--status", "scheduled", "--format", "json"])
        .output()
        .unwrap();
    let posts: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(posts.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_schedule_then_clear() {
    let (env, service) = setup().await;
    let id = draft(&service, "Timing").await;

    cast_queue(&env)
        .args(["update", &id, "--at", "2h"])
        .assert()
        .success()
        .stdout(predicate::str::contains("scheduled"));
    assert_eq!(stats(&env)["delayed"], 1);

    cast_queue(&env)
        .args(["update", &id, "--clear-schedule", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"draft\""));
    assert_eq!(stats(&env)["delayed"], 0);
}

#[tokio::test]
async fn test_now_queues_immediate_job() {
    let (env, service) = setup().await;
    let id = draft(&service, "Right away").await;

    cast_queue(&env)
        .args(["now", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("publishing"));
    assert_eq!(stats(&env)["waiting"], 1);

    cast_queue(&env)
        .args(["update", &id, "--content", "too late to edit"])
        .assert()
        .code(1);
}

#[tokio::test]
async fn test_delete_then_show_not_found() {
    let (env, service) = setup().await;
    let id = draft(&service, "Short lived").await;

    cast_queue(&env).args(["delete", &id]).assert().success();
    cast_queue(&env)
        .args(["show", &id])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Not found"));
}

#[tokio::test]
async fn test_other_owner_cannot_see_post() {
    let (env, service) = setup().await;
    let id = draft(&service, "Private").await;

    cast_queue(&env)
        .env("CASTLINE_OWNER", "mallory")
        .args(["show", &id])
        .assert()
        .code(3);
}

#[tokio::test]
async fn test_show_text_output() {
    let (env, service) = setup().await;
    let id = draft(&service, "Look at me").await;

    cast_queue(&env)
        .args(["show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Status:    draft"))
        .stdout(predicate::str::contains("Look at me"));
}

#[tokio::test]
async fn test_stats_empty_queue() {
    let (env, _service) = setup().await;
    let stats = stats(&env);
    for key in ["waiting", "active", "completed", "failed", "delayed"] {
        assert_eq!(stats[key], 0, "{key}");
    }
}

#[tokio::test]
async fn test_requeue_unknown_job() {
    let (env, _service) = setup().await;
    cast_queue(&env)
        .args(["requeue", "no-such-job"])
        .assert()
        .code(3);
}

#[tokio::test]
async fn test_owner_required() {
    let (env, _service) = setup().await;
    cast_queue(&env)
        .env_remove("CASTLINE_OWNER")
        .arg("list")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("--owner"));
}
