//! Worker pool tests: events, concurrency, timeouts and shutdown

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use libcastline::credentials::{NewCredential, SqliteCredentialStore};
use libcastline::handler::HandlerOutcome;
use libcastline::platforms::mock::MockPublisher;
use libcastline::platforms::PublisherRegistry;
use libcastline::service::events::{Event, EventBus};
use libcastline::service::posts::NewPost;
use libcastline::{
    CastlineService, Config, Database, PlatformError, PlatformId, PostStatus, PublicationHandler,
};
use tempfile::TempDir;

const OWNER: &str = "bob";

async fn open(dir: &TempDir) -> Result<(Config, Database, SqliteCredentialStore)> {
    let mut config = Config::default_config();
    config.database.path = dir.path().join("worker.db").to_string_lossy().into_owned();
    config.queue.poll_interval_ms = 20;

    let db = Database::new(&config.database.path).await?;
    let store = SqliteCredentialStore::new(db.clone());
    for platform in PlatformId::ALL {
        store
            .upsert_credential(NewCredential::bearer(OWNER, platform, "token"))
            .await?;
    }
    Ok((config, db, store))
}

async fn service_with(dir: &TempDir, registry: PublisherRegistry) -> Result<CastlineService> {
    let (config, db, store) = open(dir).await?;
    Ok(CastlineService::with_collaborators(
        config,
        db,
        Arc::new(store),
        registry,
    ))
}

async fn queue_post(service: &CastlineService, content: &str, platforms: Vec<PlatformId>) -> Result<String> {
    let post = service
        .posts()
        .create_post(NewPost::new(OWNER, content, platforms))
        .await?;
    service.posts().publish_now(&post.id, OWNER).await?;
    Ok(post.id)
}

#[tokio::test]
async fn test_events_follow_publication() -> Result<()> {
    let dir = TempDir::new()?;
    let twitter = MockPublisher::success(PlatformId::Twitter);
    let service = service_with(&dir, PublisherRegistry::new().with(Arc::new(twitter))).await?;
    let mut events = service.subscribe();

    let post_id = queue_post(&service, "watch me", vec![PlatformId::Twitter]).await?;
    service.worker().run_once().await?;

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }

    assert_eq!(received.len(), 3, "events: {received:?}");
    assert!(matches!(&received[0], Event::PublishStarted { post_id: id, .. } if *id == post_id));
    match &received[1] {
        Event::PlatformSettled { result, .. } => {
            assert_eq!(result.platform, PlatformId::Twitter);
            assert!(result.success);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(matches!(&received[2], Event::PublishCompleted { attempt: 1, .. }));
    Ok(())
}

#[tokio::test]
async fn test_failure_events_include_retry() -> Result<()> {
    let dir = TempDir::new()?;
    let twitter = MockPublisher::failure(
        PlatformId::Twitter,
        PlatformError::Posting("over capacity".to_string()),
    );
    let service = service_with(&dir, PublisherRegistry::new().with(Arc::new(twitter))).await?;
    let mut events = service.subscribe();

    let post_id = queue_post(&service, "retry me", vec![PlatformId::Twitter]).await?;
    service.worker().run_once().await?;

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }

    assert!(received
        .iter()
        .any(|e| matches!(e, Event::PublishFailed { post_id: id, .. } if *id == post_id)));
    let retry = received
        .iter()
        .find_map(|e| match e {
            Event::JobRetryScheduled { attempt, next_run_at_ms, .. } => Some((*attempt, *next_run_at_ms)),
            _ => None,
        })
        .expect("retry event");
    assert_eq!(retry.0, 1);
    assert!(retry.1 > chrono::Utc::now().timestamp_millis());
    Ok(())
}

#[tokio::test]
async fn test_jobs_run_concurrently() -> Result<()> {
    let dir = TempDir::new()?;
    let twitter = MockPublisher::with_delay(PlatformId::Twitter, Duration::from_millis(400));
    let service = service_with(&dir, PublisherRegistry::new().with(Arc::new(twitter.clone()))).await?;

    for i in 0..3 {
        queue_post(&service, &format!("post {i}"), vec![PlatformId::Twitter]).await?;
    }

    let started = Instant::now();
    let summary = service
        .worker_with(3, Duration::from_millis(20))
        .run_once()
        .await?;

    assert_eq!(summary.published, 3);
    assert_eq!(twitter.call_count(), 3);
    assert!(started.elapsed() < Duration::from_millis(1100));
    Ok(())
}

#[tokio::test]
async fn test_slow_adapter_times_out_without_blocking_others() -> Result<()> {
    let dir = TempDir::new()?;
    let (config, db, store) = open(&dir).await?;
    let slow = MockPublisher::with_delay(PlatformId::LinkedIn, Duration::from_secs(5));
    let fast = MockPublisher::success(PlatformId::Twitter);
    let registry = PublisherRegistry::new()
        .with(Arc::new(slow))
        .with(Arc::new(fast));

    let store: Arc<SqliteCredentialStore> = Arc::new(store);
    let service = CastlineService::with_collaborators(config, db.clone(), store.clone(), registry.clone());
    let handler = PublicationHandler::new(
        db,
        store,
        registry,
        Duration::from_millis(50),
        EventBus::default(),
    );

    let post_id = queue_post(
        &service,
        "slow and fast",
        vec![PlatformId::Twitter, PlatformId::LinkedIn],
    )
    .await?;
    let job = service.queue().claim_next().await?.unwrap();

    let started = Instant::now();
    let outcome = handler.handle(&job).await?;
    assert!(started.elapsed() < Duration::from_secs(2));

    let HandlerOutcome::Published(report) = outcome else {
        panic!("expected partial publish, got {outcome:?}");
    };
    let timed_out = report
        .results
        .iter()
        .find(|r| r.platform == PlatformId::LinkedIn)
        .unwrap();
    assert!(!timed_out.success);
    assert_eq!(timed_out.error.as_deref(), Some("Timed out after 50ms"));

    let stored = service.posts().get_post(&post_id, OWNER).await?;
    assert_eq!(stored.post.status, PostStatus::Published);
    Ok(())
}

#[tokio::test]
async fn test_run_until_shutdown() -> Result<()> {
    let dir = TempDir::new()?;
    let twitter = MockPublisher::success(PlatformId::Twitter);
    let service = service_with(&dir, PublisherRegistry::new().with(Arc::new(twitter))).await?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let worker = service.worker();
    let flag = Arc::clone(&shutdown);
    let running = tokio::spawn(async move { worker.run(flag).await });

    let post_id = queue_post(&service, "daemon", vec![PlatformId::Twitter]).await?;

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let post = service.posts().get_post(&post_id, OWNER).await?.post;
        if post.status == PostStatus::Published {
            break;
        }
        assert!(Instant::now() < deadline, "post was never published");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    shutdown.store(true, Ordering::Relaxed);
    let summary = tokio::time::timeout(Duration::from_secs(5), running).await???;
    assert_eq!(summary.published, 1);
    Ok(())
}

#[tokio::test]
async fn test_stalled_job_is_redelivered() -> Result<()> {
    let dir = TempDir::new()?;
    let (mut config, db, store) = open(&dir).await?;
    config.queue.lease_secs = 0;
    let twitter = MockPublisher::success(PlatformId::Twitter);
    let service = CastlineService::with_collaborators(
        config,
        db,
        Arc::new(store),
        PublisherRegistry::new().with(Arc::new(twitter.clone())),
    );

    let post_id = queue_post(&service, "orphaned", vec![PlatformId::Twitter]).await?;
    // A worker that claims and then dies leaves the job active.
    assert!(service.queue().claim_next().await?.is_some());
    tokio::time::sleep(Duration::from_millis(10)).await;

    let summary = service.worker().run_once().await?;
    assert_eq!(summary.published, 1);
    assert_eq!(twitter.call_count(), 1);
    let post = service.posts().get_post(&post_id, OWNER).await?.post;
    assert_eq!(post.status, PostStatus::Published);
    Ok(())
}

#[tokio::test]
async fn test_stalled_job_out_of_attempts_fails_post() -> Result<()> {
    let dir = TempDir::new()?;
    let (mut config, db, store) = open(&dir).await?;
    config.queue.lease_secs = 0;
    config.queue.max_attempts = 1;
    let twitter = MockPublisher::success(PlatformId::Twitter);
    let service = CastlineService::with_collaborators(
        config,
        db,
        Arc::new(store),
        PublisherRegistry::new().with(Arc::new(twitter.clone())),
    );
    let mut events = service.subscribe();

    let post_id = queue_post(&service, "crashed mid-run", vec![PlatformId::Twitter]).await?;
    // The worker claimed the job, marked the post and died.
    let job = service.queue().claim_next().await?.expect("due job");
    assert!(service.database().mark_publishing(&post_id, &job.id).await?);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let summary = service.worker().run_once().await?;
    assert_eq!(summary.dead_lettered, 1);
    assert_eq!(twitter.call_count(), 0);

    let post = service.posts().get_post(&post_id, OWNER).await?.post;
    assert_eq!(post.status, PostStatus::Failed);
    assert_eq!(post.job_id, None);
    assert!(matches!(
        events.try_recv()?,
        Event::JobDeadLettered { job_id, reason, .. } if job_id == job.id && reason == "lease expired"
    ));

    // The post can be recovered by hand
    service.posts().requeue_dead(&job.id).await?;
    let summary = service.worker().run_once().await?;
    assert_eq!(summary.published, 1);
    let post = service.posts().get_post(&post_id, OWNER).await?.post;
    assert_eq!(post.status, PostStatus::Published);
    Ok(())
}

#[tokio::test]
async fn test_stalled_failed_post_can_be_republished() -> Result<()> {
    let dir = TempDir::new()?;
    let (mut config, db, store) = open(&dir).await?;
    config.queue.lease_secs = 0;
    config.queue.max_attempts = 1;
    let service = CastlineService::with_collaborators(
        config,
        db,
        Arc::new(store),
        PublisherRegistry::new().with(Arc::new(MockPublisher::success(PlatformId::Twitter))),
    );

    let post_id = queue_post(&service, "try again", vec![PlatformId::Twitter]).await?;
    let job = service.queue().claim_next().await?.expect("due job");
    service.database().mark_publishing(&post_id, &job.id).await?;
    tokio::time::sleep(Duration::from_millis(10)).await;
    service.worker().run_once().await?;

    let post = service.posts().publish_now(&post_id, OWNER).await?;
    assert_eq!(post.status, PostStatus::Publishing);
    assert_eq!(service.worker().run_once().await?.published, 1);
    Ok(())
}

#[tokio::test]
async fn test_worker_prunes_old_completed_jobs() -> Result<()> {
    let dir = TempDir::new()?;
    let twitter = MockPublisher::success(PlatformId::Twitter);
    let service = service_with(&dir, PublisherRegistry::new().with(Arc::new(twitter))).await?;

    queue_post(&service, "keep for a week", vec![PlatformId::Twitter]).await?;
    service.worker().run_once().await?;
    assert_eq!(service.queue().stats().await.completed, 1);

    // A later run inside the retention window keeps the row
    service.worker().run_once().await?;
    assert_eq!(service.queue().stats().await.completed, 1);

    sqlx::query("UPDATE jobs SET updated_at = updated_at - 8 * 86400")
        .execute(service.database().pool())
        .await?;
    service.worker().run_once().await?;
    assert_eq!(service.queue().stats().await.completed, 0);
    Ok(())
}
