//! Service layer for Castline
//!
//! `CastlineService` is the single entry point the command-line tools build
//! on. It opens the database once and wires the queue, the publication
//! handler, the worker pool and the post operations around it:
//!
//! - `PostService`: create, edit, delete and publish posts
//! - `ValidationService`: content checks against platform limits
//! - `EventBus`: progress events from the handler and worker
//!
//! # Example
//!
//! ```no_run
//! use libcastline::service::CastlineService;
//! use libcastline::service::posts::NewPost;
//! use libcastline::PlatformId;
//!
//! # async fn example() -> libcastline::Result<()> {
//! let service = CastlineService::new().await?;
//!
//! let post = service
//!     .posts()
//!     .create_post(NewPost::new("alice", "Hello world", vec![PlatformId::Twitter]))
//!     .await?;
//! service.posts().publish_now(&post.id, "alice").await?;
//!
//! let summary = service.worker().run_once().await?;
//! println!("published {}", summary.published);
//! service.close().await;
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod posts;
pub mod validation;

use std::sync::Arc;
use std::time::Duration;

use self::events::{EventBus, EventReceiver};
use self::posts::PostService;
use self::validation::ValidationService;
use crate::config::{resolve_db_path, Config};
use crate::credentials::{CredentialStore, SqliteCredentialStore};
use crate::db::Database;
use crate::error::Result;
use crate::handler::PublicationHandler;
use crate::platforms::PublisherRegistry;
use crate::queue::JobQueue;
use crate::worker::Worker;

/// Main service facade
///
/// Every component shares the one `Database` pool. Clones are cheap and
/// point at the same pool and event bus.
#[derive(Clone)]
pub struct CastlineService {
    config: Arc<Config>,
    db: Database,
    credentials: SqliteCredentialStore,
    queue: JobQueue,
    handler: PublicationHandler,
    posts: PostService,
    validation: ValidationService,
    event_bus: EventBus,
}

impl CastlineService {
    /// Load configuration from the default location and open the database
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        Self::from_config(config).await
    }

    /// Open the configured database with HTTP publishers for every enabled platform
    pub async fn from_config(config: Config) -> Result<Self> {
        let publishers = PublisherRegistry::from_config(&config.platforms)?;
        Self::with_publishers(config, publishers).await
    }

    /// Open the configured database with a caller-supplied publisher registry
    ///
    /// Credentials are still read from the database.
    pub async fn with_publishers(config: Config, publishers: PublisherRegistry) -> Result<Self> {
        let db = Database::new(&resolve_db_path(&config.database.path)).await?;
        let credentials = SqliteCredentialStore::new(db.clone());
        Ok(Self::assemble(
            config,
            db,
            credentials.clone(),
            Arc::new(credentials),
            publishers,
        ))
    }

    /// Wire an already-open database with injected collaborators
    ///
    /// The publication pipeline reads credentials from `credential_source`;
    /// `credentials()` still manages the rows stored in `db`.
    pub fn with_collaborators(
        config: Config,
        db: Database,
        credential_source: Arc<dyn CredentialStore>,
        publishers: PublisherRegistry,
    ) -> Self {
        let credentials = SqliteCredentialStore::new(db.clone());
        Self::assemble(config, db, credentials, credential_source, publishers)
    }

    fn assemble(
        config: Config,
        db: Database,
        credentials: SqliteCredentialStore,
        credential_source: Arc<dyn CredentialStore>,
        publishers: PublisherRegistry,
    ) -> Self {
        let event_bus = EventBus::default();
        let validation = ValidationService::new();
        let queue = JobQueue::new(db.clone(), &config.queue);
        let handler = PublicationHandler::new(
            db.clone(),
            Arc::clone(&credential_source),
            publishers,
            Duration::from_secs(config.queue.adapter_timeout_secs),
            event_bus.clone(),
        );
        let posts = PostService::new(
            db.clone(),
            queue.clone(),
            credential_source,
            validation.clone(),
        );

        Self {
            config: Arc::new(config),
            db,
            credentials,
            queue,
            handler,
            posts,
            validation,
            event_bus,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn posts(&self) -> &PostService {
        &self.posts
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn handler(&self) -> &PublicationHandler {
        &self.handler
    }

    /// Credential rows for the operator tooling
    pub fn credentials(&self) -> &SqliteCredentialStore {
        &self.credentials
    }

    pub fn validation(&self) -> &ValidationService {
        &self.validation
    }

    /// Worker pool using the configured concurrency and poll interval
    pub fn worker(&self) -> Worker {
        self.worker_with(
            self.config.queue.concurrency,
            Duration::from_millis(self.config.queue.poll_interval_ms),
        )
    }

    pub fn worker_with(&self, concurrency: usize, poll_interval: Duration) -> Worker {
        Worker::new(
            self.db.clone(),
            self.queue.clone(),
            self.handler.clone(),
            self.event_bus.clone(),
            concurrency,
            poll_interval,
        )
    }

    pub fn events(&self) -> &EventBus {
        &self.event_bus
    }

    /// Subscribe to progress events; multiple subscribers are supported
    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }

    /// Close the connection pool; pending writes finish first
    pub async fn close(&self) {
        self.db.close().await;
    }
}
