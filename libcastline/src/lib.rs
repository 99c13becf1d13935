//! Castline - scheduled publishing to social networks
//!
//! This library holds the scheduled-publication pipeline behind the
//! `cast-*` command-line tools: the post store, a durable job queue, the
//! publication handler that fans a post out to every target platform, and
//! the worker pool that drives it.

pub mod ai;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod handler;
pub mod logging;
pub mod platforms;
pub mod queue;
pub mod scheduling;
pub mod service;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use credentials::{Credential, CredentialStore, NewCredential, SqliteCredentialStore};
pub use db::{Database, PostWithOutcomes};
pub use error::{CastError, PlatformError, Result};
pub use handler::{HandlerOutcome, PublicationHandler, PublishReport};
pub use queue::{Job, JobQueue, JobState, StalledJob};
pub use service::CastlineService;
pub use types::{PlatformId, PlatformResult, Post, PostOutcome, PostStatus, QueueStats};
pub use worker::{RunSummary, Worker};
