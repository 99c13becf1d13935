//! Event system for publication progress
//!
//! An in-process event bus that distributes progress events to subscribers
//! without blocking the handler or the worker.
//!
//! # Architecture
//!
//! The bus wraps `tokio::sync::broadcast`. The publication handler and the
//! worker emit; any number of subscribers (`cast-send --events`, tests)
//! consume. With no subscribers events are dropped immediately, and a lagging
//! subscriber loses its oldest events rather than slowing emitters down.
//!
//! # Example
//!
//! ```no_run
//! use libcastline::service::events::{Event, EventBus};
//!
//! # async fn example() {
//! let event_bus = EventBus::new(100);
//! let mut receiver = event_bus.subscribe();
//!
//! event_bus.emit(Event::PublishStarted {
//!     post_id: "abc123".to_string(),
//!     job_id: "job-1".to_string(),
//!     platforms: vec!["twitter".to_string()],
//! });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("{}", serde_json::to_string(&event).unwrap());
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::PlatformResult;

/// Event receiver type alias
pub type EventReceiver = broadcast::Receiver<Event>;

/// Event bus for distributing progress events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus
    ///
    /// * `capacity` - Buffer capacity per subscriber (recommended: 100)
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: Event) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Events emitted while jobs run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The handler passed its guards and is calling adapters
    PublishStarted {
        post_id: String,
        job_id: String,
        platforms: Vec<String>,
    },

    /// One adapter call settled
    PlatformSettled {
        post_id: String,
        result: PlatformResult,
    },

    /// At least one platform succeeded; the post is published
    PublishCompleted {
        post_id: String,
        attempt: i64,
        results: Vec<PlatformResult>,
    },

    /// Every platform failed
    PublishFailed {
        post_id: String,
        attempt: i64,
        results: Vec<PlatformResult>,
    },

    /// The queue will run the job again
    JobRetryScheduled {
        job_id: String,
        post_id: String,
        attempt: u32,
        next_run_at_ms: i64,
    },

    /// The job was abandoned and kept as a dead letter
    JobDeadLettered {
        job_id: String,
        post_id: String,
        reason: String,
    },
}
