//! Result channels published by the scheduler.
//!
//! One broadcast channel per [`EventKind`]. Successful results and failures
//! travel on the same channel; [`ScrapeEvent::channel`] gives the public
//! name (`toc` or `toc:error`). There is no replay: events published while
//! nobody listens are dropped.

use std::collections::HashMap;

use tokio::sync::broadcast;
use tracing::debug;

use super::error::JobError;
use super::handler::ScrapeResult;
use crate::models::EventKind;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum ScrapeEvent {
    Result {
        job_name: String,
        result: ScrapeResult,
    },
    Failed {
        job_name: String,
        error: JobError,
    },
}

impl ScrapeEvent {
    pub fn job_name(&self) -> &str {
        match self {
            Self::Result { job_name, .. } | Self::Failed { job_name, .. } => job_name,
        }
    }

    /// Public channel name of this event on `kind`.
    pub fn channel(&self, kind: EventKind) -> String {
        match self {
            Self::Result { .. } => kind.as_str().to_string(),
            Self::Failed { .. } => kind.error_name(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    senders: HashMap<EventKind, broadcast::Sender<ScrapeEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let senders = EventKind::ALL
            .into_iter()
            .map(|kind| (kind, broadcast::channel(capacity.max(1)).0))
            .collect();
        Self { senders }
    }

    pub fn subscribe(&self, kind: EventKind) -> broadcast::Receiver<ScrapeEvent> {
        self.senders[&kind].subscribe()
    }

    /// Publish an event; returns how many subscribers received it.
    pub fn publish(&self, kind: EventKind, event: ScrapeEvent) -> usize {
        let channel = event.channel(kind);
        match self.senders[&kind].send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!(channel, "No subscribers, event dropped");
                0
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
