//! In-process notification of thread updates.
//!
//! The ingestion worker publishes a [`ThreadActivity`] after every message
//! it appends; consumers such as a change stream subscribe instead of
//! polling the store.

use crate::{MessageId, ThreadId, Timestamp, WorkspaceId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default number of buffered events per subscriber
pub const DEFAULT_ACTIVITY_CAPACITY: usize = 1024;

/// A thread received a new message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadActivity {
    pub workspace_id: WorkspaceId,
    pub thread_id: ThreadId,
    pub message_id: MessageId,
    pub occurred_at: Timestamp,
}

/// Broadcast channel for [`ThreadActivity`]
#[derive(Debug, Clone)]
pub struct ThreadActivityBus {
    sender: broadcast::Sender<ThreadActivity>,
}

impl ThreadActivityBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to current subscribers; returns how many received it
    pub fn publish(&self, activity: ThreadActivity) -> usize {
        self.sender.send(activity).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ThreadActivity> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ThreadActivityBus {
    fn default() -> Self {
        Self::new(DEFAULT_ACTIVITY_CAPACITY)
    }
}

#[cfg(test)]
#[path = "activity_tests.rs"]
mod tests;
