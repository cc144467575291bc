//! In-memory speech queue.
//!
//! Producers with the push capability enqueue messages; the overlay (or
//! any puller) drains them in FIFO order. The queue is deliberately not
//! persistent: on restart stale shout-outs are worth less than a clean
//! slate.

use crate::error::{Error, Result};
use crate::metrics;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::debug;
use uuid::Uuid;

/// Hard cap on queued messages; pushes beyond this are rejected.
const QUEUE_CAP: usize = 256;

/// One queued message.
#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    pub queued_at: i64,
}

/// FIFO queue of pending speech messages.
#[derive(Default)]
pub struct SpeechQueue {
    inner: Mutex<VecDeque<QueueItem>>,
}

impl SpeechQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a message, assigning it a short id.
    pub fn push(&self, text: String, voice: Option<String>) -> Result<QueueItem> {
        let mut q = self.inner.lock();
        if q.len() >= QUEUE_CAP {
            return Err(Error::BadRequest("queue full".to_string()));
        }
        let item = QueueItem {
            id: Uuid::new_v4().simple().to_string()[..8].to_string(),
            text,
            voice,
            queued_at: chrono::Utc::now().timestamp(),
        };
        q.push_back(item.clone());
        metrics::set_queue_depth(q.len());
        debug!(id = %item.id, depth = q.len(), "queued message");
        Ok(item)
    }

    /// Remove and return the oldest message.
    pub fn pull(&self) -> Option<QueueItem> {
        let mut q = self.inner.lock();
        let item = q.pop_front();
        metrics::set_queue_depth(q.len());
        item
    }

    /// Return the oldest message without removing it.
    pub fn peek(&self) -> Option<QueueItem> {
        self.inner.lock().front().cloned()
    }

    /// Delete a message by id. Returns whether it was present.
    pub fn delete(&self, id: &str) -> bool {
        let mut q = self.inner.lock();
        let before = q.len();
        q.retain(|item| item.id != id);
        let removed = q.len() != before;
        metrics::set_queue_depth(q.len());
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
