//! FIFO of uploaded bundles awaiting a build
//!
//! A single mutex guards both reads and writes. `try_dequeue` fails with
//! [`Error::EmptyQueue`] on underflow; `dequeue` parks until an id arrives.

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct UploadQueue {
    items: Mutex<VecDeque<String>>,
    available: Notify,
}

impl UploadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enqueue(&self, site_id: impl Into<String>) {
        let site_id = site_id.into();
        debug!("Enqueued bundle for site {}", site_id);
        self.items.lock().await.push_back(site_id);
        self.available.notify_one();
    }

    /// Pop the head of the queue without waiting
    pub async fn try_dequeue(&self) -> Result<String> {
        self.items.lock().await.pop_front().ok_or(Error::EmptyQueue)
    }

    /// Pop the head of the queue, waiting for an enqueue if it is empty.
    ///
    /// Cancel-safe: dropping the future never loses an item.
    pub async fn dequeue(&self) -> String {
        loop {
            let notified = self.available.notified();
            if let Some(site_id) = self.items.lock().await.pop_front() {
                return site_id;
            }
            notified.await;
        }
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}
