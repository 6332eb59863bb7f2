use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::Notify;

use crate::error::BrokerError;

/// One payload awaiting delivery to every listed subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxItem {
    targets: Vec<String>,
    data: Bytes,
}

impl InboxItem {
    /// Rejects empty target lists; an item always goes somewhere.
    pub fn new(targets: Vec<String>, data: impl Into<Bytes>) -> Result<Self, BrokerError> {
        if targets.is_empty() {
            return Err(BrokerError::EmptyTargets);
        }
        Ok(Self {
            targets,
            data: data.into(),
        })
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

/// Unbounded FIFO shared by the producing leg and the draining leg.
///
/// `pop` waits while the queue is empty and returns `None` only once the
/// queue is closed and drained.
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<InboxItem>,
    closed: bool,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, item: InboxItem) -> Result<(), BrokerError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(BrokerError::QueueClosed);
            }
            state.items.push_back(item);
        }
        self.notify.notify_one();
        Ok(())
    }

    pub async fn pop(&self) -> Option<InboxItem> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn try_pop(&self) -> Option<InboxItem> {
        self.lock().items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Stops accepting new items; queued items stay poppable.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
