//! In-process signal queues
//!
//! Hand finished work from the monitors to post-processing and promotion.
//! The store remains the source of truth; anything lost with the process is
//! picked up again by orphan recovery.

use parking_lot::Mutex;
use pubflow_types::{ContentItemId, PublicationRequestId, ReductionTaskId};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unbounded FIFO with a cancellation-aware `dequeue`
#[derive(Debug)]
pub struct SignalQueue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> SignalQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub fn enqueue(&self, item: T) {
        self.items.lock().push_back(item);
        self.notify.notify_one();
    }

    pub fn try_dequeue(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Wait for the next item; `None` once `cancel` fires
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Option<T> {
        loop {
            if let Some(item) = self.try_dequeue() {
                return Some(item);
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T> Default for SignalQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Requests whose reductions finished and await post-processing
pub type PostProcessQueue = SignalQueue<PublicationRequestId>;

/// Work ready to be promoted
pub type GoLiveQueue = SignalQueue<GoLiveSignal>;

/// A unit of promotion work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoLiveSignal {
    /// A confirmed publication request
    Publication {
        request: PublicationRequestId,
        content_item: ContentItemId,
    },
    /// A reduction queued by a selection-group edit
    SelectionGroup {
        task: ReductionTaskId,
        content_item: ContentItemId,
    },
}

impl GoLiveSignal {
    pub fn content_item(&self) -> ContentItemId {
        match self {
            GoLiveSignal::Publication { content_item, .. }
            | GoLiveSignal::SelectionGroup { content_item, .. } => *content_item,
        }
    }

    /// Identity used to drop duplicate signals
    pub fn key(&self) -> Uuid {
        match self {
            GoLiveSignal::Publication { request, .. } => *request.as_uuid(),
            GoLiveSignal::SelectionGroup { task, .. } => *task.as_uuid(),
        }
    }
}

/// Queues and wake-ups shared by every pipeline stage
///
/// Owned by the composition root and handed to each component by clone.
#[derive(Debug, Clone, Default)]
pub struct PipelineSignals {
    pub post_process: Arc<PostProcessQueue>,
    pub go_live: Arc<GoLiveQueue>,
    /// Wakes the reduction monitor ahead of its poll timer
    pub reduction_wake: Arc<Notify>,
    /// Wakes the publication monitor ahead of its poll timer
    pub publication_wake: Arc<Notify>,
}

impl PipelineSignals {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = SignalQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(3);

        let cancel = CancellationToken::new();
        assert_eq!(queue.dequeue(&cancel).await, Some(1));
        assert_eq!(queue.dequeue(&cancel).await, Some(2));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_enqueue() {
        let queue = Arc::new(SignalQueue::new());
        let cancel = CancellationToken::new();

        let consumer = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.dequeue(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue("ready");
        assert_eq!(consumer.await.unwrap(), Some("ready"));
    }

    #[tokio::test]
    async fn test_dequeue_honors_cancel() {
        let queue: SignalQueue<u32> = SignalQueue::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), queue.dequeue(&cancel)).await;
        assert_eq!(result.unwrap(), None);
    }
}
