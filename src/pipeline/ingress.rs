//! Bounded ingress queue
//!
//! Single consumer per symbol. Overflow policy: drop the oldest depth
//! event, never a trade. Trades are authoritative; depth deltas self-heal
//! on the next snapshot. Drops are counted.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::metrics::PipelineMetrics;
use crate::types::{DepthSnapshot, DepthUpdate, RawTrade};

/// One event on the ingress path, in external arrival order
#[derive(Debug, Clone)]
pub enum IngressEvent {
    Trade(RawTrade),
    Depth(DepthUpdate),
    Snapshot(DepthSnapshot),
}

impl IngressEvent {
    fn is_droppable(&self) -> bool {
        matches!(self, IngressEvent::Depth(_))
    }
}

pub struct IngressQueue {
    inner: std::sync::Mutex<VecDeque<IngressEvent>>,
    notify: Notify,
    capacity: usize,
    metrics: Arc<PipelineMetrics>,
}

impl IngressQueue {
    pub fn new(capacity: usize, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            inner: std::sync::Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            metrics,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("ingress queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue an event, applying the overflow policy
    ///
    /// Returns false iff the event itself was dropped (only ever depth).
    pub fn push(&self, event: IngressEvent) -> bool {
        let mut queue = self.inner.lock().expect("ingress queue poisoned");
        if queue.len() >= self.capacity {
            // Make room by dropping the oldest depth event.
            let oldest_depth = queue.iter().position(|queued| queued.is_droppable());
            match oldest_depth {
                Some(index) => {
                    let _ = queue.remove(index);
                    self.metrics.record_depth_drop();
                }
                None => {
                    if event.is_droppable() {
                        // Queue is all trades/snapshots; the incoming depth
                        // loses instead.
                        self.metrics.record_depth_drop();
                        return false;
                    }
                    // Trades and snapshots are never dropped, even if the
                    // queue has to run past capacity.
                }
            }
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
        true
    }

    /// Dequeue the next event, waiting if the queue is empty
    pub async fn pop(&self) -> IngressEvent {
        loop {
            {
                let mut queue = self.inner.lock().expect("ingress queue poisoned");
                if let Some(event) = queue.pop_front() {
                    return event;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Non-blocking dequeue
    pub fn try_pop(&self) -> Option<IngressEvent> {
        self.inner
            .lock()
            .expect("ingress queue poisoned")
            .pop_front()
    }
}
