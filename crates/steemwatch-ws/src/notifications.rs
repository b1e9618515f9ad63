//! Notification subscription registry.
//!
//! Maps client-allocated subscription ids to callbacks. The node keeps its
//! side of every subscription per connection, so the whole table is
//! cleared on reconnect and owners must register again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{mpsc, watch};

use steemwatch_core::transport::{NotificationCallback, SubscriptionId};

/// A callback paired with the parameters it should be invoked with.
pub(crate) type Dispatch = (NotificationCallback, Vec<Value>);

/// Registry of active notification subscriptions.
#[derive(Clone)]
pub struct NotificationRegistry {
    entries: Arc<Mutex<HashMap<SubscriptionId, NotificationCallback>>>,
    next_id: Arc<AtomicU64>,
    /// Bumped by every [`clear`](Self::clear).
    cleared: Arc<watch::Sender<u64>>,
}

impl Default for NotificationRegistry {
    fn default() -> Self {
        Self {
            entries: Arc::default(),
            next_id: Arc::new(AtomicU64::new(1)),
            cleared: Arc::new(watch::channel(0).0),
        }
    }
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh id for `callback`. Ids are never reused, even
    /// across reconnects.
    pub fn register(&self, callback: NotificationCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().unwrap().insert(id, callback);
        id
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.lock().unwrap().contains_key(&id)
    }

    /// Resolve once `id` is gone from the registry.
    pub async fn removed(&self, id: SubscriptionId) {
        let mut clears = self.cleared.subscribe();
        while self.contains(id) {
            if clears.changed().await.is_err() {
                return;
            }
        }
    }

    /// Queue `params` for the callback registered under `id`.
    ///
    /// Returns `false` when `id` is unknown. The callback itself runs on
    /// the dispatcher task, not here.
    pub(crate) fn dispatch(
        &self,
        id: SubscriptionId,
        params: Vec<Value>,
        queue: &mpsc::UnboundedSender<Dispatch>,
    ) -> bool {
        let Some(callback) = self.entries.lock().unwrap().get(&id).cloned() else {
            return false;
        };
        if queue.send((callback, params)).is_err() {
            tracing::debug!(subscription = %id, "notification dispatcher gone, dropping notice");
        }
        true
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
        self.cleared.send_modify(|n| *n += 1);
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Returns `true` if there are no active subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Invoke queued callbacks one at a time, in the order they were queued.
pub(crate) async fn run_dispatcher(mut queue: mpsc::UnboundedReceiver<Dispatch>) {
    while let Some((callback, params)) = queue.recv().await {
        callback(params);
    }
}
