//! Block waiter: await a block number becoming available on the node.
//!
//! The waiter subscribes to the node's "block applied" push and keeps a
//! registry of block numbers somebody is waiting for. A push only means
//! "poll again": a read replica may still lag behind the notification, so
//! [`BlockWaiter::get_block`] loops until the poll actually returns the block.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::time;
use tokio_util::sync::CancellationToken;

use steemwatch_core::api::DatabaseApi;
use steemwatch_core::transport::{RpcClient, SubscriptionId};

use crate::error::StreamError;
use crate::header::block_num_from_header;

/// Configuration for [`BlockWaiter`].
#[derive(Debug, Clone, Default)]
pub struct WaiterConfig {
    /// Re-poll after this long even without a notification. `None` waits
    /// for the notification indefinitely.
    pub repoll_interval: Option<Duration>,
    /// Cancels any wait in progress with [`StreamError::Cancelled`].
    pub cancel: CancellationToken,
}

/// Block number → latched wake-up event. An entry lives only while
/// somebody waits on it.
#[derive(Default)]
struct WaitRegistry {
    events: Mutex<HashMap<u64, watch::Sender<bool>>>,
}

impl WaitRegistry {
    fn subscribe(self: &Arc<Self>, block_num: u64) -> WaitTicket {
        let rx = self
            .events
            .lock()
            .unwrap()
            .entry(block_num)
            .or_insert_with(|| watch::channel(false).0)
            .subscribe();
        WaitTicket {
            registry: Arc::clone(self),
            block_num,
            rx: Some(rx),
        }
    }

    /// Wake everybody waiting on `block_num` and drop the entry.
    fn signal(&self, block_num: u64) -> bool {
        match self.events.lock().unwrap().remove(&block_num) {
            Some(tx) => {
                tx.send_replace(true);
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

/// One caller's registration in the [`WaitRegistry`]. Registering happens
/// before polling, so a signal that lands between a failed poll and the
/// wait is not lost.
struct WaitTicket {
    registry: Arc<WaitRegistry>,
    block_num: u64,
    rx: Option<watch::Receiver<bool>>,
}

impl WaitTicket {
    async fn fired(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            let _ = rx.wait_for(|fired| *fired).await;
        }
    }
}

impl Drop for WaitTicket {
    fn drop(&mut self) {
        drop(self.rx.take());
        let mut events = self.registry.events.lock().unwrap();
        if events
            .get(&self.block_num)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            events.remove(&self.block_num);
        }
    }
}

fn signal_applied(registry: &WaitRegistry, header: Option<&Value>) {
    match header.and_then(block_num_from_header) {
        Some(block_num) => {
            if registry.signal(block_num) {
                tracing::trace!(block_num, "woke block waiters");
            }
        }
        None => tracing::warn!("block applied notice without a readable `previous` id"),
    }
}

/// Waits for specific block numbers using the node's block-applied push.
pub struct BlockWaiter {
    client: Arc<dyn RpcClient>,
    db: DatabaseApi,
    registry: Arc<WaitRegistry>,
    subscription: Mutex<Option<SubscriptionId>>,
    config: WaiterConfig,
}

impl BlockWaiter {
    pub fn new(client: Arc<dyn RpcClient>, config: WaiterConfig) -> Self {
        Self {
            db: DatabaseApi::new(client.clone()),
            client,
            registry: Arc::default(),
            subscription: Mutex::new(None),
            config,
        }
    }

    /// Register a notification subscription and point the node's
    /// block-applied push at it.
    pub async fn start(&self) -> Result<(), StreamError> {
        self.subscribe().await.map(|_| ())
    }

    async fn subscribe(&self) -> Result<SubscriptionId, StreamError> {
        let registry = Arc::clone(&self.registry);
        let id = self
            .client
            .register_notification(Arc::new(move |params: Vec<Value>| {
                signal_applied(&registry, params.first());
            }));
        self.db.set_block_applied_callback(id).await?;
        *self.subscription.lock().unwrap() = Some(id);
        tracing::debug!(subscription = %id, url = self.client.url(), "block applied push registered");
        Ok(id)
    }

    /// Handle one block-applied header: wake the waiters of the block it announces.
    pub fn on_block_applied(&self, header: &Value) {
        signal_applied(&self.registry, Some(header));
    }

    /// Number of block numbers with somebody waiting on them.
    pub fn pending_waits(&self) -> usize {
        self.registry.len()
    }

    /// Fetch `block_num`; when it does not exist yet and `wait` is set,
    /// suspend until a block-applied push for it arrives and poll again.
    ///
    /// A reconnect that drops the push subscription wakes the wait; the
    /// waiter then waits for the connection, polls and subscribes again.
    /// Without a `repoll_interval` this may wait forever on a stalled
    /// chain; use the configured cancellation token to bound it.
    pub async fn get_block(&self, block_num: u64, wait: bool) -> Result<Option<Value>, StreamError> {
        loop {
            let mut ticket = wait.then(|| self.registry.subscribe(block_num));
            if let Some(block) = self.db.get_block(block_num).await? {
                return Ok(Some(block));
            }
            let Some(ticket) = ticket.as_mut() else {
                return Ok(None);
            };
            let subscription = self.ensure_subscribed().await?;

            tracing::trace!(block_num, "waiting for block");
            let cancel = &self.config.cancel;
            let repoll = async {
                match self.config.repoll_interval {
                    Some(interval) => time::sleep(interval).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = ticket.fired() => {}
                _ = repoll => {}
                _ = self.client.subscription_lost(subscription) => {
                    tracing::info!(%subscription, block_num, "block applied subscription lost while waiting");
                    tokio::select! {
                        res = self.client.wait_connected() => res?,
                        _ = cancel.cancelled() => return Err(StreamError::Cancelled),
                    }
                }
                _ = cancel.cancelled() => return Err(StreamError::Cancelled),
            }
        }
    }

    /// (Re-)subscribe when never started or when a reconnect dropped the
    /// subscription.
    async fn ensure_subscribed(&self) -> Result<SubscriptionId, StreamError> {
        let current = *self.subscription.lock().unwrap();
        match current {
            Some(id) if self.client.is_registered(id) => Ok(id),
            Some(id) => {
                tracing::info!(subscription = %id, "block applied subscription lost, resubscribing");
                self.subscribe().await
            }
            None => self.subscribe().await,
        }
    }
}
