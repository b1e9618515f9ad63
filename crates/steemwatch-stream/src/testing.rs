//! In-memory node used by the stream tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use steemwatch_core::transport::{NotificationCallback, RpcClient, SubscriptionId};
use steemwatch_core::TransportError;

/// A chain whose blocks `1..=head` exist, plus one account's history.
#[derive(Default)]
pub(crate) struct MockNode {
    head: Mutex<u64>,
    history: Mutex<Vec<Value>>,
    calls: Mutex<Vec<(String, String, Value)>>,
    subscriptions: Mutex<HashMap<SubscriptionId, NotificationCallback>>,
    subscriptions_cleared: Notify,
    applied_target: Mutex<Option<SubscriptionId>>,
    next_sub: AtomicU64,
    failing: Mutex<Option<String>>,
    overrides: Mutex<HashMap<String, Value>>,
}

impl MockNode {
    pub(crate) fn with_head(head: u64) -> Arc<Self> {
        let node = Self::default();
        *node.head.lock().unwrap() = head;
        Arc::new(node)
    }

    pub(crate) fn with_history(ops: usize) -> Arc<Self> {
        let node = Self::default();
        *node.history.lock().unwrap() = (0..ops).map(|i| json!({"op": i})).collect();
        Arc::new(node)
    }

    pub(crate) fn header(num: u64) -> Value {
        json!({
            "previous": format!("{:08x}{}", num - 1, "0".repeat(32)),
            "witness": "initminer",
        })
    }

    /// Produce the next block and push its header to the applied-block target.
    pub(crate) fn produce_block(&self) -> u64 {
        let num = self.add_block_silently();
        let target = *self.applied_target.lock().unwrap();
        let callback = target.and_then(|id| self.subscriptions.lock().unwrap().get(&id).cloned());
        if let Some(callback) = callback {
            callback(vec![Self::header(num)]);
        }
        num
    }

    /// Produce the next block without any notification.
    pub(crate) fn add_block_silently(&self) -> u64 {
        let mut head = self.head.lock().unwrap();
        *head += 1;
        *head
    }

    /// Forget all subscriptions, as a reconnect does.
    pub(crate) fn drop_subscriptions(&self) {
        self.subscriptions.lock().unwrap().clear();
        self.subscriptions_cleared.notify_waiters();
    }

    /// Make every call to `method` fail with an RPC error.
    pub(crate) fn fail(&self, method: &str) {
        *self.failing.lock().unwrap() = Some(method.to_string());
    }

    /// Stop failing calls.
    pub(crate) fn recover(&self) {
        *self.failing.lock().unwrap() = None;
    }

    /// Answer `method` with a fixed value.
    pub(crate) fn reply(&self, method: &str, value: Value) {
        self.overrides.lock().unwrap().insert(method.to_string(), value);
    }

    pub(crate) fn count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, m, _)| m == method)
            .count()
    }

    pub(crate) fn args_of(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, m, _)| m == method)
            .map(|(_, _, args)| args.clone())
            .collect()
    }

    fn answer(&self, method: &str, args: &Value) -> Value {
        let head = *self.head.lock().unwrap();
        match method {
            "get_dynamic_global_properties" => json!({"head_block_number": head}),
            "get_block" => {
                let num = args[0].as_u64().unwrap();
                if (1..=head).contains(&num) {
                    Self::header(num)
                } else {
                    Value::Null
                }
            }
            "get_blocks_with_info" => {
                let start = args[0]["start_block_num"].as_u64().unwrap();
                let count = args[0]["count"].as_u64().unwrap();
                let end = (start + count).min(head + 1);
                (start.max(1)..end)
                    .map(|n| json!({"block": Self::header(n)}))
                    .collect()
            }
            "set_block_applied_callback" => {
                let id = SubscriptionId(args[0].as_u64().unwrap());
                *self.applied_target.lock().unwrap() = Some(id);
                Value::Null
            }
            "get_account_history" => {
                let history = self.history.lock().unwrap();
                let from = args[1].as_u64().unwrap();
                let limit = args[2].as_u64().unwrap();
                if history.is_empty() {
                    return json!([]);
                }
                let last = from.min(history.len() as u64 - 1);
                let first = last.saturating_sub(limit);
                (first..=last)
                    .rev()
                    .map(|i| json!([i, history[i as usize]]))
                    .collect()
            }
            other => panic!("mock node has no method {other}"),
        }
    }
}

#[async_trait]
impl RpcClient for MockNode {
    async fn call(&self, api: &str, method: &str, args: Value) -> Result<Value, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((api.to_string(), method.to_string(), args.clone()));
        if self.failing.lock().unwrap().as_deref() == Some(method) {
            return Err(TransportError::Rpc(json!({"message": format!("{method} failed")})));
        }
        if let Some(value) = self.overrides.lock().unwrap().get(method) {
            return Ok(value.clone());
        }
        Ok(self.answer(method, &args))
    }

    fn register_notification(&self, callback: NotificationCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_sub.fetch_add(1, Ordering::Relaxed) + 1);
        self.subscriptions.lock().unwrap().insert(id, callback);
        id
    }

    fn is_registered(&self, id: SubscriptionId) -> bool {
        self.subscriptions.lock().unwrap().contains_key(&id)
    }

    async fn subscription_lost(&self, id: SubscriptionId) {
        loop {
            let cleared = self.subscriptions_cleared.notified();
            tokio::pin!(cleared);
            cleared.as_mut().enable();
            if !self.is_registered(id) {
                return;
            }
            cleared.await;
        }
    }

    async fn wait_connected(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn url(&self) -> &str {
        "mock://node"
    }
}
