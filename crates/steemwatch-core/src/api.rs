//! Dynamic API proxy and typed accessors for the node APIs SteemWatch uses.
//!
//! Any `(api, method, args)` triple can be issued through [`ApiHandle`]
//! without declaring the method up front. [`DatabaseApi`] and
//! [`BlockInfoApi`] wrap the handful of methods the streams depend on.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TransportError;
use crate::transport::{RpcClient, SubscriptionId};

/// Arguments of one call: positional or keyword, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum CallArgs {
    Positional(Vec<Value>),
    Keyword(Map<String, Value>),
}

impl CallArgs {
    /// Build from both argument forms, rejecting calls that supply both.
    pub fn new(args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Self, TransportError> {
        match (args.is_empty(), kwargs.is_empty()) {
            (false, false) => Err(TransportError::InvalidArguments(
                "cannot specify positional and keyword arguments simultaneously".into(),
            )),
            (true, false) => Ok(Self::Keyword(kwargs)),
            _ => Ok(Self::Positional(args)),
        }
    }

    pub fn none() -> Self {
        Self::Positional(Vec::new())
    }

    /// The `args` element of the wire `params`. Keyword arguments travel
    /// as a single object inside the positional list.
    pub fn into_value(self) -> Value {
        match self {
            Self::Positional(args) => Value::Array(args),
            Self::Keyword(kwargs) => Value::Array(vec![Value::Object(kwargs)]),
        }
    }
}

impl From<Vec<Value>> for CallArgs {
    fn from(args: Vec<Value>) -> Self {
        Self::Positional(args)
    }
}

impl From<Map<String, Value>> for CallArgs {
    fn from(kwargs: Map<String, Value>) -> Self {
        Self::Keyword(kwargs)
    }
}

/// A named API namespace on the node. Every method name is accepted.
#[derive(Clone)]
pub struct ApiHandle {
    client: Arc<dyn RpcClient>,
    api: String,
}

impl ApiHandle {
    pub fn new(client: Arc<dyn RpcClient>, api: impl Into<String>) -> Self {
        Self {
            client,
            api: api.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.api
    }

    pub fn client(&self) -> &Arc<dyn RpcClient> {
        &self.client
    }

    /// Issue `self.api.method(args)`.
    pub async fn call(
        &self,
        method: &str,
        args: impl Into<CallArgs>,
    ) -> Result<Value, TransportError> {
        self.client
            .call(&self.api, method, args.into().into_value())
            .await
    }

    /// Call a method and deserialize the result.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        args: impl Into<CallArgs>,
    ) -> Result<T, TransportError> {
        let result = self.call(method, args).await?;
        serde_json::from_value(result).map_err(TransportError::Deserialization)
    }
}

impl std::fmt::Debug for ApiHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiHandle")
            .field("api", &self.api)
            .field("url", &self.client.url())
            .finish()
    }
}

/// The subset of `get_dynamic_global_properties` SteemWatch reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicGlobalProperties {
    pub head_block_number: u64,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Typed accessors for `database_api`.
#[derive(Debug, Clone)]
pub struct DatabaseApi(ApiHandle);

impl DatabaseApi {
    pub const NAME: &'static str = "database_api";

    pub fn new(client: Arc<dyn RpcClient>) -> Self {
        Self(ApiHandle::new(client, Self::NAME))
    }

    pub fn handle(&self) -> &ApiHandle {
        &self.0
    }

    pub async fn get_dynamic_global_properties(
        &self,
    ) -> Result<DynamicGlobalProperties, TransportError> {
        self.0
            .call_as("get_dynamic_global_properties", CallArgs::none())
            .await
    }

    /// Fetch one block; `None` when the node does not have it yet.
    pub async fn get_block(&self, block_num: u64) -> Result<Option<Value>, TransportError> {
        let block = self.0.call("get_block", vec![Value::from(block_num)]).await?;
        Ok((!block.is_null()).then_some(block))
    }

    /// Fetch the history entries of `account` with index at most `from`,
    /// `limit + 1` entries at most, as `(index, op)` pairs.
    pub async fn get_account_history(
        &self,
        account: &str,
        from: u64,
        limit: u64,
    ) -> Result<Vec<(u64, Value)>, TransportError> {
        self.0
            .call_as(
                "get_account_history",
                vec![Value::from(account), Value::from(from), Value::from(limit)],
            )
            .await
    }

    /// Ask the node to push every applied block header to `subscription`.
    pub async fn set_block_applied_callback(
        &self,
        subscription: SubscriptionId,
    ) -> Result<Value, TransportError> {
        self.0
            .call("set_block_applied_callback", vec![Value::from(subscription.0)])
            .await
    }
}

/// Typed accessors for `block_info_api`.
#[derive(Debug, Clone)]
pub struct BlockInfoApi(ApiHandle);

impl BlockInfoApi {
    pub const NAME: &'static str = "block_info_api";

    pub fn new(client: Arc<dyn RpcClient>) -> Self {
        Self(ApiHandle::new(client, Self::NAME))
    }

    /// Bulk-fetch up to `count` consecutive blocks starting at `start`.
    /// The node returns fewer when the range runs past its head.
    pub async fn get_blocks_with_info(
        &self,
        start: u64,
        count: u64,
    ) -> Result<Vec<Value>, TransportError> {
        let mut kwargs = Map::new();
        kwargs.insert("start_block_num".into(), start.into());
        kwargs.insert("count".into(), count.into());
        self.0.call_as("get_blocks_with_info", kwargs).await
    }
}
