//! JSON-RPC wire types for the steemd `call` protocol.
//!
//! Requests go out as
//! `{"id":N,"json_rpc":"2.0","method":"call","params":[api,method,args]}`
//! (keys sorted, no whitespace). Incoming frames are either a response
//! carrying `result`/`error` for an `id`, or a push notification
//! `{"method":"notice","params":[subscription_id,[params...]]}`.

use serde::Serialize;
use serde_json::Value;

use crate::transport::SubscriptionId;

/// A single `call` request. Field order is the sorted key order of the wire format.
#[derive(Debug, Clone, Serialize)]
pub struct CallRequest<'a> {
    pub id: u64,
    pub json_rpc: &'static str,
    pub method: &'static str,
    pub params: (&'a str, &'a str, &'a Value),
}

impl<'a> CallRequest<'a> {
    pub fn new(id: u64, api: &'a str, method: &'a str, args: &'a Value) -> Self {
        Self {
            id,
            json_rpc: "2.0",
            method: "call",
            params: (api, method, args),
        }
    }

    /// Encode as a compact JSON text frame.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A classified incoming frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Successful response for a pending call.
    Result { id: u64, result: Value },
    /// Error response for a pending call.
    Error { id: u64, error: Value },
    /// Server push addressed to a notification subscription.
    Notice {
        subscription: SubscriptionId,
        params: Vec<Value>,
    },
    /// Valid JSON that fits none of the above.
    Unrecognized(Value),
}

impl Incoming {
    /// Parse and classify a text frame. Only invalid JSON is an `Err`.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let msg: Value = serde_json::from_str(text)?;
        Ok(Self::classify(msg))
    }

    fn classify(mut msg: Value) -> Self {
        let id = msg.get("id").and_then(Value::as_u64);
        if let Some(result) = msg.get_mut("result").map(Value::take) {
            return match id {
                Some(id) => Self::Result { id, result },
                None => Self::Unrecognized(msg),
            };
        }
        if let Some(error) = msg.get_mut("error").map(Value::take) {
            return match id {
                Some(id) => Self::Error { id, error },
                None => Self::Unrecognized(msg),
            };
        }
        if msg.get("method").and_then(Value::as_str) == Some("notice") {
            if let Some([sub, params]) = msg.get("params").and_then(Value::as_array).map(Vec::as_slice) {
                if let (Some(sub), Some(params)) = (sub.as_u64(), params.as_array()) {
                    return Self::Notice {
                        subscription: SubscriptionId(sub),
                        params: params.clone(),
                    };
                }
            }
        }
        Self::Unrecognized(msg)
    }
}
