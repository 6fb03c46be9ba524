//! API requests and results
//!
//! One `ApiRequest` is one logical call: an action name, its outbound
//! parameters, how responses are delivered, and the last decoded result.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Action identifiers understood by the server (the envelope `act` field)
pub mod actions {
    pub const REGISTER: &str = "reg";
    pub const LOGIN: &str = "login";
    pub const HEARTBEAT: &str = "heart";
    pub const CATEGORY: &str = "category";
    pub const STOCKS: &str = "stocks";
    pub const QUOTES: &str = "quotes";
    pub const ALL_QUOTES: &str = "all_quotes";
    pub const KLINES: &str = "klines";
    pub const FINANCE: &str = "finance";
    pub const SHARE_BONUS: &str = "sharebonus";
    pub const FACTORS: &str = "factors";
    pub const TIME_SHARING: &str = "timesharing";
    pub const TRANS_LIST: &str = "translist";
}

/// Envelope field carrying the action name
pub const ACTION_FIELD: &str = "act";

/// Callback invoked with each decoded response for a subscription
pub type Callback = Arc<dyn Fn(&ApiResult) + Send + Sync>;

/// How responses reach the caller
#[derive(Clone)]
pub enum Delivery {
    /// Read inline on the calling flow and returned directly
    Immediate,
    /// Registered and handed to the callback by the receive loop
    Delivered(Callback),
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delivery::Immediate => write!(f, "Immediate"),
            Delivery::Delivered(_) => write!(f, "Delivered(<callback>)"),
        }
    }
}

/// Decoded server response: success flag, message and payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResult {
    #[serde(rename = "act", default)]
    pub action: String,

    #[serde(default = "default_success")]
    pub success: bool,

    #[serde(default, alias = "message")]
    pub msg: String,

    #[serde(default)]
    pub data: Value,

    /// The full decoded envelope
    #[serde(skip)]
    pub raw: Value,
}

fn default_success() -> bool {
    true
}

impl ApiResult {
    /// Interpret a decoded envelope. Fields that do not fit the result shape
    /// leave the envelope reachable through `raw`.
    pub fn from_envelope(envelope: Value) -> Self {
        match serde_json::from_value::<ApiResult>(envelope.clone()) {
            Ok(mut result) => {
                result.raw = envelope;
                result
            }
            Err(_) => Self {
                action: envelope
                    .get(ACTION_FIELD)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                success: true,
                msg: String::new(),
                data: envelope.get("data").cloned().unwrap_or(Value::Null),
                raw: envelope,
            },
        }
    }

    /// Client-side failure result
    pub fn failure(msg: impl Into<String>) -> Self {
        Self {
            action: String::new(),
            success: false,
            msg: msg.into(),
            data: Value::Null,
            raw: Value::Null,
        }
    }
}

/// A single logical call against the server
pub struct ApiRequest {
    action: String,
    params: Map<String, Value>,
    delivery: Delivery,
    result: RwLock<Option<ApiResult>>,
}

impl ApiRequest {
    pub fn new(action: impl Into<String>, params: Map<String, Value>, delivery: Delivery) -> Self {
        Self {
            action: action.into(),
            params,
            delivery,
            result: RwLock::new(None),
        }
    }

    pub fn immediate(action: impl Into<String>, params: Map<String, Value>) -> Self {
        Self::new(action, params, Delivery::Immediate)
    }

    pub fn delivered<F>(action: impl Into<String>, params: Map<String, Value>, callback: F) -> Self
    where
        F: Fn(&ApiResult) + Send + Sync + 'static,
    {
        Self::new(action, params, Delivery::Delivered(Arc::new(callback)))
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    /// Outbound envelope: the parameters plus the `act` field
    pub fn payload(&self) -> Value {
        let mut envelope = self.params.clone();
        envelope.insert(ACTION_FIELD.to_string(), Value::String(self.action.clone()));
        Value::Object(envelope)
    }

    /// Remember the latest decoded response
    pub fn record(&self, result: ApiResult) {
        *self.result.write().unwrap_or_else(PoisonError::into_inner) = Some(result);
    }

    pub fn last_result(&self) -> Option<ApiResult> {
        self.result
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record a response and hand it to the callback, if any.
    /// Returns whether a callback ran.
    pub fn deliver(&self, result: ApiResult) -> bool {
        self.record(result.clone());
        match &self.delivery {
            Delivery::Delivered(callback) => {
                callback(&result);
                true
            }
            Delivery::Immediate => false,
        }
    }
}

impl fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiRequest")
            .field("action", &self.action)
            .field("params", &self.params)
            .field("delivery", &self.delivery)
            .finish()
    }
}

/// Build a parameter map from `key => value` pairs, skipping `null`s
#[macro_export]
macro_rules! params {
    () => { ::serde_json::Map::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = ::serde_json::Map::new();
        $(
            let value = ::serde_json::to_value(&$value).unwrap_or(::serde_json::Value::Null);
            if !value.is_null() {
                map.insert($key.to_string(), value);
            }
        )+
        map
    }};
}
