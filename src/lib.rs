//! DSX market data client library
//!
//! This crate provides a long-lived client for the DSX market data server:
//! a length-prefixed, optionally gzip'd JSON protocol over one TCP
//! connection, with synchronous request/response calls, subscriptions
//! dispatched from a background receive loop, login, heartbeat and
//! automatic reconnection.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod protocol;

pub use client::{Dataser, KlineQuery, Market, StockQuery, TransListQuery};
pub use crate::config::Config;
pub use connection::{Connection, ConnectionState, Mode, ReconnectPolicy};
pub use error::{DataserError, Result};
pub use metrics::ClientMetrics;
pub use protocol::{ApiRequest, ApiResult, Delivery, Subscription};
