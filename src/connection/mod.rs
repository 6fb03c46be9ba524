//! Connection management for the market data server
//!
//! Handles the TCP session, the background receive loop, and reconnection.

mod reconnect;
pub mod receiver;
mod session;

pub use receiver::LoopExit;
pub use reconnect::ReconnectPolicy;
pub use session::{Connection, ConnectionState, Mode};
