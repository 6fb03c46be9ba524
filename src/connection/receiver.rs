//! Receive loop
//!
//! Runs in async mode only, one instance per connection. Frames are
//! processed strictly in arrival order; each one is dispatched to the
//! request registered under its action name.

use serde_json::Value;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use super::Connection;
use crate::error::DataserError;
use crate::metrics::ClientMetrics;
use crate::protocol::frame::{self, HeaderRead};
use crate::protocol::{ApiRegistry, ApiResult, ACTION_FIELD};

/// Why a receive loop instance stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// The closing flag was raised
    Stopped,
    /// Read timeout or malformed frame; the connection should be rebuilt
    Reconnect(String),
    /// Remote close or fatal I/O error; close without reconnecting
    Close(String),
}

/// Read and dispatch frames until the loop has to stop
pub async fn run(conn: &Connection) -> LoopExit {
    let mut closing = conn.closing_signal();
    let read_timeout = conn.config().read_timeout();

    loop {
        let closed = *closing.borrow_and_update();
        if closed {
            return LoopExit::Stopped;
        }

        let mut guard = conn.reader().lock().await;
        let Some(reader) = guard.as_mut() else {
            return LoopExit::Stopped;
        };

        let read = tokio::select! {
            _ = closing_raised(&mut closing) => return LoopExit::Stopped,
            read = timeout(read_timeout, frame::read_header(reader)) => read,
        };

        let header = match read {
            Err(_) => {
                warn!(
                    timeout_ms = read_timeout.as_millis() as u64,
                    "No frame within read timeout"
                );
                return LoopExit::Reconnect(format!("read timed out after {:?}", read_timeout));
            }
            Ok(Err(e)) => {
                error!(error = %e, "Read failed");
                return LoopExit::Close(e.to_string());
            }
            Ok(Ok(HeaderRead::Closed)) => {
                info!("Server closed the connection");
                return LoopExit::Close("closed by remote".to_string());
            }
            Ok(Ok(HeaderRead::Malformed(reason))) => {
                warn!(reason = %reason, "Malformed frame header");
                return LoopExit::Reconnect(reason);
            }
            Ok(Ok(HeaderRead::Frame(header))) => header,
        };

        conn.set_compression(header.compressed);

        let body = match timeout(read_timeout, frame::read_body(reader, header.body_len)).await {
            Ok(Ok(body)) => body,
            Ok(Err(DataserError::Io(e))) => {
                error!(error = %e, "Read failed");
                return LoopExit::Close(e.to_string());
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Truncated frame body");
                return LoopExit::Reconnect(e.to_string());
            }
            Err(_) => {
                warn!(body_len = header.body_len, "Frame body not completed within read timeout");
                return LoopExit::Reconnect(format!("read timed out after {:?}", read_timeout));
            }
        };
        drop(guard);

        conn.metrics().frames_received.inc();

        match frame::decode_body(&header, &body) {
            Ok(envelope) => {
                dispatch(conn.registry(), conn.metrics(), envelope).await;
            }
            Err(e) => {
                conn.metrics().frames_dropped.inc();
                warn!(error = %e, body_len = header.body_len, "Dropping undecodable frame");
            }
        }
    }
}

/// Hand one decoded envelope to the request registered for its action.
/// Returns whether a callback ran.
pub async fn dispatch(registry: &ApiRegistry, metrics: &ClientMetrics, envelope: Value) -> bool {
    let action = match envelope.get(ACTION_FIELD).and_then(Value::as_str) {
        Some(action) => action.to_string(),
        None => {
            metrics.frames_dropped.inc();
            warn!("Dropping frame without action field");
            return false;
        }
    };

    let Some(request) = registry.lookup(&action).await else {
        metrics.frames_dropped.inc();
        trace!(action = %action, "No registration for action");
        return false;
    };

    let delivered = request.deliver(ApiResult::from_envelope(envelope));
    if delivered {
        metrics.callbacks_dispatched.inc();
        trace!(action = %action, "Response dispatched");
    } else {
        debug!(action = %action, "Registration has no callback");
    }
    delivered
}

async fn closing_raised(signal: &mut watch::Receiver<bool>) {
    loop {
        let closing = *signal.borrow_and_update();
        if closing {
            return;
        }
        if signal.changed().await.is_err() {
            return;
        }
    }
}
