//! Reconnect policy
//!
//! Supervises the receive loop and rebuilds the connection after a read
//! timeout or malformed frame. Retries forever on a fixed delay with no
//! backoff; a sustained outage keeps one attempt in flight per delay.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::receiver::{self, LoopExit};
use super::{Connection, ConnectionState};

/// Fixed-delay, unbounded reconnection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Drive the receive loop until it stops for good, rebuilding the
    /// connection whenever the loop asks for it.
    pub async fn supervise(self, conn: Connection) {
        info!("Receive loop started");

        loop {
            match receiver::run(&conn).await {
                LoopExit::Stopped => {
                    debug!("Receive loop stopped by close");
                    break;
                }
                LoopExit::Close(reason) => {
                    warn!(reason = %reason, "Closing connection without reconnect");
                    conn.teardown().await;
                    break;
                }
                LoopExit::Reconnect(reason) => {
                    warn!(reason = %reason, delay_ms = self.delay.as_millis() as u64, "Connection degraded, reconnecting");
                    if !self.reestablish(&conn).await {
                        break;
                    }
                }
            }
        }

        conn.release_stream().await;
        info!("Receive loop exited");
    }

    /// Tear the session down and rebuild it, retrying on the fixed delay.
    /// Returns false if the connection was closed explicitly meanwhile.
    pub async fn reestablish(&self, conn: &Connection) -> bool {
        let mut attempt: u64 = 0;

        loop {
            conn.teardown().await;
            conn.release_stream().await;
            conn.set_state(ConnectionState::Reconnecting);

            sleep(self.delay).await;

            if conn.is_halted() {
                debug!("Connection closed during reconnect delay");
                return false;
            }

            attempt += 1;
            conn.metrics().reconnect_attempts.inc();

            match conn.reopen().await {
                Ok(()) => {
                    info!(attempt, "Reconnected");
                    return true;
                }
                Err(_) if conn.is_halted() => {
                    debug!("Connection closed during reconnect attempt");
                    return false;
                }
                Err(e) => {
                    warn!(
                        attempt,
                        error = %e,
                        delay_ms = self.delay.as_millis() as u64,
                        "Reconnect attempt failed"
                    );
                }
            }
        }
    }
}
