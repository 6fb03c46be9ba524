//! Connection and dispatch counters

use prometheus::{IntCounter, Registry};

use crate::error::Result;

/// Prometheus counters for one client connection
#[derive(Debug, Clone)]
pub struct ClientMetrics {
    pub frames_received: IntCounter,
    pub frames_dropped: IntCounter,
    pub callbacks_dispatched: IntCounter,
    pub reconnect_attempts: IntCounter,
    pub heartbeats_sent: IntCounter,
}

impl ClientMetrics {
    /// Create unregistered counters
    pub fn new() -> Result<Self> {
        Ok(Self {
            frames_received: IntCounter::new(
                "dsx_frames_received_total",
                "Frames read by the receive loop",
            )?,
            frames_dropped: IntCounter::new(
                "dsx_frames_dropped_total",
                "Frames dropped for protocol errors or missing registrations",
            )?,
            callbacks_dispatched: IntCounter::new(
                "dsx_callbacks_dispatched_total",
                "Responses handed to subscription callbacks",
            )?,
            reconnect_attempts: IntCounter::new(
                "dsx_reconnect_attempts_total",
                "Reconnect attempts after timeouts or malformed frames",
            )?,
            heartbeats_sent: IntCounter::new("dsx_heartbeats_sent_total", "Heartbeat requests sent")?,
        })
    }

    /// Register every counter with `registry`
    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.frames_received.clone()))?;
        registry.register(Box::new(self.frames_dropped.clone()))?;
        registry.register(Box::new(self.callbacks_dispatched.clone()))?;
        registry.register(Box::new(self.reconnect_attempts.clone()))?;
        registry.register(Box::new(self.heartbeats_sent.clone()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_exposes_counters() {
        let metrics = ClientMetrics::new().unwrap();
        let registry = Registry::new();
        metrics.register(&registry).unwrap();

        metrics.frames_received.inc();
        metrics.reconnect_attempts.inc_by(2);

        let families = registry.gather();
        let reconnects = families
            .iter()
            .find(|f| f.get_name() == "dsx_reconnect_attempts_total")
            .unwrap();
        assert_eq!(reconnects.get_metric()[0].get_counter().get_value(), 2.0);
    }

    #[test]
    fn test_double_registration_fails() {
        let metrics = ClientMetrics::new().unwrap();
        let registry = Registry::new();
        metrics.register(&registry).unwrap();
        assert!(metrics.register(&registry).is_err());
    }
}
