//! API registry
//!
//! Maps an action name to the live request awaiting asynchronous dispatch.
//! Shared between the calling flow and the receive loop; at most one entry
//! per action, and a later registration replaces an earlier one.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use super::api::{ApiRequest, ApiResult};

/// Action name → live request
#[derive(Debug, Default)]
pub struct ApiRegistry {
    entries: RwLock<HashMap<String, Arc<ApiRequest>>>,
}

impl ApiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request under its action name, returning the one it replaced
    pub async fn register(&self, request: Arc<ApiRequest>) -> Option<Arc<ApiRequest>> {
        let action = request.action().to_string();
        let replaced = self.entries.write().await.insert(action.clone(), request);
        if replaced.is_some() {
            debug!(action = %action, "Replaced existing registration");
        }
        replaced
    }

    pub async fn lookup(&self, action: &str) -> Option<Arc<ApiRequest>> {
        self.entries.read().await.get(action).cloned()
    }

    /// Remove `request` if it is still the registration for its action.
    /// A handle that was already replaced leaves the newer entry alone.
    pub async fn remove(&self, request: &Arc<ApiRequest>) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(request.action()) {
            Some(current) if Arc::ptr_eq(current, request) => {
                entries.remove(request.action());
                true
            }
            _ => false,
        }
    }

    /// Put `request` back under its action unless something else has
    /// registered there since
    pub async fn reinstate(&self, request: Arc<ApiRequest>) -> bool {
        let mut entries = self.entries.write().await;
        if entries.contains_key(request.action()) {
            return false;
        }
        debug!(action = %request.action(), "Registration reinstated");
        entries.insert(request.action().to_string(), request);
        true
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Registered action names, sorted
    pub async fn actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self.entries.read().await.keys().cloned().collect();
        actions.sort();
        actions
    }
}

/// Handle to a live subscription
#[derive(Debug, Clone)]
pub struct Subscription {
    registry: Arc<ApiRegistry>,
    request: Arc<ApiRequest>,
}

impl Subscription {
    pub(crate) fn new(registry: Arc<ApiRegistry>, request: Arc<ApiRequest>) -> Self {
        Self { registry, request }
    }

    pub fn action(&self) -> &str {
        self.request.action()
    }

    /// Most recent response delivered to this subscription
    pub fn last_result(&self) -> Option<ApiResult> {
        self.request.last_result()
    }

    /// Stop future dispatch for this subscription. A dispatch that already
    /// looked the request up still completes.
    pub async fn cancel(&self) -> bool {
        let removed = self.registry.remove(&self.request).await;
        debug!(action = %self.request.action(), removed, "Subscription cancelled");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::api::actions;
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_request(action: &str, hits: &Arc<AtomicUsize>) -> Arc<ApiRequest> {
        let hits = hits.clone();
        Arc::new(ApiRequest::delivered(action, Map::new(), move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[tokio::test]
    async fn test_later_registration_wins() {
        let registry = ApiRegistry::new();
        let first_hits = Arc::new(AtomicUsize::new(0));
        let second_hits = Arc::new(AtomicUsize::new(0));

        let first = counting_request(actions::QUOTES, &first_hits);
        let second = counting_request(actions::QUOTES, &second_hits);

        assert!(registry.register(first.clone()).await.is_none());
        let replaced = registry.register(second.clone()).await.unwrap();
        assert!(Arc::ptr_eq(&replaced, &first));
        assert_eq!(registry.len().await, 1);

        let found = registry.lookup(actions::QUOTES).await.unwrap();
        found.deliver(ApiResult::from_envelope(json!({"act": "quotes"})));
        assert_eq!(first_hits.load(Ordering::SeqCst), 0);
        assert_eq!(second_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_handle_does_not_remove_newer_entry() {
        let registry = ApiRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let first = counting_request(actions::QUOTES, &hits);
        let second = counting_request(actions::QUOTES, &hits);

        registry.register(first.clone()).await;
        registry.register(second.clone()).await;

        assert!(!registry.remove(&first).await);
        assert!(registry.remove(&second).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_cancel_does_not_affect_dispatch_past_lookup() {
        let registry = Arc::new(ApiRegistry::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let request = counting_request(actions::TIME_SHARING, &hits);
        registry.register(request.clone()).await;
        let subscription = Subscription::new(registry.clone(), request);

        let in_flight = registry.lookup(actions::TIME_SHARING).await.unwrap();
        assert!(subscription.cancel().await);

        in_flight.deliver(ApiResult::from_envelope(json!({"act": "timesharing"})));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(registry.lookup(actions::TIME_SHARING).await.is_none());
        assert!(subscription.last_result().is_some());
    }

    #[tokio::test]
    async fn test_reinstate_only_into_vacant_slot() {
        let registry = ApiRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let subscription = counting_request(actions::QUOTES, &hits);
        let one_shot = counting_request(actions::QUOTES, &hits);

        registry.register(subscription.clone()).await;
        let displaced = registry.register(one_shot.clone()).await.unwrap();
        assert!(!registry.reinstate(displaced.clone()).await);

        assert!(registry.remove(&one_shot).await);
        assert!(registry.reinstate(displaced).await);
        let current = registry.lookup(actions::QUOTES).await.unwrap();
        assert!(Arc::ptr_eq(&current, &subscription));
    }

    #[tokio::test]
    async fn test_actions_sorted() {
        let registry = ApiRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        registry.register(counting_request(actions::QUOTES, &hits)).await;
        registry.register(counting_request(actions::HEARTBEAT, &hits)).await;
        assert_eq!(registry.actions().await, vec!["heart", "quotes"]);
    }
}
