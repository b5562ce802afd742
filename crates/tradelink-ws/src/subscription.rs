//! Topic subscription registry.
//!
//! Subscriptions survive disconnects and are re-sent in insertion order on
//! every successful open.

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;
use tradelink_core::Subscription;

#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<Vec<Subscription>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a topic. An existing topic keeps its position and
    /// takes the new params. Returns true when the topic is new.
    pub fn add(&self, topic: &str, params: Option<Value>) -> bool {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.iter_mut().find(|s| s.topic == topic) {
            existing.params = params;
            debug!(topic, "Updated subscription params");
            return false;
        }
        entries.push(Subscription::new(topic, params));
        debug!(topic, total = entries.len(), "Added subscription");
        true
    }

    /// Returns true when the topic was registered.
    pub fn remove(&self, topic: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|s| s.topic != topic);
        before != entries.len()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.entries.read().iter().any(|s| s.topic == topic)
    }

    /// Snapshot in insertion order.
    pub fn list(&self) -> Vec<Subscription> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insertion_order_preserved() {
        let registry = SubscriptionRegistry::new();
        registry.add("trading", None);
        registry.add("prices", Some(json!({"symbols": ["BTC"]})));
        registry.add("alerts", None);

        let topics: Vec<_> = registry.list().into_iter().map(|s| s.topic).collect();
        assert_eq!(topics, vec!["trading", "prices", "alerts"]);
    }

    #[test]
    fn test_resubscribe_replaces_params_in_place() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.add("trading", None));
        assert!(registry.add("prices", Some(json!({"symbols": ["BTC"]}))));
        assert!(!registry.add("trading", Some(json!({"account": "a1"}))));

        let list = registry.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].topic, "trading");
        assert_eq!(list[0].params, Some(json!({"account": "a1"})));
    }

    #[test]
    fn test_remove_and_clear() {
        let registry = SubscriptionRegistry::new();
        registry.add("trading", None);
        registry.add("prices", None);

        assert!(registry.remove("trading"));
        assert!(!registry.remove("trading"));
        assert!(!registry.contains("trading"));
        assert_eq!(registry.len(), 1);

        registry.clear();
        assert!(registry.is_empty());
    }
}
