//! Subscription bookkeeping across relays.

use std::collections::HashSet;
use uuid::Uuid;

/// Generate a short unique subscription ID.
pub fn generate_subscription_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Tracks which relays carry a subscription and which have sent EOSE.
///
/// End-of-stored-events is reported once, when every relay still carrying the
/// subscription has sent EOSE and no relay is still connecting.
#[derive(Debug, Clone)]
pub struct SubscriptionTracker {
    pub id: String,
    relays: HashSet<String>,
    /// Asked to carry the subscription, not yet connected
    pending: HashSet<String>,
    eose_relays: HashSet<String>,
    eose_reported: bool,
}

impl SubscriptionTracker {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            relays: HashSet::new(),
            pending: HashSet::new(),
            eose_relays: HashSet::new(),
            eose_reported: false,
        }
    }

    pub fn add_relay(&mut self, relay_url: impl Into<String>) {
        self.relays.insert(relay_url.into());
    }

    pub fn add_pending(&mut self, relay_url: impl Into<String>) {
        self.pending.insert(relay_url.into());
    }

    /// A pending relay accepted the subscription.
    ///
    /// Returns `true` when this completes EOSE. A relay dropped while it was
    /// pending stays dropped.
    pub fn join_pending(&mut self, relay_url: &str) -> bool {
        if self.pending.remove(relay_url) {
            self.relays.insert(relay_url.to_string());
        }
        self.take_eose()
    }

    /// A pending relay could not be reached. Returns `true` when this completes EOSE.
    pub fn fail_pending(&mut self, relay_url: &str) -> bool {
        self.pending.remove(relay_url);
        self.eose_relays.remove(relay_url);
        self.take_eose()
    }

    /// Drop a relay (it closed the subscription or disconnected).
    ///
    /// Returns `true` when this completes EOSE for the remaining relays.
    pub fn remove_relay(&mut self, relay_url: &str) -> bool {
        self.relays.remove(relay_url);
        self.pending.remove(relay_url);
        self.eose_relays.remove(relay_url);
        self.take_eose()
    }

    /// Record EOSE from a relay. Returns `true` exactly once, when all relays are done.
    pub fn mark_eose(&mut self, relay_url: &str) -> bool {
        // Traffic can overtake the connect result, so pending relays count too
        if self.relays.contains(relay_url) || self.pending.contains(relay_url) {
            self.eose_relays.insert(relay_url.to_string());
        }
        self.take_eose()
    }

    pub fn all_eose(&self) -> bool {
        self.pending.is_empty()
            && !self.relays.is_empty()
            && self.relays.iter().all(|relay| self.eose_relays.contains(relay))
    }

    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// No relay carries the subscription and none is still connecting.
    pub fn is_empty(&self) -> bool {
        self.relays.is_empty() && self.pending.is_empty()
    }

    pub fn has_relay(&self, relay_url: &str) -> bool {
        self.relays.contains(relay_url)
    }

    fn take_eose(&mut self) -> bool {
        if self.eose_reported || !self.all_eose() {
            return false;
        }
        self.eose_reported = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_subscription_id() {
        let id1 = generate_subscription_id();
        let id2 = generate_subscription_id();
        assert_eq!(id1.len(), 12);
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_eose_reported_once_after_all_relays() {
        let mut tracker = SubscriptionTracker::new("sub1");
        tracker.add_relay("wss://a");
        tracker.add_relay("wss://b");

        assert!(!tracker.mark_eose("wss://a"));
        assert!(!tracker.mark_eose("wss://unknown"));
        assert!(tracker.mark_eose("wss://b"));
        assert!(!tracker.mark_eose("wss://b"));
        assert!(tracker.all_eose());
    }

    #[test]
    fn test_removing_silent_relay_completes_eose() {
        let mut tracker = SubscriptionTracker::new("sub1");
        tracker.add_relay("wss://a");
        tracker.add_relay("wss://b");

        assert!(!tracker.mark_eose("wss://a"));
        assert!(tracker.remove_relay("wss://b"));
        assert_eq!(tracker.relay_count(), 1);
        assert!(!tracker.has_relay("wss://b"));
    }

    #[test]
    fn test_pending_relays_hold_back_eose() {
        let mut tracker = SubscriptionTracker::new("sub1");
        tracker.add_relay("wss://a");
        tracker.add_pending("wss://b");
        tracker.add_pending("wss://c");

        assert!(!tracker.mark_eose("wss://a"));
        assert!(!tracker.mark_eose("wss://b"));
        assert!(!tracker.join_pending("wss://b"));
        assert_eq!(tracker.relay_count(), 2);
        assert!(tracker.fail_pending("wss://c"));
        assert!(!tracker.is_empty());
    }

    #[test]
    fn test_relay_closed_while_pending_does_not_join() {
        let mut tracker = SubscriptionTracker::new("sub1");
        tracker.add_pending("wss://a");

        assert!(!tracker.remove_relay("wss://a"));
        assert!(tracker.is_empty());
        assert!(!tracker.join_pending("wss://a"));
        assert!(!tracker.has_relay("wss://a"));
        assert!(tracker.is_empty());
    }
}
