//! Client order ID correlation between local submissions and stream updates.
//!
//! Orders are keyed by client order id. A submitted order is tracked from the
//! moment it is sent; the REST acknowledgment and the stream may arrive in
//! either order:
//!
//! 1. Submit: `track_submitted` registers the order as `Pending`
//! 2. Either:
//!    a. REST ack arrives first -> exchange id is attached
//!    b. Stream update arrives first -> the merged snapshot replaces the record,
//!       and the late ack only fills in what is still missing
//! 3. The first terminal update moves the order into history exactly once;
//!    later duplicates are reported as such and never re-applied.

use crate::order::{Order, OrderAck, OrderStatus};
use std::collections::HashMap;
use uuid::Uuid;

/// Prefix for client order ids generated by the market maker.
pub const CLIENT_ORDER_PREFIX: &str = "mm";

/// Generate a unique client order ID with a prefix.
///
/// Format: `{prefix}_{uuid}` where uuid is a v4 UUID in simple format (no hyphens).
pub fn generate_client_order_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().as_simple())
}

/// Result of feeding a stream update into the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryUpdate {
    /// No client order id: placed outside this process.
    Manual,
    /// Terminal state was already processed for this order.
    Duplicate,
    /// Order is (still) open.
    Active,
    /// First terminal update; the order left the active set.
    Terminal(Order),
}

/// Active and historical orders keyed by client order id.
#[derive(Debug, Default)]
pub struct OrderRegistry {
    active: HashMap<String, Order>,
    history: HashMap<String, Order>,
}

impl OrderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an order right before it is sent.
    ///
    /// Returns `false` if the id is already known.
    pub fn track_submitted(&mut self, order: Order) -> bool {
        let id = &order.client_order_id;
        if self.active.contains_key(id) || self.history.contains_key(id) {
            return false;
        }
        self.active.insert(id.clone(), order);
        true
    }

    /// Attach a REST acknowledgment.
    ///
    /// Never overwrites data that already came from the stream, and never
    /// retires an order: terminal state is only taken from the stream.
    pub fn on_ack(&mut self, ack: &OrderAck) -> bool {
        let Some(order) = self.active.get_mut(&ack.client_order_id) else {
            return false;
        };

        if order.order_id.is_none() {
            order.order_id = Some(ack.order_id.clone());
        }
        if order.status == OrderStatus::Pending && !ack.status.is_terminal() {
            order.status = ack.status;
            order.updated_at_ms = order.updated_at_ms.max(ack.timestamp_ms);
        }
        true
    }

    /// Forget an order whose submission failed.
    pub fn discard(&mut self, client_order_id: &str) -> Option<Order> {
        self.active.remove(client_order_id)
    }

    /// Apply a merged order snapshot from the stream.
    pub fn apply_update(&mut self, order: Order) -> RegistryUpdate {
        if order.is_manual() {
            return RegistryUpdate::Manual;
        }

        let id = order.client_order_id.clone();
        if self.history.contains_key(&id) {
            return RegistryUpdate::Duplicate;
        }

        if order.is_terminal() {
            self.active.remove(&id);
            self.history.insert(id, order.clone());
            RegistryUpdate::Terminal(order)
        } else {
            self.active.insert(id, order);
            RegistryUpdate::Active
        }
    }

    pub fn get(&self, client_order_id: &str) -> Option<&Order> {
        self.active.get(client_order_id)
    }

    pub fn historical(&self, client_order_id: &str) -> Option<&Order> {
        self.history.get(client_order_id)
    }

    /// Client ids of every open order.
    pub fn client_ids(&self) -> Vec<String> {
        self.active.keys().cloned().collect()
    }

    pub fn active_orders(&self) -> impl Iterator<Item = &Order> {
        self.active.values()
    }

    /// Drop the oldest historical entries beyond `max_len`.
    ///
    /// Call this periodically to bound memory in long sessions.
    pub fn trim_history(&mut self, max_len: usize) {
        if self.history.len() <= max_len {
            return;
        }
        let mut stamps: Vec<(i64, String)> = self
            .history
            .iter()
            .map(|(id, o)| (o.updated_at_ms, id.clone()))
            .collect();
        stamps.sort();
        let excess = self.history.len() - max_len;
        for (_, id) in stamps.into_iter().take(excess) {
            self.history.remove(&id);
        }
    }

    /// Get the number of open orders.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Check if there are no open orders.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_order(client_order_id: &str, status: OrderStatus) -> Order {
        let mut order = Order::pending(
            client_order_id.into(),
            "XBTUSD".into(),
            dec!(10),
            Some(dec!(9999)),
            1000,
        );
        order.status = status;
        order
    }

    fn make_ack(client_order_id: &str) -> OrderAck {
        OrderAck {
            order_id: "ex-1".into(),
            client_order_id: client_order_id.into(),
            status: OrderStatus::New,
            timestamp_ms: 2000,
        }
    }

    #[test]
    fn test_generate_client_order_id() {
        let id1 = generate_client_order_id(CLIENT_ORDER_PREFIX);
        let id2 = generate_client_order_id(CLIENT_ORDER_PREFIX);

        assert!(id1.starts_with("mm_"));
        assert_eq!(id1.len(), 3 + 32);
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_normal_flow_ack_first() {
        let mut registry = OrderRegistry::new();
        assert!(registry.track_submitted(make_order("a", OrderStatus::Pending)));
        assert!(!registry.track_submitted(make_order("a", OrderStatus::Pending)));

        assert!(registry.on_ack(&make_ack("a")));
        let order = registry.get("a").unwrap();
        assert_eq!(order.order_id.as_deref(), Some("ex-1"));
        assert_eq!(order.status, OrderStatus::New);
    }

    #[test]
    fn test_stream_first_then_late_ack() {
        let mut registry = OrderRegistry::new();
        registry.track_submitted(make_order("a", OrderStatus::Pending));

        let mut streamed = make_order("a", OrderStatus::PartiallyFilled);
        streamed.order_id = Some("ex-1".into());
        streamed.filled_volume = dec!(4);
        assert_eq!(registry.apply_update(streamed.clone()), RegistryUpdate::Active);

        registry.on_ack(&make_ack("a"));
        assert_eq!(registry.get("a"), Some(&streamed));
    }

    #[test]
    fn test_terminal_removed_exactly_once() {
        let mut registry = OrderRegistry::new();
        registry.track_submitted(make_order("a", OrderStatus::Pending));

        let filled = make_order("a", OrderStatus::Filled);
        assert_eq!(
            registry.apply_update(filled.clone()),
            RegistryUpdate::Terminal(filled.clone())
        );
        assert!(registry.is_empty());

        assert_eq!(registry.apply_update(filled.clone()), RegistryUpdate::Duplicate);
        assert_eq!(
            registry.apply_update(make_order("a", OrderStatus::New)),
            RegistryUpdate::Duplicate
        );
        assert!(registry.is_empty());
        assert_eq!(registry.history_len(), 1);
    }

    #[test]
    fn test_unseen_order_arriving_terminal() {
        let mut registry = OrderRegistry::new();
        let canceled = make_order("b", OrderStatus::Canceled);

        assert_eq!(
            registry.apply_update(canceled.clone()),
            RegistryUpdate::Terminal(canceled)
        );
        assert!(registry.historical("b").is_some());
    }

    #[test]
    fn test_manual_orders_ignored() {
        let mut registry = OrderRegistry::new();
        assert_eq!(
            registry.apply_update(make_order("", OrderStatus::Filled)),
            RegistryUpdate::Manual
        );
        assert_eq!(registry.history_len(), 0);
    }

    #[test]
    fn test_ack_never_retires_order() {
        let mut registry = OrderRegistry::new();
        registry.track_submitted(make_order("a", OrderStatus::Pending));

        let mut ack = make_ack("a");
        ack.status = OrderStatus::Filled;
        registry.on_ack(&ack);

        assert_eq!(registry.get("a").unwrap().status, OrderStatus::Pending);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_trim_history_keeps_newest() {
        let mut registry = OrderRegistry::new();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            let mut order = make_order(id, OrderStatus::Canceled);
            order.updated_at_ms = i as i64;
            registry.apply_update(order);
        }

        registry.trim_history(2);
        assert_eq!(registry.history_len(), 2);
        assert!(registry.historical("a").is_none());
        assert!(registry.historical("c").is_some());
    }
}
