//! Per-table accumulators for the authenticated stream.
//!
//! Deltas are merged field by field into the last known row for the same
//! key. Orders are keyed by exchange order id, positions by symbol, and the
//! margin table is a single record.

use crate::parser::{Action, OrderDelta, Table};
use bitmex_rest::{MarginRow, OrderRow, PositionRow};
use execution_core::{BalanceSnapshot, OrderStatus, PositionSnapshot};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

/// Terminal order ids remembered after eviction.
const RETIRED_CAPACITY: usize = 1024;

/// An order row after merging one delta.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedOrder {
    pub row: OrderRow,
    /// The delta itself reported `Filled`.
    pub filled_now: bool,
    pub raw: Value,
}

#[derive(Debug)]
pub struct UserTables {
    orders: HashMap<String, OrderRow>,
    positions: HashMap<String, PositionRow>,
    margin: Option<MarginRow>,
    retired: RetiredOrders,
}

impl Default for UserTables {
    fn default() -> Self {
        Self::new()
    }
}

impl UserTables {
    pub fn new() -> Self {
        Self::with_retired_capacity(RETIRED_CAPACITY)
    }

    pub fn with_retired_capacity(capacity: usize) -> Self {
        Self {
            orders: HashMap::new(),
            positions: HashMap::new(),
            margin: None,
            retired: RetiredOrders::new(capacity),
        }
    }

    /// Merge order deltas, returning the merged rows in arrival order.
    ///
    /// Rows that reach a terminal status are evicted after merging and their
    /// ids remembered; later deltas for a remembered id (a resubscribe
    /// `partial` replaying a fill, say) are dropped.
    pub fn apply_orders(&mut self, table: Table<OrderDelta>) -> Vec<MergedOrder> {
        let mut merged = Vec::with_capacity(table.rows.len());

        for OrderDelta { row, raw } in table.rows {
            if table.action == Action::Delete {
                self.orders.remove(&row.order_id);
                continue;
            }

            if self.retired.contains(&row.order_id) {
                debug!(order_id = %row.order_id, "Dropping delta for retired order");
                continue;
            }

            let filled_now = row.has_status(OrderStatus::Filled);
            let entry = self
                .orders
                .entry(row.order_id.clone())
                .or_insert_with(|| OrderRow {
                    order_id: row.order_id.clone(),
                    ..OrderRow::default()
                });
            entry.merge(row);
            let snapshot = entry.clone();

            if snapshot.status().is_some_and(|s| s.is_terminal()) {
                self.orders.remove(&snapshot.order_id);
                self.retired.insert(snapshot.order_id.clone());
            }

            merged.push(MergedOrder {
                row: snapshot,
                filled_now,
                raw,
            });
        }

        merged
    }

    pub fn apply_positions(&mut self, table: Table<PositionRow>) -> Vec<PositionSnapshot> {
        let mut snapshots = Vec::with_capacity(table.rows.len());

        for row in table.rows {
            if table.action == Action::Delete {
                self.positions.remove(&row.symbol);
                continue;
            }

            let entry = self
                .positions
                .entry(row.symbol.clone())
                .or_insert_with(|| PositionRow {
                    symbol: row.symbol.clone(),
                    ..PositionRow::default()
                });
            entry.merge(row);
            snapshots.push(entry.to_snapshot());
        }

        snapshots
    }

    pub fn apply_margin(&mut self, table: Table<MarginRow>) -> Vec<BalanceSnapshot> {
        if table.action == Action::Delete {
            self.margin = None;
            return Vec::new();
        }

        let mut snapshots = Vec::with_capacity(table.rows.len());
        for row in table.rows {
            let entry = self.margin.get_or_insert_with(MarginRow::default);
            entry.merge(row);
            snapshots.extend(entry.to_snapshot());
        }
        snapshots
    }

    pub fn order(&self, order_id: &str) -> Option<&OrderRow> {
        self.orders.get(order_id)
    }

    pub fn position(&self, symbol: &str) -> Option<&PositionRow> {
        self.positions.get(symbol)
    }

    pub fn open_orders(&self) -> usize {
        self.orders.len()
    }

    pub fn is_retired(&self, order_id: &str) -> bool {
        self.retired.contains(order_id)
    }
}

/// Bounded set of order ids, oldest forgotten first.
#[derive(Debug)]
struct RetiredOrders {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl RetiredOrders {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    fn contains(&self, order_id: &str) -> bool {
        self.ids.contains(order_id)
    }

    fn insert(&mut self, order_id: String) {
        if !self.ids.insert(order_id.clone()) {
            return;
        }
        self.order.push_back(order_id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }
}
