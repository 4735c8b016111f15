//! Core execution types and utilities.
//!
//! This crate provides the fundamental types for order execution:
//!
//! - **Order types**: `Order`, `OrderSide`, `OrderStatus`, `OrderRequest`, `OrderAck`
//! - **Account events**: `UserEvent` as emitted by the authenticated stream
//! - **Correlation registry**: `OrderRegistry` keyed by client order id
//! - **Ledger**: inverse-contract position and balance state machine
//!
//! # Order Lifecycle
//!
//! 1. Engine computes a grid and generates a `client_order_id` per intent
//! 2. The order is registered in `OrderRegistry` as `Pending` and submitted
//! 3. REST ack and stream updates arrive in any order
//! 4. The first terminal update retires the order; a fill advances the `Ledger`

mod execution;
mod order;
mod position;
mod registry;

pub use execution::{BalanceSnapshot, PositionSnapshot, UserEvent};
pub use order::{CancelTarget, Order, OrderAck, OrderRequest, OrderSide, OrderStatus};
pub use position::{FillEffect, FillKind, Ledger, Position};
pub use registry::{
    generate_client_order_id, OrderRegistry, RegistryUpdate, CLIENT_ORDER_PREFIX,
};
