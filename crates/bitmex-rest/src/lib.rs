//! BitMEX REST API client.
//!
//! This crate provides a typed client for the BitMEX REST API with:
//!
//! - **Request signing**: `api-expires` / `api-key` / `api-signature` headers over
//!   the exact compact JSON body that is sent
//! - **Order management**: single and bulk create, cancel by id or client id
//! - **Fee lookup**: execution history for a filled order, scaled to whole units
//! - **Historical candles**: backward pagination of bucketed trades with throttling
//!
//! The row types in [`responses`] are shared with the websocket tables, whose
//! partial updates are merged into them field by field.
//!
//! # Example
//!
//! ```rust,ignore
//! use auth::ApiCredentials;
//! use bitmex_rest::BitmexRestClient;
//! use common::BitmexEnvironment;
//! use execution_core::OrderRequest;
//!
//! let client = BitmexRestClient::new(ApiCredentials::from_env()?, BitmexEnvironment::Testnet)?;
//!
//! let row = client
//!     .place_order("XBTUSD", &OrderRequest::limit("mm_1".into(), dec!(10), dec!(9999.5)))
//!     .await?;
//! ```

mod client;
mod error;
mod requests;
pub mod responses;

pub use client::{
    collect_candles, page_start_time, should_throttle, BitmexRestClient, BUCKET_PAGE_SIZE,
    THROTTLE_EVERY_PAGES, THROTTLE_PAUSE,
};
pub use error::BitmexRestError;
pub use requests::{NewOrderBody, POST_ONLY};
pub use responses::{BucketRow, ExecutionRow, MarginRow, OrderRow, PositionRow};
