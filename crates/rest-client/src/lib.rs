//! Generic REST client infrastructure.
//!
//! This crate provides a thin wrapper around `reqwest` with:
//!
//! - Consistent error handling via `RestError`
//! - One request path for GET, POST and DELETE
//! - Raw JSON bodies sent byte-for-byte as given, so callers can sign them
//! - Header injection for authentication
//! - Rate limit detection
//!
//! # Example
//!
//! ```rust,ignore
//! use rest_client::{Method, RestClient};
//!
//! let client = RestClient::with_default_timeout("https://www.bitmex.com")?;
//! let body = r#"{"orderID":"abc"}"#.to_string();
//! let orders: Vec<serde_json::Value> = client
//!     .request(Method::DELETE, "/api/v1/order", None, &headers, Some(body))
//!     .await?;
//! ```

mod client;
mod error;

pub use client::RestClient;
pub use error::RestError;
pub use reqwest::Method;
