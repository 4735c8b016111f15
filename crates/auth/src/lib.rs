//! Authentication and signing for the BitMEX API.
//!
//! - **Secure Credentials**: the API secret is wrapped in `SecretString`.
//! - **HMAC-SHA256 Signing**: `VERB + path + expires + body`, hex encoded.
//! - **Expiry Clock**: non-decreasing `api-expires` values shared by REST
//!   requests and the websocket handshake.
//!
//! # Example
//!
//! ```rust,ignore
//! use auth::{ApiCredentials, ExpiryClock, RequestSigner};
//!
//! let credentials = ApiCredentials::from_env()?;
//! let clock = ExpiryClock::new();
//! let expires = clock.next(std::time::Duration::from_secs(60));
//!
//! let signer = RequestSigner::new(&credentials);
//! let signature = signer.sign_request("GET", "/api/v1/position", None, expires, None);
//! ```

mod credentials;
mod error;
mod expiry;
mod signer;

pub use credentials::{ApiCredentials, API_KEY_VAR, API_SECRET_VAR};
pub use error::AuthError;
pub use expiry::ExpiryClock;
pub use signer::{signature_payload, RequestSigner};
