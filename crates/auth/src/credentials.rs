//! BitMEX API key pair.
//!
//! The secret sits in a `SecretString`: redacted from `Debug` output and
//! zeroed on drop.

use crate::error::AuthError;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

pub const API_KEY_VAR: &str = "BITMEX_API_KEY";
pub const API_SECRET_VAR: &str = "BITMEX_API_SECRET";

#[derive(Clone)]
pub struct ApiCredentials {
    api_key: String,
    secret: SecretString,
}

impl ApiCredentials {
    pub fn new(api_key: String, secret: String) -> Self {
        Self {
            api_key,
            secret: SecretString::from(secret),
        }
    }

    /// Read the key pair from the process environment, after loading `.env`
    /// from the working directory if one exists.
    pub fn from_env() -> Result<Self, AuthError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve both variables through `lookup`. Surrounding whitespace is
    /// trimmed; blank values are rejected.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AuthError> {
        let read = |name: &str| -> Result<String, AuthError> {
            let value = lookup(name).ok_or_else(|| AuthError::MissingEnvVar(name.into()))?;
            let value = value.trim().to_string();
            if value.is_empty() {
                return Err(AuthError::Blank(name.into()));
            }
            Ok(value)
        };

        Ok(Self::new(read(API_KEY_VAR)?, read(API_SECRET_VAR)?))
    }

    /// Public half; safe to log and sent as `api-key`.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Signing key. Only the signer should call this.
    pub fn expose_secret(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
