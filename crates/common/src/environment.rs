//! Production and testnet endpoints.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Variable naming the environment to trade against.
pub const ENVIRONMENT_VAR: &str = "BITMEX_ENVIRONMENT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitmexEnvironment {
    /// Real funds.
    #[default]
    Production,
    Testnet,
}

impl BitmexEnvironment {
    /// REST host; endpoints live under `/api/v1`.
    pub fn rest_base_url(&self) -> &'static str {
        match self {
            Self::Production => "https://www.bitmex.com",
            Self::Testnet => "https://testnet.bitmex.com",
        }
    }

    /// Realtime endpoint shared by the public and authenticated streams.
    pub fn ws_url(&self) -> &'static str {
        match self {
            Self::Production => "wss://www.bitmex.com/realtime",
            Self::Testnet => "wss://testnet.bitmex.com/realtime",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Testnet => "testnet",
        }
    }

    /// `None` when `BITMEX_ENVIRONMENT` is unset; an error when it is set to
    /// something unrecognised, so a typo never silently selects production.
    pub fn from_env() -> Result<Option<Self>, ParseEnvironmentError> {
        match std::env::var(ENVIRONMENT_VAR) {
            Ok(value) => value.parse().map(Some),
            Err(_) => Ok(None),
        }
    }
}

impl fmt::Display for BitmexEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BitmexEnvironment {
    type Err = ParseEnvironmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" | "mainnet" | "live" => Ok(Self::Production),
            "testnet" | "test" => Ok(Self::Testnet),
            _ => Err(ParseEnvironmentError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown environment '{0}', expected production or testnet")]
pub struct ParseEnvironmentError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        assert_eq!(BitmexEnvironment::Production.rest_base_url(), "https://www.bitmex.com");
        assert_eq!(BitmexEnvironment::Production.ws_url(), "wss://www.bitmex.com/realtime");
        assert_eq!(BitmexEnvironment::Testnet.rest_base_url(), "https://testnet.bitmex.com");
        assert_eq!(BitmexEnvironment::Testnet.ws_url(), "wss://testnet.bitmex.com/realtime");
    }

    #[test]
    fn test_parse() {
        assert_eq!("MAINNET".parse(), Ok(BitmexEnvironment::Production));
        assert_eq!(" testnet ".parse(), Ok(BitmexEnvironment::Testnet));
        assert_eq!(
            "staging".parse::<BitmexEnvironment>().unwrap_err().to_string(),
            "unknown environment 'staging', expected production or testnet"
        );
    }

    #[test]
    fn test_display_round_trips() {
        for env in [BitmexEnvironment::Production, BitmexEnvironment::Testnet] {
            assert_eq!(env.to_string().parse(), Ok(env));
        }
    }
}
