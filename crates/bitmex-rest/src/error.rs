//! BitMEX REST API error types.

use auth::AuthError;
use rest_client::RestError;
use thiserror::Error;

/// Errors that can occur when interacting with the BitMEX REST API.
#[derive(Debug, Error)]
pub enum BitmexRestError {
    /// REST client error (network, timeout, etc.).
    #[error("REST client error: {0}")]
    Rest(RestError),

    /// Authentication error.
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Error body returned by the exchange.
    #[error("BitMEX API error {status} ({name}): {message}")]
    ApiError {
        status: u16,
        name: String,
        message: String,
    },

    /// The matching engine refused the request because it is overloaded.
    #[error("System overloaded")]
    Overloaded,

    /// Request could not be built from the given arguments.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Failed to parse response.
    #[error("Parse error: {0}")]
    Parse(String),
}

impl BitmexRestError {
    /// Parse a BitMEX error response.
    ///
    /// BitMEX returns errors in the format:
    /// `{"error": {"message": "...", "name": "HTTPError"}}`
    pub fn from_api_response(status: u16, body: &str) -> Self {
        #[derive(serde::Deserialize)]
        struct Envelope {
            error: ApiError,
        }

        #[derive(serde::Deserialize)]
        struct ApiError {
            #[serde(default)]
            message: String,
            #[serde(default)]
            name: String,
        }

        if status == 503 {
            return Self::Overloaded;
        }

        match serde_json::from_str::<Envelope>(body) {
            Ok(env) => Self::ApiError {
                status,
                name: env.error.name,
                message: env.error.message,
            },
            Err(_) => Self::Rest(RestError::HttpError {
                status,
                message: body.to_string(),
            }),
        }
    }

    /// Check if this error indicates the operation should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Rest(rest_err) => rest_err.is_retryable(),
            Self::Overloaded => true,
            _ => false,
        }
    }

    /// Whether the request may have been executed despite the error.
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            Self::Rest(RestError::Timeout) | Self::Rest(RestError::Connection(_))
        )
    }
}

impl From<RestError> for BitmexRestError {
    fn from(err: RestError) -> Self {
        match err {
            RestError::HttpError { status, message } => Self::from_api_response(status, &message),
            other => Self::Rest(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_api_error_body() {
        let body = r#"{"error":{"message":"Invalid ordStatus","name":"HTTPError"}}"#;
        match BitmexRestError::from_api_response(400, body) {
            BitmexRestError::ApiError {
                status,
                name,
                message,
            } => {
                assert_eq!(status, 400);
                assert_eq!(name, "HTTPError");
                assert_eq!(message, "Invalid ordStatus");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_overloaded_is_retryable() {
        let err = BitmexRestError::from_api_response(503, "{}");
        assert!(matches!(err, BitmexRestError::Overloaded));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_unparseable_body_kept_raw() {
        let err: BitmexRestError = RestError::HttpError {
            status: 502,
            message: "<html>bad gateway</html>".into(),
        }
        .into();
        assert!(matches!(err, BitmexRestError::Rest(RestError::HttpError { status: 502, .. })));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_timeout_is_ambiguous() {
        let err: BitmexRestError = RestError::Timeout.into();
        assert!(err.is_ambiguous());
        assert!(!BitmexRestError::Overloaded.is_ambiguous());
    }
}
