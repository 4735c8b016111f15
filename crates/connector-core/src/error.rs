use thiserror::Error;

/// Failure of a single streaming session. Never fatal on its own.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Shutdown requested")]
    Shutdown,
}

/// Error surfaced by `ExchangeGateway` request/response operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rejected by exchange: {0}")]
    Rejected(String),

    /// The request may still have been executed exchange-side.
    #[error("Request timed out, outcome unknown")]
    Timeout,

    #[error("Rate limited")]
    RateLimited,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Stream error: {0}")]
    Stream(#[from] ConnectorError),
}

impl GatewayError {
    /// Whether the exchange may have acted on the request despite the error.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Timeout | Self::Transport(_))
    }
}
