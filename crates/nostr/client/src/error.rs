//! Client error types.

use thiserror::Error;

/// Coarse error category callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Endpoint unreachable, handshake failure, or operation outside the connected state.
    Connection,
    /// Signing failure, relay rejection, or transport failure while publishing.
    Publish,
    /// Malformed filter or subscription refused by the relay.
    Subscription,
    /// Relay frames that do not follow the protocol.
    Protocol,
}

/// Client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("connection timeout after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("not connected")]
    NotConnected,

    #[error("client disconnected")]
    Disconnected,

    #[error("publish error: {0}")]
    Publish(String),

    #[error("relay rejected event {event_id}: {message}")]
    Rejected { event_id: String, message: String },

    #[error("no OK for event {0} within timeout")]
    AckTimeout(String),

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUrl(_)
            | Self::Connection(_)
            | Self::ConnectTimeout(_)
            | Self::NotConnected
            | Self::Disconnected => ErrorKind::Connection,
            Self::Publish(_) | Self::Rejected { .. } | Self::AckTimeout(_) => ErrorKind::Publish,
            Self::Subscription(_) => ErrorKind::Subscription,
            Self::Protocol(_) | Self::Serialization(_) | Self::Internal(_) => ErrorKind::Protocol,
        }
    }

    pub fn is_connection_error(&self) -> bool {
        self.kind() == ErrorKind::Connection
    }
}

impl From<url::ParseError> for ClientError {
    fn from(error: url::ParseError) -> Self {
        Self::InvalidUrl(error.to_string())
    }
}

/// Client result type.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_map_to_categories() {
        assert_eq!(ClientError::Disconnected.kind(), ErrorKind::Connection);
        assert_eq!(ClientError::NotConnected.kind(), ErrorKind::Connection);
        assert_eq!(
            ClientError::Rejected {
                event_id: "id".to_string(),
                message: "blocked".to_string(),
            }
            .kind(),
            ErrorKind::Publish
        );
        assert_eq!(
            ClientError::Subscription("bad filter".to_string()).kind(),
            ErrorKind::Subscription
        );
        assert!(ClientError::InvalidUrl("x".to_string()).is_connection_error());
        assert!(!ClientError::Publish("x".to_string()).is_connection_error());
    }
}
