//! Error types for connector operations.

use std::fmt;
use thiserror::Error;

/// Result type for connector operations
///
/// **Mandatory public API** - every source, sink and registry method returns this.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Which capability a factory or instance provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectorKind {
    Source,
    Sink,
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorKind::Source => f.write_str("source"),
            ConnectorKind::Sink => f.write_str("sink"),
        }
    }
}

/// Error types for connector operations
///
/// **Mandatory public API** - all connectors use this for error handling.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// Configuration error - a required option is missing or invalid.
    ///
    /// Detected at construction (or at `start`/`deliver` when no client was
    /// injected), always before any I/O.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The adapter could not establish its underlying connection at `start`
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A single network call failed before a response was obtained
    ///
    /// Examples: connection refused, TLS failure, request timeout
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The remote endpoint answered with a non-2xx status
    #[error("unexpected HTTP status {status}")]
    HttpStatus { status: u16 },

    /// A sink exhausted every delivery attempt
    #[error("{destination}: delivery failed after {attempts} attempts: {source}")]
    Delivery {
        destination: String,
        attempts: u32,
        #[source]
        source: Box<ConnectorError>,
    },

    /// Malformed inbound payload - the single message is dropped
    #[error("Parse error: {message}")]
    Parse { message: String, payload: Vec<u8> },

    /// A factory for this type name is already registered
    #[error("{kind} type {type_name:?} is already registered")]
    DuplicateType {
        kind: ConnectorKind,
        type_name: String,
    },

    /// No factory is registered for this type name
    #[error("unknown {kind} type {type_name:?}")]
    UnknownType {
        kind: ConnectorKind,
        type_name: String,
    },

    /// An instance with this name already exists (sources and sinks share one namespace)
    #[error("connector instance {name:?} already exists")]
    DuplicateInstance { name: String },

    /// The factory refused to build the instance
    #[error("create {kind} {name:?} of type {type_name:?}: {source}")]
    Construction {
        kind: ConnectorKind,
        name: String,
        type_name: String,
        #[source]
        source: Box<ConnectorError>,
    },

    /// The caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's deadline elapsed before the operation finished
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectorError {
    /// Check if a delivery attempt that failed with this error may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectorError::Transport { .. }
                | ConnectorError::HttpStatus { .. }
                | ConnectorError::Connection { .. }
                | ConnectorError::Io(_)
        )
    }

    /// Check if this error came from a registry operation
    pub fn is_registry_error(&self) -> bool {
        matches!(
            self,
            ConnectorError::DuplicateType { .. }
                | ConnectorError::UnknownType { .. }
                | ConnectorError::DuplicateInstance { .. }
                | ConnectorError::Construction { .. }
        )
    }

    /// Check if the operation ended because of cancellation or an expired deadline
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            ConnectorError::Cancelled | ConnectorError::DeadlineExceeded
        )
    }

    /// Check if this error is due to a malformed payload
    pub fn is_parse_error(&self) -> bool {
        matches!(self, ConnectorError::Parse { .. })
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        ConnectorError::Configuration(message.into())
    }

    /// Create a connection error from a message
    pub fn connection(message: impl Into<String>) -> Self {
        ConnectorError::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a transport error from a message
    pub fn transport(message: impl Into<String>) -> Self {
        ConnectorError::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error with source
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a parse error carrying the offending payload
    pub fn parse(message: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        ConnectorError::Parse {
            message: message.into(),
            payload: payload.into(),
        }
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let transport = ConnectorError::transport("connection reset");
        assert!(transport.is_retryable());
        assert!(!transport.is_registry_error());

        let status = ConnectorError::HttpStatus { status: 503 };
        assert!(status.is_retryable());

        let config = ConnectorError::config("queue_url is required");
        assert!(!config.is_retryable());

        let dup = ConnectorError::DuplicateInstance {
            name: "orders".into(),
        };
        assert!(dup.is_registry_error());

        assert!(ConnectorError::Cancelled.is_cancellation());
        assert!(ConnectorError::DeadlineExceeded.is_cancellation());
        assert!(!ConnectorError::DeadlineExceeded.is_retryable());

        let parse = ConnectorError::parse("bad json", b"{".to_vec());
        assert!(parse.is_parse_error());
    }

    #[test]
    fn test_delivery_error_display() {
        let err = ConnectorError::Delivery {
            destination: "webhook sink \"out\"".into(),
            attempts: 2,
            source: Box::new(ConnectorError::HttpStatus { status: 500 }),
        };
        assert_eq!(
            err.to_string(),
            "webhook sink \"out\": delivery failed after 2 attempts: unexpected HTTP status 500"
        );
    }

    #[test]
    fn test_construction_error_names_instance_and_type() {
        let err = ConnectorError::Construction {
            kind: ConnectorKind::Source,
            name: "ingest".into(),
            type_name: "sqs".into(),
            source: Box::new(ConnectorError::config("queue_url is required")),
        };
        let msg = err.to_string();
        assert!(msg.contains("\"ingest\""));
        assert!(msg.contains("\"sqs\""));
        assert!(msg.contains("queue_url is required"));
    }
}
