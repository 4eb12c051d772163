/// Errors produced by a [`StreamTransport`](crate::transport::StreamTransport)
/// while opening a request or reading its body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent (DNS, connect, TLS, ...).
    #[error("{0}")]
    Connect(String),
    /// Reading the response body failed mid-stream.
    #[error("{0}")]
    Read(String),
    /// The request could not be assembled before sending.
    #[error("{0}")]
    Build(String),
}

impl TransportError {
    /// Creates a connect-level error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect(message.into())
    }

    /// Creates a body read error.
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read(message.into())
    }

    /// Creates a request build error.
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build(message.into())
    }
}

/// Terminal failure of a streaming request.
///
/// The `Display` form is the exact message carried by the
/// `StreamEvent::Error` event handed to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The server answered with a non-success status.
    #[error("HTTP error! status: {status}")]
    Http { status: u16 },
    /// The response carried no readable body.
    #[error("No response body")]
    NoBody,
    /// The transport failed before or during the read loop.
    #[error("Error: {0}")]
    Transport(TransportError),
    /// The stream could not be started at all.
    #[error("Error: {0}")]
    Setup(String),
}

impl From<TransportError> for StreamError {
    fn from(value: TransportError) -> Self {
        StreamError::Transport(value)
    }
}

/// Top-level error type for the public client API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Request parameters rejected before anything was sent.
    #[error("validation error: {0}")]
    Validation(String),
    /// The server answered with a non-success status.
    #[error("HTTP {status}: {detail}")]
    Http { status: u16, detail: String },
    /// Network or I/O failure talking to the server.
    #[error("transport error: {0}")]
    Transport(String),
    /// The response body did not have the expected shape.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ClientError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Returns the HTTP status for `Http` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the REST client may retry the request that produced this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<TransportError> for ClientError {
    fn from(value: TransportError) -> Self {
        match value {
            TransportError::Build(message) => ClientError::Validation(message),
            other => ClientError::Transport(other.to_string()),
        }
    }
}
