//! Contains the `Error` and `Result` types that `quilldb` uses.

use std::sync::Arc;

use thiserror::Error;

/// The result type for all methods that can return an error in the `quilldb` crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur in the `quilldb` crate. The inner
/// [`ErrorKind`](enum.ErrorKind.html) is boxed to keep the type small enough to
/// pass through `Result` cheaply.
#[derive(Clone, Debug, Error)]
#[error("Kind: {kind}")]
#[non_exhaustive]
pub struct Error {
    /// The type of error that occurred.
    pub kind: Box<ErrorKind>,

    #[source]
    pub(crate) source: Option<Box<Error>>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
            source: None,
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Error {
        ErrorKind::Internal {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Error {
        ErrorKind::InvalidArgument {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn handshake(message: impl Into<String>) -> Error {
        ErrorKind::Handshake {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn connection_closed(message: impl Into<String>) -> Error {
        ErrorKind::ConnectionClosed {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn no_available_hosts(message: impl Into<String>) -> Error {
        ErrorKind::NoAvailableHosts {
            message: message.into(),
        }
        .into()
    }

    /// Wraps this error in the `UnableToConnect` umbrella, keeping `self` as the
    /// reason on the source chain.
    pub(crate) fn into_unable_to_connect(self) -> Error {
        let message = format!("unable to connect to the deployment: {}", self.kind);
        Error::new(ErrorKind::UnableToConnect { message }).with_source(self)
    }

    pub(crate) fn with_source<E: Into<Option<Error>>>(mut self, source: E) -> Self {
        self.source = source.into().map(Box::new);
        self
    }

    /// Whether this error was caused by the underlying transport.
    pub(crate) fn is_network_error(&self) -> bool {
        matches!(
            self.kind.as_ref(),
            ErrorKind::Io(..) | ErrorKind::ConnectionClosed { .. }
        )
    }

    pub(crate) fn is_no_available_hosts(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::NoAvailableHosts { .. })
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Shutdown)
    }
}

impl<E> From<E> for Error
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        Error::new(err.into())
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<std::io::ErrorKind> for ErrorKind {
    fn from(err: std::io::ErrorKind) -> Self {
        Self::Io(Arc::new(err.into()))
    }
}

impl From<bson::de::Error> for ErrorKind {
    fn from(err: bson::de::Error) -> Self {
        Self::InvalidResponse {
            message: err.to_string(),
        }
    }
}

impl From<bson::ser::Error> for ErrorKind {
    fn from(err: bson::ser::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

/// The types of errors that can occur.
#[allow(missing_docs)]
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An invalid argument was provided.
    #[error("An invalid argument was provided: {message}")]
    #[non_exhaustive]
    InvalidArgument { message: String },

    /// The seed list in the client options was empty.
    #[error("No hosts were specified in the client options")]
    NoHostSpecified,

    /// A transport was opened to a server, but the handshake reply was absent or
    /// malformed.
    #[error("Handshake failed: {message}")]
    #[non_exhaustive]
    Handshake { message: String },

    /// Every known host is either already pooled or marked timed out, and no pooled
    /// connection matches the requested capability.
    #[error("No available hosts matched the request: {message}")]
    #[non_exhaustive]
    NoAvailableHosts { message: String },

    /// The underlying transport closed between command submission and reply.
    #[error("Connection closed with commands in flight: {message}")]
    #[non_exhaustive]
    ConnectionClosed { message: String },

    /// Umbrella for connection establishment failures; the reason is carried on the
    /// error's source chain.
    #[error("{message}")]
    #[non_exhaustive]
    UnableToConnect { message: String },

    /// Wrapper around a `std::io::Error`.
    #[error("{0}")]
    Io(Arc<std::io::Error>),

    /// The server returned a reply the driver could not interpret.
    #[error("Invalid server response: {message}")]
    #[non_exhaustive]
    InvalidResponse { message: String },

    /// An error related to TLS configuration.
    #[error("An error occurred when trying to parse the TLS configuration: {message}")]
    #[non_exhaustive]
    InvalidTlsConfig { message: String },

    /// The client was shut down while the operation was pending.
    #[error("The client was shut down")]
    Shutdown,

    /// An internal invariant was violated; receiving this error indicates a bug in
    /// the driver.
    #[error("Internal error: {message}")]
    #[non_exhaustive]
    Internal { message: String },
}

#[cfg(test)]
mod test {
    use super::{Error, ErrorKind};

    #[test]
    fn umbrella_keeps_reason_as_source() {
        let reason = Error::no_available_hosts("every known host is timed out");
        let umbrella = reason.clone().into_unable_to_connect();

        assert!(matches!(
            umbrella.kind.as_ref(),
            ErrorKind::UnableToConnect { .. }
        ));
        let source = umbrella.source.as_deref().expect("source should be set");
        assert!(source.is_no_available_hosts());
    }

    #[test]
    fn network_error_classification() {
        assert!(Error::from(std::io::ErrorKind::ConnectionReset).is_network_error());
        assert!(Error::connection_closed("reset by peer").is_network_error());
        assert!(!Error::internal("bug").is_network_error());
    }
}
