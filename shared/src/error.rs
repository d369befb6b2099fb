//! Error types for Vortex.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Transport did not open within the connect deadline.
    #[error("Connection timed out - relay unreachable")]
    ConnectTimeout,

    /// Relay never acknowledged the registration.
    #[error("Registration timed out - relay may be busy. Try again.")]
    RegistrationTimeout,

    /// Relay explicitly refused the registration (bad token, taken name).
    #[error("Registration rejected: {0}")]
    RegistrationRejected(String),

    /// Transport closed after the session was established.
    #[error("Connection closed")]
    TransportClosed,

    /// Socket or websocket handshake failure before the session was established.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Could not open a connection to the local service.
    #[error("Local server unreachable: {0}")]
    LocalUnreachable(String),

    /// Local service produced no complete response within the deadline.
    #[error("Local server did not respond in time")]
    LocalTimeout,

    /// Inbound request frame exceeded the size limit.
    #[error("Request body exceeds {0}MB limit")]
    RequestTooLarge(usize),

    /// Local response body crossed the size limit mid-stream.
    #[error("Response body exceeds {0}MB limit")]
    ResponseTooLarge(usize),

    /// Frame could not be parsed as an HTTP request.
    #[error("Failed to parse request")]
    MalformedRequest,

    /// Peer broke the control protocol after registration.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
}

impl Error {
    /// Whether the reconnection supervisor may retry after this failure.
    ///
    /// Only pre-registration failures qualify: an explicit rejection cannot
    /// succeed on retry, and anything after `Ready` is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectTimeout | Error::RegistrationTimeout | Error::Transport(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_by_kind() {
        assert!(Error::ConnectTimeout.is_retryable());
        assert!(Error::RegistrationTimeout.is_retryable());
        assert!(Error::Transport("reset".into()).is_retryable());

        assert!(!Error::RegistrationRejected("bad token".into()).is_retryable());
        assert!(!Error::TransportClosed.is_retryable());
        assert!(!Error::ProtocolViolation("dup ack".into()).is_retryable());
        assert!(!Error::LocalTimeout.is_retryable());
    }

    #[test]
    fn rejection_keeps_server_message() {
        let err = Error::RegistrationRejected("endpoint taken".into());
        assert_eq!(err.to_string(), "Registration rejected: endpoint taken");
    }
}
