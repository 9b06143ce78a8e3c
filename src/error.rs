//! Error taxonomy for the protocol client.
//!
//! Transport-boundary defects (disallowed origin, malformed fields, unknown
//! correlation ids) are logged and swallowed by the client listener so a
//! misbehaving host cannot take the embedded app down. Everything else
//! rejects the caller's [`PendingResponse`](crate::scheduler::PendingResponse)
//! or is returned synchronously from subscribe/unsubscribe calls.

use thiserror::Error;

use crate::message::{InboundMessage, StatusCode};
use crate::transport::TransportError;

/// Errors produced by the client, its scheduler and its validation pipeline.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A non-init request was made before the handshake completed.
    #[error("Error: Client is not Initialized.")]
    NotInitialized,

    /// No matching response arrived within the request window.
    #[error("Error: message_uid: {message_uid} has exceeded time limit.")]
    Timeout {
        /// Correlation id of the expired request.
        message_uid: String,
        /// Path of the expired request.
        path: String,
    },

    /// Malformed inbound message, or a response nobody is waiting for.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Inbound message from an origin outside the allow-list.
    #[error("Event origin: {0} is invalid.")]
    Origin(String),

    /// The host answered with an error status.
    #[error("Status: {status}")]
    Client {
        /// Status reported by the host.
        status: StatusCode,
        /// The full error response.
        message: Box<InboundMessage>,
    },

    /// Another request to the same path is already in flight.
    #[error("Error: Request to path: {path} is already in progress.")]
    Conflict {
        /// The contended path.
        path: String,
    },

    /// The callback is already subscribed to this path.
    #[error("Callback is already registered for path: {path}")]
    DuplicateSubscription {
        /// Subscription path.
        path: String,
    },

    /// No subscription on this path was made with the given callback.
    #[error("No subscription exists for path: {path}")]
    UnsubscribeMismatch {
        /// Subscription path.
        path: String,
    },

    /// The transport refused the outbound message.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The request was withdrawn before the host answered.
    #[error("Request was cancelled before a response arrived")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            BridgeError::NotInitialized.to_string(),
            "Error: Client is not Initialized."
        );
        assert_eq!(
            BridgeError::Conflict {
                path: "get/user".into()
            }
            .to_string(),
            "Error: Request to path: get/user is already in progress."
        );
        assert_eq!(
            BridgeError::Origin("https://evil.test".into()).to_string(),
            "Event origin: https://evil.test is invalid."
        );
    }
}
