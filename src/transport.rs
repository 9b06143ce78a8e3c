//! Channel transport abstraction.
//!
//! The host frame and the embedded app talk over a single asynchronous,
//! unordered, at-most-once message channel (in a browser, `postMessage`).
//! The channel itself is an external collaborator: this module only defines
//! the seam the scheduler sends through, plus an in-process implementation
//! backed by a tokio channel.
//!
//! # Architecture
//!
//! ```text
//! Transport (trait)
//!     │
//!     ├── MpscTransport
//!     │   └── Forwards OutboundEnvelope over an unbounded tokio channel
//!     │
//!     └── (embedder-provided, e.g. a wasm postMessage bridge)
//! ```
//!
//! Inbound traffic is not part of the trait: the client consumes a
//! `mpsc::UnboundedReceiver<InboundEvent>` fed by whoever owns the channel.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::message::OutboundMessage;

/// Errors that can occur when handing a message to the channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The receiving side of the channel is gone.
    #[error("Channel closed")]
    Closed,
}

/// Outbound half of the host channel.
///
/// `send` is fire-and-forget: success only means the channel accepted the
/// message, not that the host received it.
///
/// Implementations must not deliver inbound events re-entrantly from inside
/// `send`; the scheduler holds its bookkeeping lock while transmitting.
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Post `message` to the host context at `target_origin`.
    fn send(&self, target_origin: &str, message: &OutboundMessage) -> Result<(), TransportError>;
}

/// A message as posted to the channel, with its target origin.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEnvelope {
    /// Origin the message is addressed to.
    pub target_origin: String,
    /// The message itself.
    pub message: OutboundMessage,
}

/// In-process transport that forwards every message to an unbounded channel.
///
/// Used by the loopback host and by tests to observe exactly what was
/// transmitted, and in which order.
#[derive(Debug, Clone)]
pub struct MpscTransport {
    tx: mpsc::UnboundedSender<OutboundEnvelope>,
}

impl MpscTransport {
    /// Create a transport and the receiver observing its traffic.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<OutboundEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for MpscTransport {
    fn send(&self, target_origin: &str, message: &OutboundMessage) -> Result<(), TransportError> {
        self.tx
            .send(OutboundEnvelope {
                target_origin: target_origin.to_string(),
                message: message.clone(),
            })
            .map_err(|_closed| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(path: &str) -> OutboundMessage {
        OutboundMessage {
            path: path.to_string(),
            client_uid: "frame-1".into(),
            message_uid: "m-1".into(),
            context: None,
            service: None,
            content: None,
        }
    }

    #[test]
    fn test_mpsc_transport_forwards_envelope() {
        let (transport, mut rx) = MpscTransport::pair();
        transport
            .send("https://dialpad.com", &message("init"))
            .unwrap();

        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.target_origin, "https://dialpad.com");
        assert_eq!(envelope.message.path, "init");
    }

    #[test]
    fn test_mpsc_transport_closed() {
        let (transport, rx) = MpscTransport::pair();
        drop(rx);

        let result = transport.send("https://dialpad.com", &message("init"));
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
