//! Wire types exchanged with the host frame.
//!
//! # Message Flow
//!
//! ```text
//! Client verb ──► OutboundMessage ──► Transport ──► host
//! host ──► InboundEvent { data, origin } ──► validation ──► InboundMessage ──► scheduler
//! ```
//!
//! Outbound and inbound messages share the same envelope; inbound adds a
//! `status_code`. `context` and `service` are opaque tokens handed out by the
//! host during `init` and echoed back on every later message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{ERROR_STATUSES, OK, SUBSCRIPTION_ADDED};

/// Numeric response status reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u16);

impl StatusCode {
    /// Returns `true` if this code rejects the pending request.
    #[must_use]
    pub fn is_error(self) -> bool {
        ERROR_STATUSES.contains(&self)
    }

    /// Returns `true` for a plain success (also carried by subscription events).
    #[must_use]
    pub fn is_ok(self) -> bool {
        self == OK
    }

    /// Returns `true` for a subscription acknowledgement.
    #[must_use]
    pub fn is_subscription_added(self) -> bool {
        self == SUBSCRIPTION_ADDED
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request sent to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Request path, e.g. `init`, `get/user`, `on/call`.
    pub path: String,
    /// Identity of this embedded instance.
    pub client_uid: String,
    /// Correlation id, unique per logical request.
    pub message_uid: String,
    /// Host-assigned context token (`null` before the handshake).
    pub context: Option<Value>,
    /// Host-assigned service token (`null` before the handshake).
    pub service: Option<Value>,
    /// Request payload.
    pub content: Option<Value>,
}

/// A validated response or event from the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Path the host is answering.
    pub path: String,
    /// Identity of the embedded instance this message targets.
    pub client_uid: String,
    /// Correlation id of the request being answered.
    #[serde(default)]
    pub message_uid: String,
    /// Host-assigned context token.
    #[serde(default)]
    pub context: Option<Value>,
    /// Host-assigned service token.
    #[serde(default)]
    pub service: Option<Value>,
    /// Response payload.
    #[serde(default)]
    pub content: Value,
    /// Response status. Absent codes are treated as non-errors.
    #[serde(default)]
    pub status_code: Option<StatusCode>,
}

/// A raw event yielded by the channel, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    /// Event payload as posted by the sender.
    pub data: Value,
    /// Origin of the sending context (`scheme://host[:port]`).
    pub origin: String,
}

impl InboundEvent {
    /// Create an event from a payload and sender origin.
    pub fn new(data: Value, origin: impl Into<String>) -> Self {
        Self {
            data,
            origin: origin.into(),
        }
    }
}

/// Convert an unsubscribe path into the subscribe path it cancels.
///
/// `off/call` becomes `on/call`.
#[must_use]
pub fn subscriber_path(unsubscriber_path: &str) -> String {
    let noun = unsubscriber_path.split('/').nth(1).unwrap_or_default();
    format!("on/{noun}")
}

/// Base description of a message used as the first line of warning logs.
#[must_use]
pub fn describe(data: &Value) -> String {
    format!(
        "DIALPAD CLIENT: ClientUid: {}, MessageUid: {}, Service: {}, Context: {}, Path: {}",
        field_text(data, "client_uid"),
        field_text(data, "message_uid"),
        field_text(data, "service"),
        field_text(data, "context"),
        field_text(data, "path"),
    )
}

/// A field rendered for logs; strings unquoted, absent fields as `undefined`.
pub(crate) fn field_text(data: &Value, name: &str) -> String {
    match data.get(name) {
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
        None => "undefined".to_string(),
    }
}
