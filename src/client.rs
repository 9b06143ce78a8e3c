//! Embedded-side protocol client.
//!
//! `Client` is the surface an embedded app talks to. It validates every
//! inbound event before the scheduler sees it and exposes one method per
//! host verb.
//!
//! # Validation
//!
//! ```text
//! InboundEvent
//!     │
//!     ├── not a protocol object (bundler chatter, strings) ──► Ignored
//!     ├── origin not allowed ─────────────────────────────────► Dropped(Origin)
//!     ├── service / client_uid / context / path missing ──────► Dropped(Protocol)
//!     ├── client_uid for another instance (strict check) ─────► Dropped(Protocol)
//!     └── RequestScheduler::execute_handler ──────────────────► Delivered
//! ```
//!
//! Dropped events are logged and never reach the caller: a misbehaving or
//! hostile sender cannot fail the embedded app.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{ClientConfig, IdentityCheck};
use crate::constants::{
    AUTH_TIMEOUT, PATH_AUTH_EXTERNAL, PATH_GET_CALL, PATH_GET_CONTACT, PATH_GET_SCREEN_POP,
    PATH_GET_USER, PATH_OFF_CALL, PATH_OFF_DISCONNECT, PATH_ON_CALL, PATH_ON_DISCONNECT,
    PATH_SEND_TOAST, PATH_SET_CONTACT, PATH_TRACK_EVENT,
};
use crate::error::BridgeError;
use crate::message::{describe, field_text, InboundEvent, InboundMessage};
use crate::origin::OriginAllowList;
use crate::registry::SubscriptionCallback;
use crate::scheduler::{
    PendingResponse, RequestScheduler, ResponseCallback, ResponseHook, SessionState,
};
use crate::transport::Transport;

/// Fields that must be present and truthy on every protocol message.
const REQUIRED_FIELDS: [&str; 4] = ["service", "client_uid", "context", "path"];

/// What happened to one inbound event.
#[derive(Debug)]
pub enum EventOutcome {
    /// Not a protocol message; silently skipped.
    Ignored,
    /// Rejected by validation or by the scheduler; logged and discarded.
    Dropped(BridgeError),
    /// Routed to the pending request or subscription it answers.
    Delivered,
}

impl EventOutcome {
    /// Returns `true` if the event reached a request or subscription.
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

#[derive(Debug)]
struct ClientInner {
    client_uid: String,
    allowed_origins: OriginAllowList,
    identity_check: IdentityCheck,
    scheduler: RequestScheduler,
}

impl ClientInner {
    fn handle_event(&self, event: InboundEvent) -> EventOutcome {
        let InboundEvent { data, origin } = event;

        // Bundler hot-reload notices and other page chatter share the channel.
        if !data.is_object() || data.get("type").is_some() {
            log::trace!("[DialpadClient] Ignoring non-protocol event from {origin}");
            return EventOutcome::Ignored;
        }

        if !self.allowed_origins.is_allowed(&origin) {
            return drop_event(&data, BridgeError::Origin(origin));
        }

        if !REQUIRED_FIELDS
            .iter()
            .all(|field| is_truthy(data.get(*field)))
        {
            let reason = format!(
                "One of client_uid: {} or message_uid: {} is missing from request data.",
                field_text(&data, "client_uid"),
                field_text(&data, "message_uid"),
            );
            return drop_event(&data, BridgeError::Protocol(reason));
        }

        if self.identity_check == IdentityCheck::Strict {
            let client_uid = data.get("client_uid").and_then(Value::as_str);
            if client_uid != Some(self.client_uid.as_str()) {
                let reason = format!(
                    "ClientUid: {} does not match ClientUid: {}",
                    self.client_uid,
                    field_text(&data, "client_uid"),
                );
                return drop_event(&data, BridgeError::Protocol(reason));
            }
        }

        let message: InboundMessage = match serde_json::from_value(data.clone()) {
            Ok(message) => message,
            Err(e) => {
                return drop_event(&data, BridgeError::Protocol(format!("Malformed message: {e}")))
            }
        };

        match self.scheduler.execute_handler(message) {
            Ok(()) => EventOutcome::Delivered,
            Err(e) => EventOutcome::Dropped(e),
        }
    }
}

fn drop_event(data: &Value, error: BridgeError) -> EventOutcome {
    log::warn!("{}", describe(data));
    log::warn!("[DialpadClient] {error}");
    EventOutcome::Dropped(error)
}

/// Truthiness as the host frame's scripting runtime defines it.
fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_) | Value::Object(_)) => true,
    }
}

/// Client for an app embedded in the host frame.
///
/// Call [`init`](Self::init) first; every other request is refused until the
/// handshake completes. Dropping the client stops its listener and settles
/// every outstanding request with [`BridgeError::Cancelled`].
#[derive(Debug)]
pub struct Client {
    inner: Arc<ClientInner>,
    listener: Option<JoinHandle<()>>,
}

impl Client {
    /// Create a client sending through `transport`.
    ///
    /// Construction needs no runtime. Requests spawn their timeout timers
    /// and [`listen`](Self::listen) spawns the listener, so both must be
    /// called within a tokio runtime or they panic.
    pub fn new(config: &ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let scheduler = RequestScheduler::with_timeout(
            config.scheduler,
            transport,
            config.host_origin.clone(),
            config.client_uid.clone(),
            config.request_timeout(),
        );
        log::debug!(
            "[DialpadClient] Created client {} ({} scheduler, host {})",
            config.client_uid,
            config.scheduler,
            config.host_origin
        );

        Self {
            inner: Arc::new(ClientInner {
                client_uid: config.client_uid.clone(),
                allowed_origins: config.origin_allow_list(),
                identity_check: config.identity_check,
                scheduler,
            }),
            listener: None,
        }
    }

    /// Consume inbound events from `events` on a background task.
    ///
    /// Replaces any previous listener. Must be called within a tokio runtime.
    pub fn listen(&mut self, mut events: mpsc::UnboundedReceiver<InboundEvent>) {
        self.stop_listening();
        let inner = Arc::clone(&self.inner);
        self.listener = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                inner.handle_event(event);
            }
            log::debug!("[DialpadClient] Inbound channel closed");
        }));
    }

    /// Stop the background listener, if any.
    pub fn stop_listening(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }

    /// Validate one inbound event and route it to the scheduler.
    pub fn handle_event(&self, event: InboundEvent) -> EventOutcome {
        self.inner.handle_event(event)
    }

    /// Identity of this embedded instance.
    pub fn client_uid(&self) -> &str {
        &self.inner.client_uid
    }

    /// Current handshake state.
    pub fn session(&self) -> SessionState {
        self.inner.scheduler.session()
    }

    /// The scheduler behind this client.
    pub fn scheduler(&self) -> &RequestScheduler {
        &self.inner.scheduler
    }

    /// Start the handshake. Resolves with the host's `init` content.
    pub fn init(&self) -> PendingResponse {
        self.inner.scheduler.initiate_init_request()
    }

    /// Data for the current host user.
    pub fn get_current_user(&self) -> PendingResponse {
        self.inner.scheduler.initiate_get_request(PATH_GET_USER)
    }

    /// Data for the active contact.
    pub fn get_current_contact(&self) -> PendingResponse {
        self.inner.scheduler.initiate_get_request(PATH_GET_CONTACT)
    }

    /// Data for the active call.
    pub fn get_current_call(&self) -> PendingResponse {
        self.inner.scheduler.initiate_get_request(PATH_GET_CALL)
    }

    /// Subscribe `callback` to call state events.
    pub fn on_call_state(
        &self,
        callback: &SubscriptionCallback,
    ) -> Result<PendingResponse, BridgeError> {
        self.inner
            .scheduler
            .initiate_on_request(PATH_ON_CALL, callback)
    }

    /// Remove the call state subscription made with `callback`.
    pub fn off_call_state(
        &self,
        callback: &SubscriptionCallback,
    ) -> Result<PendingResponse, BridgeError> {
        self.inner
            .scheduler
            .initiate_off_request(PATH_OFF_CALL, callback)
    }

    /// Subscribe `callback` to disconnect events.
    pub fn on_disconnect(
        &self,
        callback: &SubscriptionCallback,
    ) -> Result<PendingResponse, BridgeError> {
        self.inner
            .scheduler
            .initiate_on_request(PATH_ON_DISCONNECT, callback)
    }

    /// Remove the disconnect subscription made with `callback`.
    pub fn off_disconnect(
        &self,
        callback: &SubscriptionCallback,
    ) -> Result<PendingResponse, BridgeError> {
        self.inner
            .scheduler
            .initiate_off_request(PATH_OFF_DISCONNECT, callback)
    }

    /// Run the host's external authorization flow.
    ///
    /// Waits up to two minutes since the user has to interact with the host.
    pub fn auth(
        &self,
        callback: impl FnOnce(&InboundMessage) + Send + 'static,
        content: Value,
    ) -> PendingResponse {
        self.request(PATH_AUTH_EXTERNAL, Box::new(callback), Some(content), Some(AUTH_TIMEOUT))
    }

    /// Show a toast in the host.
    pub fn send_toast(
        &self,
        callback: impl FnOnce(&InboundMessage) + Send + 'static,
        content: Value,
    ) -> PendingResponse {
        self.request(PATH_SEND_TOAST, Box::new(callback), Some(content), None)
    }

    /// Push mapped contact details to the host.
    pub fn set_contact_details(
        &self,
        callback: impl FnOnce(&InboundMessage) + Send + 'static,
        content: Value,
    ) -> PendingResponse {
        self.request(PATH_SET_CONTACT, Box::new(callback), Some(content), None)
    }

    /// Forward an analytics event through the host.
    pub fn track_event(
        &self,
        callback: impl FnOnce(&InboundMessage) + Send + 'static,
        content: Value,
    ) -> PendingResponse {
        self.request(PATH_TRACK_EVENT, Box::new(callback), Some(content), None)
    }

    /// Ask whether the app should pop its CRM page for the active call.
    pub fn should_pop_crm_page(
        &self,
        callback: impl FnOnce(&InboundMessage) + Send + 'static,
    ) -> PendingResponse {
        self.request(PATH_GET_SCREEN_POP, Box::new(callback), None, None)
    }

    fn request(
        &self,
        path: &str,
        callback: ResponseCallback,
        content: Option<Value>,
        timeout: Option<std::time::Duration>,
    ) -> PendingResponse {
        self.inner.scheduler.initiate_request(
            path,
            ResponseHook::Callback(callback),
            None,
            content,
            timeout,
        )
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MpscTransport;
    use serde_json::json;

    fn client(identity_check: IdentityCheck) -> Client {
        let (transport, _rx) = MpscTransport::pair();
        let config = ClientConfig {
            client_uid: "frame-1".into(),
            identity_check,
            ..ClientConfig::default()
        };
        Client::new(&config, Arc::new(transport))
    }

    fn event(data: Value) -> InboundEvent {
        InboundEvent::new(data, "https://dialpad.com")
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(None));
        assert!(!is_truthy(Some(&Value::Null)));
        assert!(!is_truthy(Some(&json!(""))));
        assert!(!is_truthy(Some(&json!(0))));
        assert!(!is_truthy(Some(&json!(false))));
        assert!(is_truthy(Some(&json!("ctx"))));
        assert!(is_truthy(Some(&json!(7))));
        assert!(is_truthy(Some(&json!({}))));
    }

    #[test]
    fn test_new_outside_runtime() {
        let client = client(IdentityCheck::Strict);
        assert_eq!(client.session(), SessionState::Uninitialized);
        assert_eq!(client.scheduler().pending_count(), 0);
        assert_eq!(client.client_uid(), "frame-1");
    }

    #[tokio::test]
    async fn test_chatter_is_ignored() {
        let client = client(IdentityCheck::Strict);
        assert!(matches!(
            client.handle_event(event(json!({ "type": "webpackOk" }))),
            EventOutcome::Ignored
        ));
        assert!(matches!(
            client.handle_event(event(json!("hello"))),
            EventOutcome::Ignored
        ));
    }

    #[tokio::test]
    async fn test_missing_field_dropped() {
        let client = client(IdentityCheck::Strict);
        let outcome = client.handle_event(event(json!({
            "client_uid": "frame-1",
            "message_uid": "m-1",
            "service": "svc",
            "context": "",
            "path": "get/user"
        })));
        assert!(matches!(outcome, EventOutcome::Dropped(BridgeError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_disallowed_origin_dropped() {
        let client = client(IdentityCheck::Strict);
        let outcome = client.handle_event(InboundEvent::new(
            json!({
                "client_uid": "frame-1",
                "message_uid": "m-1",
                "service": "svc",
                "context": "ctx",
                "path": "get/user"
            }),
            "https://evil.example",
        ));
        assert!(matches!(outcome, EventOutcome::Dropped(BridgeError::Origin(ref o)) if o == "https://evil.example"));
    }

    #[tokio::test]
    async fn test_strict_identity_mismatch_dropped() {
        let client = client(IdentityCheck::Strict);
        let outcome = client.handle_event(event(json!({
            "client_uid": "frame-2",
            "message_uid": "m-1",
            "service": "svc",
            "context": "ctx",
            "path": "get/user"
        })));
        match outcome {
            EventOutcome::Dropped(BridgeError::Protocol(reason)) => {
                assert!(reason.contains("does not match"));
            }
            other => panic!("expected identity rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_legacy_identity_passes_to_scheduler() {
        let client = client(IdentityCheck::Legacy);
        // Passes validation; the scheduler then reports the unknown uid.
        let outcome = client.handle_event(event(json!({
            "client_uid": "frame-2",
            "message_uid": "m-1",
            "service": "svc",
            "context": "ctx",
            "path": "get/user"
        })));
        match outcome {
            EventOutcome::Dropped(BridgeError::Protocol(reason)) => {
                assert!(reason.contains("Unexpected response"));
            }
            other => panic!("expected orphan response, got {other:?}"),
        }
    }
}
