//! In-process stand-in for the host frame.
//!
//! `LoopbackHost` consumes what an [`MpscTransport`](crate::transport::MpscTransport)
//! sends and answers the way the real host does:
//!
//! | Request | Reply |
//! |---|---|
//! | `init` | `200` with the host's context/service tokens |
//! | `get/*` | `200` with the fixture for the path (`null` if none) |
//! | `on/*` | `201`, then `200` events on every [`emit`](LoopbackHost::emit) |
//! | `off/*` | `200`, subscriptions of that client on `on/*` are dropped |
//! | anything else | `200` echoing the request content |
//!
//! Paths can be made to fail with a status or to never answer, which is how
//! timeouts and error responses are exercised end to end.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::constants::{OK, PATH_INIT, SUBSCRIPTION_ADDED};
use crate::message::{subscriber_path, InboundEvent, InboundMessage, OutboundMessage, StatusCode};
use crate::transport::OutboundEnvelope;

#[derive(Debug, Clone)]
struct Subscriber {
    client_uid: String,
    message_uid: String,
}

#[derive(Debug, Default)]
struct HostState {
    fixtures: HashMap<String, Value>,
    failures: HashMap<String, StatusCode>,
    silent: HashSet<String>,
    subscriptions: HashMap<String, Vec<Subscriber>>,
    received: Vec<OutboundMessage>,
}

/// A scripted host answering requests over in-process channels.
///
/// Cloning yields another handle to the same host.
#[derive(Debug, Clone)]
pub struct LoopbackHost {
    origin: String,
    context: Value,
    service: Value,
    events: mpsc::UnboundedSender<InboundEvent>,
    state: Arc<Mutex<HostState>>,
}

impl LoopbackHost {
    /// Create a host at `origin` delivering replies into `events`.
    pub fn new(origin: impl Into<String>, events: mpsc::UnboundedSender<InboundEvent>) -> Self {
        Self {
            origin: origin.into(),
            context: json!("loopback-context"),
            service: json!("loopback-service"),
            events,
            state: Arc::new(Mutex::new(HostState::default())),
        }
    }

    /// Use `context` and `service` as the tokens handed out on `init`.
    #[must_use]
    pub fn with_tokens(mut self, context: Value, service: Value) -> Self {
        self.context = context;
        self.service = service;
        self
    }

    /// Answer `path` with `content`.
    #[must_use]
    pub fn with_fixture(self, path: &str, content: Value) -> Self {
        self.lock().fixtures.insert(path.to_string(), content);
        self
    }

    /// Answer `path` with an error `status`.
    #[must_use]
    pub fn with_failure(self, path: &str, status: StatusCode) -> Self {
        self.lock().failures.insert(path.to_string(), status);
        self
    }

    /// Never answer `path`.
    #[must_use]
    pub fn with_silence(self, path: &str) -> Self {
        self.lock().silent.insert(path.to_string());
        self
    }

    /// Every request received so far, in arrival order.
    pub fn received(&self) -> Vec<OutboundMessage> {
        self.lock().received.clone()
    }

    /// Paths of every request received so far.
    pub fn received_paths(&self) -> Vec<String> {
        self.lock().received.iter().map(|m| m.path.clone()).collect()
    }

    /// Number of subscribers on a path such as `on/call`.
    pub fn subscriber_count(&self, path: &str) -> usize {
        self.lock().subscriptions.get(path).map_or(0, Vec::len)
    }

    /// Answer everything arriving on `outbound` until the channel closes.
    pub fn serve(&self, mut outbound: mpsc::UnboundedReceiver<OutboundEnvelope>) -> JoinHandle<()> {
        let host = self.clone();
        tokio::spawn(async move {
            while let Some(envelope) = outbound.recv().await {
                host.handle(envelope);
            }
            log::debug!("[LoopbackHost] Outbound channel closed");
        })
    }

    /// Answer one outbound message.
    pub fn handle(&self, envelope: OutboundEnvelope) {
        let OutboundEnvelope {
            target_origin,
            message,
        } = envelope;

        if target_origin != self.origin {
            log::warn!(
                "[LoopbackHost] Discarding message addressed to {target_origin} (host is {})",
                self.origin
            );
            return;
        }

        let reply = {
            let mut state = self.lock();
            state.received.push(message.clone());

            if state.silent.contains(&message.path) {
                log::debug!("[LoopbackHost] Not answering {}", message.path);
                return;
            }

            if let Some(status) = state.failures.get(&message.path).copied() {
                self.reply(&message, status, json!({ "error": status.0 }))
            } else {
                self.answer(&mut state, &message)
            }
        };

        self.deliver(&reply);
    }

    /// Send an event with `content` to every subscriber of `path`.
    ///
    /// Returns the number of subscribers notified.
    pub fn emit(&self, path: &str, content: &Value) -> usize {
        let subscribers = self
            .lock()
            .subscriptions
            .get(path)
            .cloned()
            .unwrap_or_default();

        for subscriber in &subscribers {
            let event = InboundMessage {
                path: path.to_string(),
                client_uid: subscriber.client_uid.clone(),
                message_uid: subscriber.message_uid.clone(),
                context: Some(self.context.clone()),
                service: Some(self.service.clone()),
                content: content.clone(),
                status_code: Some(OK),
            };
            self.deliver(&event);
        }
        subscribers.len()
    }

    fn answer(&self, state: &mut HostState, message: &OutboundMessage) -> InboundMessage {
        let path = message.path.as_str();
        let verb = path.split('/').next().unwrap_or_default();

        match verb {
            PATH_INIT => {
                let content = state
                    .fixtures
                    .get(path)
                    .cloned()
                    .unwrap_or_else(|| json!({ "host": "loopback" }));
                self.reply(message, OK, content)
            }
            "get" => {
                let content = state.fixtures.get(path).cloned().unwrap_or(Value::Null);
                self.reply(message, OK, content)
            }
            "on" => {
                state
                    .subscriptions
                    .entry(path.to_string())
                    .or_default()
                    .push(Subscriber {
                        client_uid: message.client_uid.clone(),
                        message_uid: message.message_uid.clone(),
                    });
                self.reply(message, SUBSCRIPTION_ADDED, Value::Null)
            }
            "off" => {
                let on_path = subscriber_path(path);
                if let Some(subscribers) = state.subscriptions.get_mut(&on_path) {
                    subscribers.retain(|s| s.client_uid != message.client_uid);
                    if subscribers.is_empty() {
                        state.subscriptions.remove(&on_path);
                    }
                }
                self.reply(message, OK, Value::Null)
            }
            _ => self.reply(
                message,
                OK,
                message.content.clone().unwrap_or(Value::Null),
            ),
        }
    }

    fn reply(&self, message: &OutboundMessage, status: StatusCode, content: Value) -> InboundMessage {
        InboundMessage {
            path: message.path.clone(),
            client_uid: message.client_uid.clone(),
            message_uid: message.message_uid.clone(),
            context: Some(self.context.clone()),
            service: Some(self.service.clone()),
            content,
            status_code: Some(status),
        }
    }

    fn deliver(&self, message: &InboundMessage) {
        let data = match serde_json::to_value(message) {
            Ok(data) => data,
            Err(e) => {
                log::error!("[LoopbackHost] Failed to encode reply: {e}");
                return;
            }
        };
        if self
            .events
            .send(InboundEvent::new(data, self.origin.clone()))
            .is_err()
        {
            log::debug!("[LoopbackHost] Client channel closed, reply dropped");
        }
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
