//! Request scheduling over the host channel.
//!
//! Every request becomes exactly one transport send. The scheduler assigns
//! the correlation id, registers a pending completion guarded by a timeout,
//! decides (through its [`SchedulingPolicy`]) when the message may go out,
//! and settles the completion when the matching response arrives.
//!
//! # Architecture
//!
//! ```text
//! RequestScheduler
//!     ├── SchedulerState (one mutex, never held across .await or user callbacks)
//!     │   ├── SessionState      Uninitialized → Initializing → Ready
//!     │   ├── pending           message_uid → PendingRequest
//!     │   ├── CallbackRegistry  on/... subscriptions
//!     │   └── SchedulingPolicy  RejectConflict | Queue
//!     └── Transport (fire-and-forget send to the host origin)
//! ```
//!
//! # Settlement
//!
//! A pending request is settled exactly once: by its response, by an error
//! status, by its timer, by a transport failure, or by an unsubscribe. Every
//! path aborts the timer task, and an expired request is deregistered so a
//! late response is reported as a protocol error instead of resolving
//! anything. Subscriptions stay registered after their first response so
//! later events reach the callback.

pub mod queue;
pub mod reject_conflict;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::constants::{PATH_INIT, REQUEST_TIMEOUT};
use crate::error::BridgeError;
use crate::message::{describe, subscriber_path, InboundMessage, OutboundMessage, StatusCode};
use crate::registry::{CallbackRegistry, SubscriptionCallback};
use crate::transport::{Transport, TransportError};

pub use queue::QueuePolicy;
pub use reject_conflict::RejectConflictPolicy;

/// Outcome of asking a policy whether a message may be transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Send the message now.
    Transmit,
    /// The policy holds the message and hands it back from `release`.
    Deferred,
}

/// Concurrency-control strategy governing when requests reach the channel.
pub trait SchedulingPolicy: Send + std::fmt::Debug {
    /// Decide whether `message` may be sent now.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Conflict`] when the policy refuses the request
    /// outright; nothing is sent and nothing is registered.
    fn admit(&mut self, message: &OutboundMessage) -> Result<Admission, BridgeError>;

    /// The request `message_uid` on `path` no longer occupies a slot.
    ///
    /// Returns the next held-back message that should now be transmitted.
    fn release(&mut self, message_uid: &str, path: &str) -> Option<OutboundMessage>;

    /// Whether a non-error subscription response with `status` reaches the callback.
    fn delivers_event(&self, status: Option<StatusCode>) -> bool;
}

/// Which scheduling policy a client uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    /// At most one request per path; conflicting requests are rejected.
    #[default]
    RejectConflict,
    /// One global FIFO; a single request in flight at any time.
    Queue,
}

impl SchedulerKind {
    /// Build a fresh policy of this kind.
    pub fn policy(self) -> Box<dyn SchedulingPolicy> {
        match self {
            Self::RejectConflict => Box::new(RejectConflictPolicy::default()),
            Self::Queue => Box::new(QueuePolicy::default()),
        }
    }
}

impl FromStr for SchedulerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reject_conflict" | "reject-conflict" | "rejectConflict" => Ok(Self::RejectConflict),
            "queue" => Ok(Self::Queue),
            other => anyhow::bail!("Unknown scheduler type: {other}"),
        }
    }
}

impl std::fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RejectConflict => write!(f, "reject_conflict"),
            Self::Queue => write!(f, "queue"),
        }
    }
}

/// Handshake state of the client.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    /// No `init` has been sent.
    #[default]
    Uninitialized,
    /// `init` is in flight.
    Initializing,
    /// The host answered `init`; its tokens are echoed on every message.
    Ready {
        /// Host-assigned context token.
        context: Option<Value>,
        /// Host-assigned service token.
        service: Option<Value>,
    },
}

impl SessionState {
    /// Returns `true` once the handshake has completed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    fn tokens(&self) -> (Option<Value>, Option<Value>) {
        match self {
            Self::Ready { context, service } => (context.clone(), service.clone()),
            _ => (None, None),
        }
    }
}

/// Callback receiving the raw response of a one-shot request.
pub type ResponseCallback = Box<dyn FnOnce(&InboundMessage) + Send>;

/// Verb-specific handling applied when a successful response arrives.
pub enum ResponseHook {
    /// Store the host tokens and mark the session ready.
    Init,
    /// One-shot data request.
    Get,
    /// Subscription: the first response acknowledges it, later ones are events.
    On(SubscriptionCallback),
    /// Unsubscription.
    Off,
    /// One-shot request whose caller also wants the raw response.
    Callback(ResponseCallback),
}

impl std::fmt::Debug for ResponseHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "Init"),
            Self::Get => write!(f, "Get"),
            Self::On(cb) => f.debug_tuple("On").field(cb).finish(),
            Self::Off => write!(f, "Off"),
            Self::Callback(_) => write!(f, "Callback(..)"),
        }
    }
}

type Completion = oneshot::Sender<Result<Value, BridgeError>>;

/// Bookkeeping for one request awaiting its response.
#[derive(Debug)]
struct PendingRequest {
    path: String,
    hook: ResponseHook,
    /// `None` once a subscription has been acknowledged.
    completion: Option<Completion>,
    timer: Option<JoinHandle<()>>,
    /// Distinguishes this request from earlier ones that reused its uid.
    generation: u64,
}

impl PendingRequest {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Work that must run after the state lock is released, in push order.
///
/// Completions are deferred too so a caller never observes its response
/// before the verb's hook has run.
enum Deferred {
    Event(SubscriptionCallback, Value),
    Response(ResponseCallback, InboundMessage),
    Resolve(Completion, Value),
}

impl Deferred {
    fn run(self) {
        match self {
            Self::Event(callback, content) => callback.call(&content),
            Self::Response(callback, message) => callback(&message),
            Self::Resolve(completion, content) => {
                let _ = completion.send(Ok(content));
            }
        }
    }
}

#[derive(Debug)]
struct SchedulerState {
    session: SessionState,
    pending: HashMap<String, PendingRequest>,
    registry: CallbackRegistry,
    policy: Box<dyn SchedulingPolicy>,
    next_generation: u64,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<SchedulerState>,
    transport: Arc<dyn Transport>,
    host_origin: String,
    client_uid: String,
    default_timeout: Duration,
}

/// Turns logical requests into transport sends and settles their responses.
///
/// Cloning yields another handle to the same scheduler.
#[derive(Debug, Clone)]
pub struct RequestScheduler {
    shared: Arc<Shared>,
}

impl RequestScheduler {
    /// Create a scheduler sending through `transport` to `host_origin`.
    ///
    /// Construction needs no runtime, but every request spawns its timeout
    /// timer with `tokio::spawn`, so requests must be issued from within a
    /// tokio runtime or they panic.
    pub fn new(
        kind: SchedulerKind,
        transport: Arc<dyn Transport>,
        host_origin: impl Into<String>,
        client_uid: impl Into<String>,
    ) -> Self {
        Self::with_timeout(kind, transport, host_origin, client_uid, REQUEST_TIMEOUT)
    }

    /// Create a scheduler with a custom default request timeout.
    ///
    /// Same runtime requirement as [`new`](Self::new).
    pub fn with_timeout(
        kind: SchedulerKind,
        transport: Arc<dyn Transport>,
        host_origin: impl Into<String>,
        client_uid: impl Into<String>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState {
                    session: SessionState::default(),
                    pending: HashMap::new(),
                    registry: CallbackRegistry::new(),
                    policy: kind.policy(),
                    next_generation: 0,
                }),
                transport,
                host_origin: host_origin.into(),
                client_uid: client_uid.into(),
                default_timeout,
            }),
        }
    }

    /// Current handshake state.
    pub fn session(&self) -> SessionState {
        self.lock().session.clone()
    }

    /// Number of requests (including live subscriptions) awaiting responses.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Number of callbacks subscribed to `path`.
    pub fn subscriber_count(&self, path: &str) -> usize {
        self.lock().registry.subscriber_count(path)
    }

    /// Request data from the host, e.g. `get/user`.
    pub fn initiate_get_request(&self, path: &str) -> PendingResponse {
        self.initiate_request(path, ResponseHook::Get, None, None, None)
    }

    /// Start the handshake.
    pub fn initiate_init_request(&self) -> PendingResponse {
        self.initiate_request(PATH_INIT, ResponseHook::Init, None, None, None)
    }

    /// Subscribe `callback` to events on `path`, e.g. `on/call`.
    ///
    /// The returned response settles with the host's acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::DuplicateSubscription`] if `callback` is
    /// already subscribed to `path`. Other failures settle the returned
    /// response instead.
    pub fn initiate_on_request(
        &self,
        path: &str,
        callback: &SubscriptionCallback,
    ) -> Result<PendingResponse, BridgeError> {
        let message_uid = Uuid::new_v4().to_string();
        let mut state = self.lock();
        state
            .registry
            .add_callback_to_registry(path, callback.clone(), &message_uid)?;

        let started = self.start(
            &mut state,
            path,
            ResponseHook::On(callback.clone()),
            Some(message_uid.clone()),
            None,
            None,
        );
        Ok(match started {
            Ok(rx) => PendingResponse::waiting(message_uid, rx),
            Err(e) => {
                state.registry.remove_from_registry(path, &message_uid);
                PendingResponse::settled(Err(e))
            }
        })
    }

    /// Remove the subscription made with `callback`; `path` is e.g. `off/call`.
    ///
    /// The host is only told to stop sending events once the last subscriber
    /// of the matching `on/...` path is gone; otherwise the returned response
    /// is already settled with `null`. If that `off/...` request is refused
    /// (not initialized, path conflict) the subscription is kept and the
    /// returned response settles with the refusal.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnsubscribeMismatch`] if no subscription on the
    /// matching path was made with `callback`.
    pub fn initiate_off_request(
        &self,
        path: &str,
        callback: &SubscriptionCallback,
    ) -> Result<PendingResponse, BridgeError> {
        let on_path = subscriber_path(path);
        let mut state = self.lock();

        let Some(message_uid) = state
            .registry
            .get_message_uid(&on_path, callback)
            .map(str::to_owned)
        else {
            log::warn!("[Scheduler] No subscription exists for path: {on_path}");
            return Err(BridgeError::UnsubscribeMismatch { path: on_path });
        };

        // The host is only told when the last subscriber leaves. That request
        // must be admitted before anything is removed, so a refusal leaves
        // the subscription intact and the call can be retried.
        let response = if state.registry.subscriber_count(&on_path) > 1 {
            log::debug!("[Scheduler] Removing one subscriber from {on_path}, others remain");
            PendingResponse::settled(Ok(Value::Null))
        } else {
            let off_uid = Uuid::new_v4().to_string();
            match self.start(
                &mut state,
                path,
                ResponseHook::Off,
                Some(off_uid.clone()),
                None,
                None,
            ) {
                Ok(rx) => PendingResponse::waiting(off_uid, rx),
                Err(e) => return Ok(PendingResponse::settled(Err(e))),
            }
        };

        state.registry.remove_from_registry(&on_path, &message_uid);
        if let Some(mut pending) = state.pending.remove(&message_uid) {
            pending.cancel_timer();
            // An unacknowledged subscription still holds its policy slot.
            if pending.completion.take().is_some() {
                let next = state.policy.release(&message_uid, &pending.path);
                self.advance(&mut state, next);
            }
        }
        Ok(response)
    }

    /// Send a request to the host.
    ///
    /// * `path` - Request path (e.g. `get/user`)
    /// * `hook` - Response handling for this verb
    /// * `message_uid` - Correlation id; a fresh UUID when `None`
    /// * `content` - Payload passed to the host
    /// * `timeout` - Response window; the scheduler default when `None`
    ///
    /// Refusals (not initialized, path conflict) settle the returned response
    /// immediately without sending anything.
    pub fn initiate_request(
        &self,
        path: &str,
        hook: ResponseHook,
        message_uid: Option<String>,
        content: Option<Value>,
        timeout: Option<Duration>,
    ) -> PendingResponse {
        let mut state = self.lock();
        let message_uid = message_uid.unwrap_or_else(|| Uuid::new_v4().to_string());
        match self.start(
            &mut state,
            path,
            hook,
            Some(message_uid.clone()),
            content,
            timeout,
        ) {
            Ok(rx) => PendingResponse::waiting(message_uid, rx),
            Err(e) => PendingResponse::settled(Err(e)),
        }
    }

    /// Route a validated inbound message to the request it answers.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Protocol`] if no pending request matches the
    /// message's `message_uid`. The message is delivered to nobody.
    pub fn execute_handler(&self, message: InboundMessage) -> Result<(), BridgeError> {
        let mut deferred = Vec::new();
        let result = {
            let mut state = self.lock();
            self.settle(&mut state, message, &mut deferred)
        };

        for work in deferred {
            work.run();
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn start(
        &self,
        state: &mut SchedulerState,
        path: &str,
        hook: ResponseHook,
        message_uid: Option<String>,
        content: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<oneshot::Receiver<Result<Value, BridgeError>>, BridgeError> {
        if path != PATH_INIT && !state.session.is_ready() {
            log::warn!("[Scheduler] Error: Client is not Initialized. (path={path})");
            return Err(BridgeError::NotInitialized);
        }

        let message_uid = message_uid.unwrap_or_else(|| Uuid::new_v4().to_string());
        if state.pending.contains_key(&message_uid) {
            return Err(BridgeError::Protocol(format!(
                "message_uid: {message_uid} is already pending"
            )));
        }

        let (context, service) = state.session.tokens();
        let message = OutboundMessage {
            path: path.to_string(),
            client_uid: self.shared.client_uid.clone(),
            message_uid: message_uid.clone(),
            context,
            service,
            content,
        };

        let admission = state.policy.admit(&message)?;

        if path == PATH_INIT && state.session == SessionState::Uninitialized {
            state.session = SessionState::Initializing;
        }

        let generation = state.next_generation;
        state.next_generation += 1;

        let (tx, rx) = oneshot::channel();
        let timer = self.spawn_timer(
            message_uid.clone(),
            generation,
            timeout.unwrap_or(self.shared.default_timeout),
        );
        state.pending.insert(
            message_uid.clone(),
            PendingRequest {
                path: path.to_string(),
                hook,
                completion: Some(tx),
                timer: Some(timer),
                generation,
            },
        );

        match admission {
            Admission::Transmit => {
                if let Err(e) = self.transmit(state, message) {
                    let next = Self::fail(state, &message_uid, e.into());
                    self.advance(state, next);
                }
            }
            Admission::Deferred => {
                log::debug!("[Scheduler] Queued {path} (message_uid={message_uid})");
            }
        }

        Ok(rx)
    }

    fn spawn_timer(&self, message_uid: String, generation: u64, timeout: Duration) -> JoinHandle<()> {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = shared.upgrade() {
                RequestScheduler { shared }.expire(&message_uid, generation);
            }
        })
    }

    fn expire(&self, message_uid: &str, generation: u64) {
        let mut state = self.lock();
        let Some(pending) = state.pending.get(message_uid) else {
            return;
        };
        // A timer aborted while waiting on the lock may fire for a newer
        // request that reused the uid.
        if pending.generation != generation {
            return;
        }
        // Acknowledged subscriptions have no deadline.
        if pending.completion.is_none() {
            return;
        }

        let error = BridgeError::Timeout {
            message_uid: message_uid.to_string(),
            path: pending.path.clone(),
        };
        log::warn!("[Scheduler] {error}");
        let next = Self::fail(&mut state, message_uid, error);
        self.advance(&mut state, next);
    }

    /// Transmit with the session tokens current at send time.
    fn transmit(
        &self,
        state: &SchedulerState,
        mut message: OutboundMessage,
    ) -> Result<(), TransportError> {
        if message.path != PATH_INIT {
            (message.context, message.service) = state.session.tokens();
        }
        log::debug!(
            "[Scheduler] Sending {} (message_uid={})",
            message.path,
            message.message_uid
        );
        self.shared
            .transport
            .send(&self.shared.host_origin, &message)
    }

    /// Transmit the next released message, failing forward on send errors.
    fn advance(&self, state: &mut SchedulerState, mut next: Option<OutboundMessage>) {
        while let Some(message) = next.take() {
            let message_uid = message.message_uid.clone();
            if let Err(e) = self.transmit(state, message) {
                log::warn!("[Scheduler] Failed to send queued message_uid={message_uid}: {e}");
                next = Self::fail(state, &message_uid, e.into());
            }
        }
    }

    /// Settle a pending request with `error` and release its slot.
    fn fail(
        state: &mut SchedulerState,
        message_uid: &str,
        error: BridgeError,
    ) -> Option<OutboundMessage> {
        let mut pending = state.pending.remove(message_uid)?;
        pending.cancel_timer();

        if matches!(pending.hook, ResponseHook::On(_)) {
            state.registry.remove_from_registry(&pending.path, message_uid);
        }
        if pending.path == PATH_INIT && state.session == SessionState::Initializing {
            state.session = SessionState::Uninitialized;
        }

        let completion = pending.completion.take()?;
        let _ = completion.send(Err(error));
        state.policy.release(message_uid, &pending.path)
    }

    fn settle(
        &self,
        state: &mut SchedulerState,
        message: InboundMessage,
        deferred: &mut Vec<Deferred>,
    ) -> Result<(), BridgeError> {
        let message_uid = message.message_uid.clone();

        let Some(pending) = state.pending.get_mut(&message_uid) else {
            let reason = format!(
                "Unexpected response message_uid: {}, path: {}",
                message.message_uid, message.path
            );
            if let Ok(data) = serde_json::to_value(&message) {
                log::warn!("{}", describe(&data));
            }
            log::warn!("[Scheduler] {reason}");
            return Err(BridgeError::Protocol(reason));
        };

        pending.cancel_timer();
        let subscription = match &pending.hook {
            ResponseHook::On(callback) => Some(callback.clone()),
            _ => None,
        };
        let acknowledged = pending.completion.is_none();

        if let Some(status) = message.status_code.filter(|s| s.is_error()) {
            log::warn!("[Scheduler] Status: {status} (path={})", message.path);
            if acknowledged {
                // Error event on a live subscription: drop it, keep the subscription.
                return Ok(());
            }
            let next = Self::fail(
                state,
                &message_uid,
                BridgeError::Client {
                    status,
                    message: Box::new(message),
                },
            );
            self.advance(state, next);
            return Ok(());
        }

        if let Some(callback) = subscription {
            let completion = pending.completion.take();
            let path = pending.path.clone();
            if state.policy.delivers_event(message.status_code) {
                deferred.push(Deferred::Event(callback, message.content.clone()));
            }
            if let Some(completion) = completion {
                deferred.push(Deferred::Resolve(completion, message.content));
                let next = state.policy.release(&message_uid, &path);
                self.advance(state, next);
            }
            return Ok(());
        }

        let Some(pending) = state.pending.remove(&message_uid) else {
            return Ok(());
        };
        let PendingRequest {
            path,
            hook,
            completion,
            ..
        } = pending;

        match hook {
            ResponseHook::Init => {
                log::info!("[Scheduler] Handshake complete");
                state.session = SessionState::Ready {
                    context: message.context.clone(),
                    service: message.service.clone(),
                };
            }
            ResponseHook::Callback(callback) => {
                deferred.push(Deferred::Response(callback, message.clone()));
            }
            ResponseHook::Get | ResponseHook::Off | ResponseHook::On(_) => {}
        }

        if let Some(completion) = completion {
            deferred.push(Deferred::Resolve(completion, message.content));
        }
        let next = state.policy.release(&message_uid, &path);
        self.advance(state, next);
        Ok(())
    }
}

/// The eventual response to a request.
///
/// Resolves to the response `content`, or to the error that settled the
/// request. The request is sent whether or not this future is awaited.
#[derive(Debug)]
pub struct PendingResponse {
    message_uid: Option<String>,
    state: ResponseState,
}

#[derive(Debug)]
enum ResponseState {
    Settled(Option<Result<Value, BridgeError>>),
    Waiting(oneshot::Receiver<Result<Value, BridgeError>>),
}

impl PendingResponse {
    fn waiting(message_uid: String, rx: oneshot::Receiver<Result<Value, BridgeError>>) -> Self {
        Self {
            message_uid: Some(message_uid),
            state: ResponseState::Waiting(rx),
        }
    }

    fn settled(result: Result<Value, BridgeError>) -> Self {
        Self {
            message_uid: None,
            state: ResponseState::Settled(Some(result)),
        }
    }

    /// Correlation id of the request, when one was registered.
    pub fn message_uid(&self) -> Option<&str> {
        self.message_uid.as_deref()
    }

    /// Returns `true` if the response was settled before anything was sent.
    pub fn is_settled(&self) -> bool {
        matches!(self.state, ResponseState::Settled(_))
    }
}

impl Future for PendingResponse {
    type Output = Result<Value, BridgeError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            ResponseState::Settled(result) => {
                Poll::Ready(result.take().unwrap_or(Err(BridgeError::Cancelled)))
            }
            ResponseState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or_else(|_dropped| Err(BridgeError::Cancelled))),
        }
    }
}
