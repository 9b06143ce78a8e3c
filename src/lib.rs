//! Dialpad embed client - request/response protocol for apps embedded in the host frame.
//!
//! An embedded app and its host share a single unordered, fire-and-forget
//! message channel. This crate turns that channel into typed requests with
//! timeouts, long-lived event subscriptions, per-path concurrency control,
//! and validation of everything the channel delivers.
//!
//! # Architecture
//!
//! - **Client** - Verb API and inbound validation (origin, fields, identity)
//! - **RequestScheduler** - Correlation ids, pending completions, timeouts
//! - **SchedulingPolicy** - `RejectConflict` (per-path lock) or `Queue` (global FIFO)
//! - **CallbackRegistry** - Subscription callbacks keyed by path
//! - **Transport** - Outbound half of the channel, provided by the embedder
//!
//! # Modules
//!
//! - [`client`] - The embedded-side client
//! - [`scheduler`] - Request scheduling and response settlement
//! - [`config`] - Configuration loading with environment overrides
//! - [`host`] - In-process host for tests and demos

pub mod client;
pub mod config;
pub mod constants;
pub mod env;
pub mod error;
pub mod host;
pub mod message;
pub mod origin;
pub mod registry;
pub mod scheduler;
pub mod transport;

// Re-export commonly used types
pub use client::{Client, EventOutcome};
pub use config::{ClientConfig, IdentityCheck};
pub use error::BridgeError;
pub use host::LoopbackHost;
pub use message::{InboundEvent, InboundMessage, OutboundMessage, StatusCode};
pub use registry::{CallbackRegistry, SubscriptionCallback};
pub use scheduler::{PendingResponse, RequestScheduler, SchedulerKind, SessionState};
pub use transport::{MpscTransport, OutboundEnvelope, Transport, TransportError};
