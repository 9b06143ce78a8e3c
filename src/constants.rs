//! Protocol-wide constants for the embedded client.
//!
//! Centralizes timeouts, status codes and request paths so the scheduler,
//! the client and the loopback host agree on a single set of values.
//!
//! # Categories
//!
//! - **Timeouts**: how long a request may wait for the host
//! - **Status codes**: success, subscription acknowledgement and error codes
//! - **Paths**: the `verb/noun` strings understood by the host

use std::time::Duration;

use crate::message::StatusCode;

// ============================================================================
// Timeouts
// ============================================================================

/// Default time a request may wait for its response.
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

/// Timeout for the `auth/external` flow.
///
/// The host shows an interactive authorization prompt, so the user needs
/// far longer than a data request would.
pub const AUTH_TIMEOUT: Duration = Duration::from_millis(120_000);

// ============================================================================
// Status codes
// ============================================================================

/// Request handled successfully (also used for subscription events).
pub const OK: StatusCode = StatusCode(200);

/// Host acknowledged an `on/...` subscription.
pub const SUBSCRIPTION_ADDED: StatusCode = StatusCode(201);

/// Status codes that reject the pending request with a client error.
pub const ERROR_STATUSES: &[StatusCode] = &[
    StatusCode(400),
    StatusCode(401),
    StatusCode(403),
    StatusCode(404),
    StatusCode(408),
    StatusCode(409),
    StatusCode(500),
    StatusCode(503),
];

// ============================================================================
// Paths
// ============================================================================

/// Handshake path. The only request allowed before the client is ready.
pub const PATH_INIT: &str = "init";

/// Current host user.
pub const PATH_GET_USER: &str = "get/user";

/// Active contact.
pub const PATH_GET_CONTACT: &str = "get/contact";

/// Active call.
pub const PATH_GET_CALL: &str = "get/call";

/// Whether the embedded app should pop its CRM page.
pub const PATH_GET_SCREEN_POP: &str = "get/screen_pop";

/// Call state subscription.
pub const PATH_ON_CALL: &str = "on/call";

/// Call state unsubscription.
pub const PATH_OFF_CALL: &str = "off/call";

/// Disconnect subscription.
pub const PATH_ON_DISCONNECT: &str = "on/disconnect";

/// Disconnect unsubscription.
pub const PATH_OFF_DISCONNECT: &str = "off/disconnect";

/// External authorization flow.
pub const PATH_AUTH_EXTERNAL: &str = "auth/external";

/// Toast notification shown by the host.
pub const PATH_SEND_TOAST: &str = "send/toast";

/// Contact detail update.
pub const PATH_SET_CONTACT: &str = "set/contact";

/// Analytics event forwarded by the host.
pub const PATH_TRACK_EVENT: &str = "track/event";

// ============================================================================
// Development origins
// ============================================================================

/// Local dev server origin allowed in development builds.
pub const DEV_LOCALHOST_ORIGIN: &str = "http://localhost:8087";

/// Default host origin when `DIALPAD_URL` is not set.
pub const DEFAULT_HOST_ORIGIN: &str = "https://dialpad.com";
