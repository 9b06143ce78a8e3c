//! Client configuration.
//!
//! Loaded from an optional JSON file, then overridden by environment
//! variables:
//!
//! | Variable | Field |
//! |---|---|
//! | `DIALPAD_URL` | `host_origin` |
//! | `DPI_CLIENT_UID` | `client_uid` |
//! | `DPI_SCHEDULER` | `scheduler` (`reject_conflict` or `queue`) |
//! | `DPI_IDENTITY_CHECK` | `identity_check` (`strict` or `legacy`) |
//! | `DPI_REQUEST_TIMEOUT_MS` | `request_timeout_ms` |
//!
//! In development (`DPI_ENV=dev`), or when `DPI_REMOTE_LOCALHOST` is set,
//! the local dev server origin and `DPI_BASE_URL` are also allowed.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{DEFAULT_HOST_ORIGIN, DEV_LOCALHOST_ORIGIN, REQUEST_TIMEOUT};
use crate::env::Environment;
use crate::origin::OriginAllowList;
use crate::scheduler::SchedulerKind;

/// How inbound `client_uid` values are checked against this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityCheck {
    /// Drop messages addressed to another client instance.
    #[default]
    Strict,
    /// Accept any `client_uid`, as older clients did.
    Legacy,
}

impl FromStr for IdentityCheck {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Self::Strict),
            "legacy" => Ok(Self::Legacy),
            other => anyhow::bail!("Unknown identity check: {other}"),
        }
    }
}

impl std::fmt::Display for IdentityCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Legacy => write!(f, "legacy"),
        }
    }
}

/// Configuration for a [`Client`](crate::client::Client).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Origin of the host frame; every message is addressed to it.
    pub host_origin: String,
    /// Identity of this embedded instance (the frame name in a browser).
    pub client_uid: String,
    /// Origins accepted in addition to `host_origin`. Entries may use `*`.
    pub allowed_origins: Vec<String>,
    /// Scheduling policy.
    pub scheduler: SchedulerKind,
    /// Inbound `client_uid` check.
    pub identity_check: IdentityCheck,
    /// Default response window in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host_origin: DEFAULT_HOST_ORIGIN.to_string(),
            client_uid: Uuid::new_v4().to_string(),
            allowed_origins: Vec::new(),
            scheduler: SchedulerKind::default(),
            identity_check: IdentityCheck::default(),
            request_timeout_ms: u64::try_from(REQUEST_TIMEOUT.as_millis()).unwrap_or(5000),
        }
    }
}

impl ClientConfig {
    /// Loads configuration from `path` (if given), with environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("DIALPAD_URL") {
            self.host_origin = url;
        }

        if let Some(uid) = lookup("DPI_CLIENT_UID") {
            self.client_uid = uid;
        }

        if let Some(scheduler) = lookup("DPI_SCHEDULER") {
            match scheduler.parse() {
                Ok(kind) => self.scheduler = kind,
                Err(e) => log::warn!("[Config] Ignoring DPI_SCHEDULER: {e}"),
            }
        }

        if let Some(check) = lookup("DPI_IDENTITY_CHECK") {
            match check.parse() {
                Ok(check) => self.identity_check = check,
                Err(e) => log::warn!("[Config] Ignoring DPI_IDENTITY_CHECK: {e}"),
            }
        }

        if let Some(timeout) = lookup("DPI_REQUEST_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                self.request_timeout_ms = ms;
            }
        }

        let environment = Environment::from_name(lookup("DPI_ENV").as_deref());
        let remote_localhost = lookup("DPI_REMOTE_LOCALHOST").is_some_and(|v| !v.is_empty());
        if environment.is_development() || remote_localhost {
            self.allow_origin(DEV_LOCALHOST_ORIGIN);
            if let Some(base_url) = lookup("DPI_BASE_URL") {
                self.allow_origin(&base_url);
            }
        }
    }

    fn allow_origin(&mut self, origin: &str) {
        if !self.allowed_origins.iter().any(|o| o == origin) {
            self.allowed_origins.push(origin.to_string());
        }
    }

    /// The host origin followed by every additional allowed origin.
    pub fn origin_allow_list(&self) -> OriginAllowList {
        OriginAllowList::new(
            std::iter::once(self.host_origin.clone()).chain(self.allowed_origins.iter().cloned()),
        )
    }

    /// Default response window.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
