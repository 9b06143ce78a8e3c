//! Subscription callback registry.
//!
//! Tracks the callbacks behind every active `on/...` subscription so a
//! specific callback can later be removed with the matching `off/...`
//! request. The public unsubscribe API takes the subscribed callback, not its
//! message id, so the registry also provides a reverse lookup.
//!
//! Two callbacks are compared by identity (the shared allocation behind a
//! [`SubscriptionCallback`]), never by behaviour: two separately created
//! callbacks with identical bodies are distinct subscribers.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::BridgeError;

/// A callback invoked with the `content` of every subscription event.
///
/// Cloning shares the same callback; pass a clone of the value used to
/// subscribe when unsubscribing.
#[derive(Clone)]
pub struct SubscriptionCallback(Arc<dyn Fn(&Value) + Send + Sync>);

impl SubscriptionCallback {
    /// Wrap a closure as a subscription callback.
    pub fn new(callback: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    /// Invoke the callback.
    pub fn call(&self, content: &Value) {
        (self.0)(content);
    }

    /// Returns `true` if both handles share the same callback.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.0).cast::<()>(),
            Arc::as_ptr(&other.0).cast::<()>(),
        )
    }
}

impl std::fmt::Debug for SubscriptionCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SubscriptionCallback")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

/// Registry of subscription callbacks keyed by path.
///
/// # Example
///
/// ```text
/// registry: {
///     "on/call":       [("uid-1", cb_a), ("uid-2", cb_b)],
///     "on/disconnect": [("uid-3", cb_a)],
/// }
/// ```
///
/// Entries keep insertion order so events fan out in subscription order.
#[derive(Default)]
pub struct CallbackRegistry {
    registry: HashMap<String, Vec<(String, SubscriptionCallback)>>,
}

impl CallbackRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribed `(message_uid, callback)` pairs for a path.
    ///
    /// Returns an empty slice if nothing is subscribed.
    pub fn get_registered_for_path(&self, path: &str) -> &[(String, SubscriptionCallback)] {
        self.registry.get(path).map_or(&[], Vec::as_slice)
    }

    /// Register `callback` on `path` under the `on` request's `message_uid`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::DuplicateSubscription`] if this exact callback
    /// is already registered for `path`.
    pub fn add_callback_to_registry(
        &mut self,
        path: &str,
        callback: SubscriptionCallback,
        message_uid: &str,
    ) -> Result<(), BridgeError> {
        if self.get_message_uid(path, &callback).is_some() {
            log::warn!("[CallbackRegistry] Callback is already registered for path: {path}");
            return Err(BridgeError::DuplicateSubscription {
                path: path.to_string(),
            });
        }

        self.registry
            .entry(path.to_string())
            .or_default()
            .push((message_uid.to_string(), callback));
        Ok(())
    }

    /// Remove the registration made by `message_uid` on `path`.
    ///
    /// Returns the removed callback if it existed.
    pub fn remove_from_registry(
        &mut self,
        path: &str,
        message_uid: &str,
    ) -> Option<SubscriptionCallback> {
        let entries = self.registry.get_mut(path)?;
        let index = entries.iter().position(|(uid, _)| uid == message_uid)?;
        let (_, callback) = entries.remove(index);
        if entries.is_empty() {
            self.registry.remove(path);
        }
        Some(callback)
    }

    /// Reverse lookup: the message uid that registered `callback` on `path`.
    pub fn get_message_uid(&self, path: &str, callback: &SubscriptionCallback) -> Option<&str> {
        self.get_registered_for_path(path)
            .iter()
            .find(|(_, registered)| registered.same_as(callback))
            .map(|(uid, _)| uid.as_str())
    }

    /// Number of subscribers on a path.
    pub fn subscriber_count(&self, path: &str) -> usize {
        self.get_registered_for_path(path).len()
    }

    /// Check if the registry holds no subscriptions at all.
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("path_count", &self.registry.len())
            .field(
                "subscription_count",
                &self.registry.values().map(Vec::len).sum::<usize>(),
            )
            .finish()
    }
}
