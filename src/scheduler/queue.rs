//! Single-queue scheduling policy.
//!
//! Requests are sent one at a time. While a request is in flight every new
//! request, whatever its path, waits in one global FIFO; when the in-flight
//! request completes (response, error, subscription acknowledgement,
//! timeout, or unsubscribe) the next queued message is transmitted. This
//! gives total ordering across all paths at the cost of serializing
//! unrelated ones, for hosts that process messages strictly sequentially.

use std::collections::VecDeque;

use super::{Admission, SchedulingPolicy};
use crate::error::BridgeError;
use crate::message::{OutboundMessage, StatusCode};

/// One in-flight request plus the FIFO of messages waiting behind it.
#[derive(Debug, Default)]
pub struct QueuePolicy {
    in_flight: Option<String>,
    waiting: VecDeque<OutboundMessage>,
}

impl QueuePolicy {
    /// Correlation id of the transmitted request, if any.
    pub fn in_flight(&self) -> Option<&str> {
        self.in_flight.as_deref()
    }

    /// Number of messages waiting to be sent.
    pub fn queued(&self) -> usize {
        self.waiting.len()
    }
}

impl SchedulingPolicy for QueuePolicy {
    fn admit(&mut self, message: &OutboundMessage) -> Result<Admission, BridgeError> {
        if self.in_flight.is_none() {
            self.in_flight = Some(message.message_uid.clone());
            return Ok(Admission::Transmit);
        }
        self.waiting.push_back(message.clone());
        Ok(Admission::Deferred)
    }

    fn release(&mut self, message_uid: &str, _path: &str) -> Option<OutboundMessage> {
        if self.in_flight.as_deref() != Some(message_uid) {
            // Settled while still queued (timeout or unsubscribe): never sent.
            self.waiting.retain(|m| m.message_uid != message_uid);
            return None;
        }

        let next = self.waiting.pop_front();
        self.in_flight = next.as_ref().map(|m| m.message_uid.clone());
        next
    }

    /// Everything except the subscription acknowledgement reaches subscribers.
    fn delivers_event(&self, status: Option<StatusCode>) -> bool {
        !status.is_some_and(StatusCode::is_subscription_added)
    }
}
