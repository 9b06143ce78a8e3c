//! Default scheduling policy: reject conflicting requests.
//!
//! If a request to a path is already in flight, a second request to the same
//! path is rejected immediately without being sent. This is a logical
//! per-path lock for hosts that cannot multiplex concurrent requests on one
//! path; unrelated paths proceed independently and in no particular order.

use std::collections::HashSet;

use super::{Admission, SchedulingPolicy};
use crate::error::BridgeError;
use crate::message::{OutboundMessage, StatusCode};

/// Tracks the set of paths with a request in flight.
#[derive(Debug, Default)]
pub struct RejectConflictPolicy {
    in_flight_paths: HashSet<String>,
}

impl RejectConflictPolicy {
    /// Returns `true` if a request to `path` is in flight.
    pub fn is_in_flight(&self, path: &str) -> bool {
        self.in_flight_paths.contains(path)
    }
}

impl SchedulingPolicy for RejectConflictPolicy {
    fn admit(&mut self, message: &OutboundMessage) -> Result<Admission, BridgeError> {
        if !self.in_flight_paths.insert(message.path.clone()) {
            let error = BridgeError::Conflict {
                path: message.path.clone(),
            };
            log::warn!("[Scheduler] {error}");
            return Err(error);
        }
        Ok(Admission::Transmit)
    }

    fn release(&mut self, _message_uid: &str, path: &str) -> Option<OutboundMessage> {
        self.in_flight_paths.remove(path);
        None
    }

    /// Only plain `OK` events reach subscribers; the acknowledgement does not.
    fn delivers_event(&self, status: Option<StatusCode>) -> bool {
        status.is_some_and(StatusCode::is_ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{OK, SUBSCRIPTION_ADDED};

    fn message(uid: &str, path: &str) -> OutboundMessage {
        OutboundMessage {
            path: path.to_string(),
            client_uid: "frame-1".into(),
            message_uid: uid.to_string(),
            context: None,
            service: None,
            content: None,
        }
    }

    #[test]
    fn test_same_path_conflicts() {
        let mut policy = RejectConflictPolicy::default();
        assert_eq!(
            policy.admit(&message("a", "get/user")).unwrap(),
            Admission::Transmit
        );
        assert!(matches!(
            policy.admit(&message("b", "get/user")),
            Err(BridgeError::Conflict { .. })
        ));
        assert!(policy.is_in_flight("get/user"));
    }

    #[test]
    fn test_different_paths_do_not_conflict() {
        let mut policy = RejectConflictPolicy::default();
        policy.admit(&message("a", "get/user")).unwrap();
        assert_eq!(
            policy.admit(&message("b", "get/contact")).unwrap(),
            Admission::Transmit
        );
    }

    #[test]
    fn test_release_frees_path() {
        let mut policy = RejectConflictPolicy::default();
        policy.admit(&message("a", "get/user")).unwrap();
        assert!(policy.release("a", "get/user").is_none());
        assert!(!policy.is_in_flight("get/user"));
        assert!(policy.admit(&message("b", "get/user")).is_ok());
    }

    #[test]
    fn test_only_ok_events_delivered() {
        let policy = RejectConflictPolicy::default();
        assert!(policy.delivers_event(Some(OK)));
        assert!(!policy.delivers_event(Some(SUBSCRIPTION_ADDED)));
        assert!(!policy.delivers_event(None));
    }
}
