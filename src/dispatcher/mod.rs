//! # Action Dispatcher
//!
//! Gives the rest of the engine synchronous-feeling AMI actions on top of
//! the async transport, while the event reader keeps draining the socket
//! between calls. The dispatcher does not own the socket itself — every
//! send ultimately goes through [`crate::transport::Transport`], whose
//! internal mutex is what actually arbitrates the read lease; this module
//! only adds the auto-complete-event naming convention and the default
//! timeouts.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::AmiConfig;
use crate::error::Result;
use crate::transport::{Frame, Transport};

/// For action `X`, the default completion event is `XComplete`. A handful
/// of known multi-event actions are wired up explicitly; anything else
/// defaults to the `{action}Complete` convention, and callers may always
/// override via [`ActionDispatcher::send_multi_with_complete_event`].
fn default_complete_event(action: &str) -> String {
    format!("{action}Complete")
}

/// Whether `action` is known to be multi-event. `QueueSummary` is
/// deliberately excluded here: unlike the other three, the original
/// returns it as a single multi-line response rather than a stream of
/// discrete events terminated by a `*Complete` sentinel.
fn is_multi_event_action(action: &str) -> bool {
    matches!(action, "Status" | "CoreShowChannels" | "QueueStatus")
}

/// Correlates AMI action invocations with their responses.
pub struct ActionDispatcher {
    transport: std::sync::Arc<Transport>,
    action_timeout: Duration,
    multi_event_timeout: Duration,
}

impl ActionDispatcher {
    pub fn new(transport: std::sync::Arc<Transport>, config: &AmiConfig) -> Self {
        Self {
            transport,
            action_timeout: Duration::from_secs(config.action_timeout_secs),
            multi_event_timeout: Duration::from_secs(config.multi_event_timeout_secs),
        }
    }

    /// Sends an action and returns a single response frame, or one
    /// accumulated multi-event response, depending on whether `action` is
    /// known to be multi-event.
    pub async fn send(&self, action: &str, params: BTreeMap<String, String>) -> Result<Vec<Frame>> {
        if is_multi_event_action(action) {
            let complete = default_complete_event(action);
            self.send_multi_with_complete_event(action, params, &complete).await
        } else {
            let frame = tokio::time::timeout(self.action_timeout, self.transport.send_action(action, params))
                .await
                .map_err(|_| crate::error::CallCenterError::ActionFailure(format!("{action} timed out")))??;
            Ok(vec![frame])
        }
    }

    /// Sends a multi-event action, reading frames until `complete_event`
    /// is observed or the dispatcher's multi-event timeout elapses.
    pub async fn send_multi_with_complete_event(
        &self,
        action: &str,
        params: BTreeMap<String, String>,
        complete_event: &str,
    ) -> Result<Vec<Frame>> {
        self.transport
            .send_action_with_events(action, params, complete_event, self.multi_event_timeout)
            .await
    }

    /// Fire-and-forget: enables the event stream. No response is expected.
    pub async fn enable_events(&self) -> Result<()> {
        let mut params = BTreeMap::new();
        params.insert("EventMask".to_string(), "on".to_string());
        self.transport.send_fire_and_forget("Events", params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_summary_is_not_multi_event() {
        assert!(!is_multi_event_action("QueueSummary"));
    }

    #[test]
    fn known_multi_event_actions() {
        assert!(is_multi_event_action("Status"));
        assert!(is_multi_event_action("CoreShowChannels"));
        assert!(is_multi_event_action("QueueStatus"));
    }

    #[test]
    fn default_complete_event_follows_convention() {
        assert_eq!(default_complete_event("Status"), "StatusComplete");
    }
}
