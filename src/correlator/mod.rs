//! # State Correlator
//!
//! The heart of the engine. Consumes every event the transport hands it
//! and mutates the live entity graph: extensions, channels, calls,
//! linkedid groups, queues, queue members, and queue entries. Detects the
//! "final hangup" of a logical call and decides, exactly once per call,
//! whether to emit a CRM record and/or a missed-call notification.
//!
//! The graph is owned entirely by this module; everything else — sinks,
//! the projector, supervisor operations — only ever sees copies or
//! read-only views. Mutation is serialized through a single
//! `tokio::sync::Mutex<Graph>`: AMI throughput from one Asterisk instance
//! does not justify anything more elaborate, and it makes "events are
//! processed in the order received" trivial to uphold.
//!
//! Handlers never call sink code directly. Each returns a `Vec<Effect>`;
//! the caller (the engine's event loop) dispatches those once the lock
//! has been released, so the correlator never invokes user code while
//! holding a lock.

mod crm;
mod effects;
mod handlers;
mod hangup;
mod queue;
mod state;
pub mod sync;
pub mod util;

pub use effects::{CrmRecord, Effect, MissedCallNote};
pub use state::Graph;

use tokio::sync::Mutex;
use tracing::debug;

use crate::config::{EngineConfig, MeaningfulNumberConfig};
use crate::transport::Frame;

/// Every event name the correlator understands; anything else is ignored
/// at the engine's event loop before it ever reaches here.
pub const WATCHED_EVENTS: &[&str] = &[
    "ExtensionStatus",
    "PeerStatus",
    "DeviceStateChange",
    "Newchannel",
    "Hangup",
    "Dial",
    "DialBegin",
    "DialEnd",
    "Bridge",
    "NewCallerid",
    "Newstate",
    "VarSet",
    "QueueMemberStatus",
    "QueueMemberAdded",
    "QueueMemberRemoved",
    "QueueEntry",
    "QueueCallerJoin",
    "QueueCallerLeave",
    "QueueMemberPause",
    "QueueMemberPaused",
    "QueueMemberUnpause",
    "QueueMemberRingInUse",
    "QueueSummary",
    "AgentCalled",
    "AgentConnect",
    "AgentComplete",
];

pub struct Correlator {
    graph: Mutex<Graph>,
    meaningful_number: MeaningfulNumberConfig,
}

impl Correlator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            graph: Mutex::new(Graph::new(config.monitored_extensions.iter().cloned())),
            meaningful_number: config.meaningful_number.clone(),
        }
    }

    /// Applies one event frame to the graph, returning whatever side
    /// effects the engine should perform once the lock is released.
    /// Every handler is infallible by construction (a missing field just
    /// means the handler does nothing) so a single bad event can never
    /// unwind the event loop, per the propagation policy in §7.
    pub async fn handle_event(&self, frame: &Frame) -> Vec<Effect> {
        let Some(event) = frame.event_name() else {
            return Vec::new();
        };
        if !WATCHED_EVENTS.contains(&event) {
            return Vec::new();
        }
        debug!(%event, "applying event");

        let mut graph = self.graph.lock().await;
        let cfg = &self.meaningful_number;
        match event {
            "Newchannel" => handlers::on_newchannel(&mut graph, frame, cfg),
            "NewCallerid" => handlers::on_new_callerid(&mut graph, frame, cfg),
            "Newstate" => handlers::on_newstate(&mut graph, frame),
            "Dial" | "DialBegin" => handlers::on_dial_begin(&mut graph, frame),
            "DialEnd" => handlers::on_dial_end(&mut graph, frame),
            "Bridge" => handlers::on_bridge(&mut graph, frame),
            "VarSet" => handlers::on_varset(&mut graph, frame, cfg),
            "ExtensionStatus" => handlers::on_extension_status(&mut graph, frame),
            "PeerStatus" => handlers::on_peer_status(&mut graph, frame),
            "DeviceStateChange" => handlers::on_device_state_change(&mut graph, frame),
            "Hangup" => hangup::on_hangup(&mut graph, frame, cfg),
            "QueueEntry" | "QueueCallerJoin" => queue::on_queue_caller_join(&mut graph, frame),
            "QueueCallerLeave" => queue::on_queue_caller_leave(&mut graph, frame),
            "AgentCalled" => queue::on_agent_called(&mut graph, frame),
            "AgentConnect" => queue::on_agent_connect(&mut graph, frame),
            "AgentComplete" => queue::on_agent_complete(&mut graph, frame),
            "QueueMemberAdded" => queue::on_queue_member_added(&mut graph, frame),
            "QueueMemberRemoved" => queue::on_queue_member_removed(&mut graph, frame),
            "QueueMemberStatus" => queue::on_queue_member_status(&mut graph, frame),
            "QueueMemberPause" | "QueueMemberPaused" | "QueueMemberUnpause" => queue::on_queue_member_paused(&mut graph, frame),
            "QueueMemberRingInUse" => queue::on_queue_member_ring_in_use(&mut graph, frame),
            "QueueSummary" => queue::on_queue_summary(&mut graph, frame),
            _ => Vec::new(),
        }
    }

    /// Runs the full startup/resync sequence: extension statuses, the
    /// channel/call rebuild, and the queue rebuild. Callers must ensure
    /// no other read of the transport's socket races this — the
    /// dispatcher's own lease discipline handles that automatically.
    pub async fn full_sync(&self, dispatcher: &crate::dispatcher::ActionDispatcher) -> crate::error::Result<()> {
        let mut graph = self.graph.lock().await;
        sync::sync_extension_statuses(&mut graph, dispatcher).await?;
        sync::sync_active_calls(&mut graph, dispatcher).await?;
        sync::sync_queue_status(&mut graph, dispatcher).await?;
        Ok(())
    }

    /// Read-only access to the graph, used by the projector and by
    /// supervisor operations that need to resolve a channel before
    /// issuing an AMI action.
    pub async fn with_graph<R>(&self, f: impl FnOnce(&Graph) -> R) -> R {
        let graph = self.graph.lock().await;
        f(&graph)
    }

    /// Mutating access, used by supervisor operations to apply an
    /// optimistic local update before the AMI event echo arrives.
    pub async fn with_graph_mut<R>(&self, f: impl FnOnce(&mut Graph) -> R) -> R {
        let mut graph = self.graph.lock().await;
        f(&mut graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::parse_frame;

    fn test_config() -> EngineConfig {
        EngineConfig {
            ami: crate::config::AmiConfig {
                host: "127.0.0.1".into(),
                port: 5038,
                username: "admin".into(),
                secret: "secret".into(),
                action_timeout_secs: 5,
                multi_event_timeout_secs: 10,
            },
            monitored_extensions: vec!["110".into(), "120".into()],
            crm: None,
            meaningful_number: MeaningfulNumberConfig::default(),
            broadcast_interval_ms: 500,
        }
    }

    #[tokio::test]
    async fn unwatched_event_is_ignored() {
        let correlator = Correlator::new(&test_config());
        let effects = correlator.handle_event(&parse_frame("Event: FullyBooted\r\n")).await;
        assert!(effects.is_empty());
    }

    #[tokio::test]
    async fn scenario_outbound_internal_call_completes() {
        let correlator = Correlator::new(&test_config());
        correlator
            .handle_event(&parse_frame("Event: Newchannel\r\nChannel: PJSIP/110-a\r\nUniqueid: 1.1\r\nCallerIDNum: 110\r\nExten: 120\r\n"))
            .await;
        correlator
            .handle_event(&parse_frame("Event: DialBegin\r\nChannel: PJSIP/110-a\r\nDestChannel: PJSIP/120-b\r\nDestExten: 120\r\n"))
            .await;
        correlator
            .handle_event(&parse_frame("Event: Newstate\r\nChannel: PJSIP/120-b\r\nChannelStateDesc: Up\r\n"))
            .await;
        correlator
            .handle_event(&parse_frame("Event: Bridge\r\nChannel1: PJSIP/110-a\r\nChannel2: PJSIP/120-b\r\nLinkedid: X\r\nCallerID1: 110\r\nCallerID2: 120\r\n"))
            .await;
        correlator
            .handle_event(&parse_frame("Event: Hangup\r\nChannel: PJSIP/110-a\r\nUniqueid: 1.1\r\nCause: 16\r\n"))
            .await;
        let effects = correlator
            .handle_event(&parse_frame("Event: Hangup\r\nChannel: PJSIP/120-b\r\nUniqueid: 1.2\r\nCause: 16\r\n"))
            .await;

        let records: Vec<_> = effects
            .into_iter()
            .filter_map(|e| match e {
                Effect::PublishCrm(r) => Some(r),
                _ => None,
            })
            .collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].call_type, "internal");
        assert_eq!(records[0].call_status, "completed");

        let active = correlator.with_graph(|g| g.calls.len()).await;
        assert_eq!(active, 0);
    }
}
