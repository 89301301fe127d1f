//! Periodic/full sync, §4.3.7. Three one-shot action sequences rebuild
//! the graph from Asterisk's own bookkeeping: `ExtensionState` per
//! monitored extension, `Status` for the channel/call graph, and
//! `QueueSummary` + `QueueStatus` for queues. All of it must run while
//! holding the correlator's lock for the duration of each rebuild step,
//! and the AMI round-trips it performs must go through the same
//! transport read lease the event reader uses — the dispatcher already
//! guarantees that.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::info;

use super::state::Graph;
use crate::dispatcher::ActionDispatcher;
use crate::error::Result;
use crate::model::{CallState, QueueEntry, QueueMember};

use super::util::extension_from_channel;

/// Caches each monitored extension's current device-status code.
pub async fn sync_extension_statuses(graph: &mut Graph, dispatcher: &ActionDispatcher) -> Result<()> {
    let extensions: Vec<String> = graph.monitored_extensions.iter().cloned().collect();
    for ext in extensions {
        let mut params = BTreeMap::new();
        params.insert("Exten".to_string(), ext.clone());
        let frames = dispatcher.send("ExtensionState", params).await?;
        if let Some(frame) = frames.first() {
            if let Some(status) = frame.get("Status").and_then(|s| s.parse().ok()) {
                graph.extensions.entry(ext.clone()).or_insert_with(|| crate::model::Extension::new(&ext)).status_code = Some(status);
            }
        }
    }
    Ok(())
}

/// Rebuilds `calls` from a `Status` action's multi-event response.
/// Preserves `start_time`/`answer_time` from any prior record for the
/// same extension — overwriting them with fresh timestamps would destroy
/// duration accounting across a resync.
pub async fn sync_active_calls(graph: &mut Graph, dispatcher: &ActionDispatcher) -> Result<()> {
    let frames = dispatcher.send("Status", BTreeMap::new()).await?;
    let mut rebuilt: std::collections::HashMap<String, crate::model::Call> = std::collections::HashMap::new();

    for frame in &frames {
        if frame.event_name() != Some("Status") {
            continue;
        }
        let Some(channel_name) = frame.get("Channel") else { continue };
        let Some(ext) = extension_from_channel(channel_name) else { continue };

        let mut call = crate::model::Call {
            channel: Some(channel_name.to_string()),
            uniqueid: frame.get("Uniqueid").map(str::to_string),
            linkedid: frame.get("Linkedid").map(str::to_string),
            callerid: frame.get("CallerIDNum").map(str::to_string),
            state: frame.get("ChannelStateDesc").map(map_status_state),
            ..Default::default()
        };
        if let Some(prior) = graph.calls.get(&ext) {
            call.start_time = prior.start_time;
            call.answer_time = prior.answer_time;
        }
        call.touch_start(Utc::now());
        rebuilt.insert(ext, call);
    }

    graph.calls = rebuilt;
    Ok(())
}

fn map_status_state(s: &str) -> CallState {
    match s {
        "Down" => CallState::Down,
        "Ringing" | "Ring" => CallState::Ringing,
        "Up" => CallState::Up,
        _ => CallState::Dialing,
    }
}

/// Rebuilds queues, members, and entries from `QueueSummary` followed by
/// `QueueStatus` per queue. Stale entries are cleared before repopulating
/// to avoid leaking callers who left while the sync was out of date.
pub async fn sync_queue_status(graph: &mut Graph, dispatcher: &ActionDispatcher) -> Result<()> {
    let summary_frames = dispatcher.send("QueueSummary", BTreeMap::new()).await?;
    graph.queue_entries.clear();

    let mut queue_names = Vec::new();
    for frame in &summary_frames {
        let Some(queue) = frame.get("Queue") else { continue };
        queue_names.push(queue.to_string());
        let q = graph.queue_mut(queue);
        q.calls_waiting = frame.get("Calls").and_then(|s| s.parse().ok()).unwrap_or(0);
        q.available = frame.get("Available").and_then(|s| s.parse().ok()).unwrap_or(0);
        q.logged_in = frame.get("LoggedIn").and_then(|s| s.parse().ok()).unwrap_or(0);
    }

    for queue in &queue_names {
        let mut params = BTreeMap::new();
        params.insert("Queue".to_string(), queue.clone());
        let frames = dispatcher
            .send_multi_with_complete_event("QueueStatus", params, "QueueStatusComplete")
            .await?;

        let mut current_event: Option<&str> = None;
        for frame in &frames {
            current_event = frame.event_name();
            match current_event {
                Some("QueueMember") => {
                    let Some(interface) = frame.get("Location") else { continue };
                    let key = format!("{queue}:{interface}");
                    let membership = frame.get("Membership").unwrap_or("").to_lowercase();
                    let dynamic = match membership.as_str() {
                        "dynamic" => true,
                        "static" | "realtime" => false,
                        _ => graph.dynamic_members.contains(&key),
                    };
                    if dynamic {
                        graph.dynamic_members.insert(key.clone());
                    } else {
                        graph.dynamic_members.remove(&key);
                    }
                    graph.queue_members.insert(
                        key,
                        QueueMember {
                            queue: queue.clone(),
                            interface: interface.to_string(),
                            member_name: frame.get("Name").unwrap_or(interface).to_string(),
                            status: frame.get("Status").map(|s| super::util::queue_member_status_label(s)).unwrap_or_else(|| "Unknown".to_string()),
                            paused: frame.get("Paused") == Some("1"),
                            pause_reason: None,
                            dynamic,
                        },
                    );
                }
                Some("QueueEntry") => {
                    let Some(uniqueid) = frame.get("Uniqueid") else { continue };
                    let wait_seconds: i64 = frame.get("Wait").and_then(|s| s.parse().ok()).unwrap_or(0);
                    graph.queue_entries.insert(
                        uniqueid.to_string(),
                        QueueEntry {
                            queue: queue.clone(),
                            callerid: frame.get("CallerIDNum").unwrap_or("Unknown").to_string(),
                            position: frame.get("Position").and_then(|s| s.parse().ok()).unwrap_or(0),
                            entry_time: Utc::now() - chrono::Duration::seconds(wait_seconds),
                        },
                    );
                }
                _ => {}
            }
        }
        graph.recalc_calls_waiting(queue);
    }

    info!(
        queues = graph.queues.len(),
        members = graph.queue_members.len(),
        entries = graph.queue_entries.len(),
        "queue sync complete"
    );
    Ok(())
}
