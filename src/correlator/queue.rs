//! The queue state machine, §4.3.6: queue entries (waiting callers),
//! queue members (agents), and the agent-ringing/answer lifecycle.

use chrono::Utc;
use tracing::debug;

use super::effects::Effect;
use super::state::Graph;
use super::util::extension_from_channel;
use crate::model::{Channel, QueueEntry, QueueMember};
use crate::transport::Frame;

/// `QueueEntry` and `QueueCallerJoin` fire for the same real occurrence
/// in modern Asterisk versions; both route here rather than duplicating
/// the body.
pub fn on_queue_caller_join(graph: &mut Graph, frame: &Frame) -> Vec<Effect> {
    let (Some(queue), Some(uniqueid)) = (frame.get("Queue"), frame.get("Uniqueid")) else {
        return Vec::new();
    };
    let callerid = frame.get("CallerIDNum").unwrap_or("Unknown").to_string();
    let position = frame.get("Position").and_then(|p| p.parse().ok()).unwrap_or(0);
    let now = Utc::now();

    graph.queue_entries.insert(
        uniqueid.to_string(),
        QueueEntry {
            queue: queue.to_string(),
            callerid: callerid.clone(),
            position,
            entry_time: now,
        },
    );
    graph.recalc_calls_waiting(queue);

    // The caller's own channel is usually a trunk/system leg with no
    // owning extension and may never have been seen via Newchannel.
    // Register it here (falling back to this entry's own Uniqueid for
    // the linkedid, same as Newchannel's own fallback) so its eventual
    // Hangup can still resolve a linkedid and be traced back to this
    // Call, instead of landing in the "untracked channel" path.
    let mut linkedid = None;
    if let Some(channel) = frame.get("Channel") {
        let resolved = frame
            .get("Linkedid")
            .map(str::to_string)
            .or_else(|| graph.channels.get(channel).and_then(|c| c.linkedid.clone()))
            .unwrap_or_else(|| uniqueid.to_string());

        let entry = graph.channels.entry(channel.to_string()).or_insert_with(|| Channel::new(channel));
        entry.linkedid = Some(resolved.clone());
        if entry.callerid_num.is_none() {
            entry.callerid_num = Some(callerid.clone());
        }
        graph.link_channel(channel, &resolved);
        graph.destchannel_to_caller_ext.insert(channel.to_string(), callerid.clone());
        linkedid = Some(resolved);
    }

    let call = graph.call_mut(&callerid);
    call.queue = Some(queue.to_string());
    call.queue_waiting = true;
    call.uniqueid = Some(uniqueid.to_string());
    call.touch_start(now);
    if linkedid.is_some() {
        call.linkedid = linkedid;
    }
    Vec::new()
}

pub fn on_queue_caller_leave(graph: &mut Graph, frame: &Frame) -> Vec<Effect> {
    let (Some(queue), Some(uniqueid)) = (frame.get("Queue"), frame.get("Uniqueid")) else {
        return Vec::new();
    };
    graph.queue_entries.remove(uniqueid);
    graph.recalc_calls_waiting(queue);
    Vec::new()
}

pub fn on_agent_called(graph: &mut Graph, frame: &Frame) -> Vec<Effect> {
    let (Some(queue), Some(interface)) = (frame.get("Queue"), frame.get("Interface")) else {
        return Vec::new();
    };
    let Some(agent_ext) = extension_from_channel(interface).or_else(|| Some(interface.to_string())) else {
        return Vec::new();
    };
    let callerid = frame.get("CallerIDNum").map(str::to_string);

    let call = graph.call_mut(&agent_ext);
    call.queue = Some(queue.to_string());
    call.queue_waiting = true;
    if let Some(callerid) = callerid {
        call.queue_caller = Some(callerid);
    }
    if let Some(destchannel) = frame.get("DestChannel") {
        call.destchannel = Some(destchannel.to_string());
    }
    Vec::new()
}

pub fn on_agent_connect(graph: &mut Graph, frame: &Frame) -> Vec<Effect> {
    let Some(interface) = frame.get("Interface") else {
        return Vec::new();
    };
    let Some(agent_ext) = extension_from_channel(interface).or_else(|| Some(interface.to_string())) else {
        return Vec::new();
    };
    let now = Utc::now();
    let member_channel = frame.get("MemberChannel").map(str::to_string);

    let callerid_num = frame.get("CallerIDNum").map(str::to_string);

    let linkedid = {
        let call = graph.call_mut(&agent_ext);
        call.dialstatus = Some("ANSWER".to_string());
        call.queue_waiting = false;
        call.queue_answered = true;
        call.answered_agent = Some(agent_ext.clone());
        call.touch_answer(now);
        if let Some(ch) = &member_channel {
            call.channel = Some(ch.clone());
        }
        if let Some(callerid) = &callerid_num {
            call.queue_caller = Some(callerid.clone());
        }
        call.linkedid.clone()
    };

    // The external caller's own Call record, keyed by its raw callerid.
    if let Some(callerid) = &callerid_num {
        let call = graph.call_mut(callerid);
        call.destination = Some(agent_ext.clone());
        call.queue_waiting = false;
        call.queue_answered = true;
        call.answered_agent = Some(agent_ext.clone());
        call.touch_answer(now);
    }

    // Propagate to every other Call sharing this linkedid — strictly
    // matched, narrower than the source's "or looks like an extension"
    // fallback (see SPEC_FULL.md §4.3.6).
    if let Some(linkedid) = linkedid {
        let affected: Vec<String> = graph
            .calls
            .iter()
            .filter(|(k, c)| k.as_str() != agent_ext && c.linkedid.as_deref() == Some(linkedid.as_str()))
            .map(|(k, _)| k.clone())
            .collect();
        for key in affected {
            let call = graph.call_mut(&key);
            call.queue_waiting = false;
            call.queue_answered = true;
            call.answered_agent = Some(agent_ext.clone());
            call.touch_answer(now);
        }
    }
    Vec::new()
}

pub fn on_agent_complete(_graph: &mut Graph, frame: &Frame) -> Vec<Effect> {
    debug!(queue = frame.get("Queue").unwrap_or(""), interface = frame.get("Interface").unwrap_or(""), "AgentComplete");
    Vec::new()
}

pub fn on_queue_member_added(graph: &mut Graph, frame: &Frame) -> Vec<Effect> {
    let (Some(queue), Some(interface)) = (frame.get("Queue"), frame.get("Interface")) else {
        return Vec::new();
    };
    let key = format!("{queue}:{interface}");
    graph.dynamic_members.insert(key.clone());
    graph.queue_members.insert(
        key,
        QueueMember {
            queue: queue.to_string(),
            interface: interface.to_string(),
            member_name: frame.get("MemberName").unwrap_or(interface).to_string(),
            status: "Not in use".to_string(),
            paused: frame.get("Paused") == Some("1"),
            pause_reason: None,
            dynamic: true,
        },
    );
    graph.queue_mut(queue);
    Vec::new()
}

pub fn on_queue_member_removed(graph: &mut Graph, frame: &Frame) -> Vec<Effect> {
    let (Some(queue), Some(interface)) = (frame.get("Queue"), frame.get("Interface")) else {
        return Vec::new();
    };
    let key = format!("{queue}:{interface}");
    graph.queue_members.remove(&key);
    graph.dynamic_members.remove(&key);
    Vec::new()
}

pub fn on_queue_member_status(graph: &mut Graph, frame: &Frame) -> Vec<Effect> {
    let (Some(queue), Some(interface)) = (frame.get("Queue"), frame.get("Interface")) else {
        return Vec::new();
    };
    let key = format!("{queue}:{interface}");
    let status = frame
        .get("Status")
        .map(|s| {
            if s.chars().all(|c| c.is_ascii_digit()) {
                super::util::queue_member_status_label(s)
            } else {
                s.to_string()
            }
        })
        .unwrap_or_else(|| "Unknown".to_string());
    let paused = frame.get("Paused") == Some("1");
    let member_name = frame.get("MemberName").unwrap_or(interface).to_string();
    let dynamic = graph.dynamic_members.contains(&key);

    graph
        .queue_members
        .entry(key)
        .and_modify(|m| {
            m.status = status.clone();
            m.paused = paused;
        })
        .or_insert(QueueMember {
            queue: queue.to_string(),
            interface: interface.to_string(),
            member_name,
            status,
            paused,
            pause_reason: None,
            dynamic,
        });
    Vec::new()
}

pub fn on_queue_member_paused(graph: &mut Graph, frame: &Frame) -> Vec<Effect> {
    let (Some(queue), Some(interface)) = (frame.get("Queue"), frame.get("Interface")) else {
        return Vec::new();
    };
    let key = format!("{queue}:{interface}");
    let paused = frame.get("Paused") == Some("1");
    let reason = frame.get("Reason").map(str::to_string);
    if let Some(member) = graph.queue_members.get_mut(&key) {
        member.paused = paused;
        member.pause_reason = if paused { reason } else { None };
    }
    Vec::new()
}

pub fn on_queue_member_ring_in_use(_graph: &mut Graph, frame: &Frame) -> Vec<Effect> {
    debug!(queue = frame.get("Queue").unwrap_or(""), "QueueMemberRingInUse");
    Vec::new()
}

pub fn on_queue_summary(graph: &mut Graph, frame: &Frame) -> Vec<Effect> {
    let Some(queue) = frame.get("Queue") else {
        return Vec::new();
    };
    let q = graph.queue_mut(queue);
    if let Some(v) = frame.get("Available").and_then(|s| s.parse().ok()) {
        q.available = v;
    }
    if let Some(v) = frame.get("LoggedIn").and_then(|s| s.parse().ok()) {
        q.logged_in = v;
    }
    if let Some(v) = frame.get("Calls").and_then(|s| s.parse().ok()) {
        q.calls_waiting = v;
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::parse_frame;

    #[test]
    fn agent_called_does_not_emit_crm_while_caller_still_waiting() {
        let mut graph = Graph::default();
        on_queue_caller_join(
            &mut graph,
            &parse_frame("Event: QueueCallerJoin\r\nQueue: sales\r\nUniqueid: U\r\nCallerIDNum: 15551234567\r\nPosition: 1\r\n"),
        );
        let effects = on_agent_called(
            &mut graph,
            &parse_frame("Event: AgentCalled\r\nQueue: sales\r\nInterface: PJSIP/200\r\nDestChannel: PJSIP/200-b\r\n"),
        );
        assert!(effects.is_empty());
        assert!(graph.calls["200"].queue_waiting);
    }

    #[test]
    fn agent_connect_marks_answered_and_clears_waiting() {
        let mut graph = Graph::default();
        on_queue_caller_join(
            &mut graph,
            &parse_frame("Event: QueueCallerJoin\r\nQueue: sales\r\nUniqueid: U\r\nCallerIDNum: 15551234567\r\nPosition: 1\r\n"),
        );
        on_agent_connect(
            &mut graph,
            &parse_frame("Event: AgentConnect\r\nQueue: sales\r\nInterface: PJSIP/200\r\nMemberChannel: PJSIP/200-b\r\nCallerIDNum: 15551234567\r\n"),
        );
        assert!(graph.calls["200"].queue_answered);
        assert!(!graph.calls["200"].queue_waiting);
        assert!(!graph.calls["15551234567"].queue_waiting);
        assert_eq!(graph.calls["15551234567"].answered_agent.as_deref(), Some("200"));
    }

    #[test]
    fn queue_member_added_is_dynamic() {
        let mut graph = Graph::default();
        on_queue_member_added(
            &mut graph,
            &parse_frame("Event: QueueMemberAdded\r\nQueue: sales\r\nInterface: PJSIP/200\r\nMemberName: Agent 200\r\n"),
        );
        assert!(graph.dynamic_members.contains("sales:PJSIP/200"));
        assert!(graph.queue_members["sales:PJSIP/200"].dynamic);
    }

    #[test]
    fn caller_leave_recalculates_calls_waiting() {
        let mut graph = Graph::default();
        on_queue_caller_join(
            &mut graph,
            &parse_frame("Event: QueueCallerJoin\r\nQueue: sales\r\nUniqueid: U\r\nCallerIDNum: 15551234567\r\nPosition: 1\r\n"),
        );
        assert_eq!(graph.queues["sales"].calls_waiting, 1);
        on_queue_caller_leave(&mut graph, &parse_frame("Event: QueueCallerLeave\r\nQueue: sales\r\nUniqueid: U\r\n"));
        assert_eq!(graph.queues["sales"].calls_waiting, 0);
    }
}
