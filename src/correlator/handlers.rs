//! Per-event handlers, §4.3.4: `Newchannel`, `NewCallerid`, `Newstate`,
//! `Dial`/`DialBegin`, `DialEnd`, `Bridge`, `VarSet`, `ExtensionStatus`,
//! `PeerStatus`, `DeviceStateChange`. Hangup and the queue events live in
//! their own modules (`hangup.rs`, `queue.rs`) since both are
//! significantly more involved.

use chrono::Utc;

use super::effects::Effect;
use super::state::Graph;
use super::util::{extension_from_channel, is_meaningful, looks_internal};
use crate::config::MeaningfulNumberConfig;
use crate::model::{Call, CallState, Channel};
use crate::transport::Frame;

/// Variables `VarSet` actually cares about (ground truth `DIALED_VARS`).
const DIALED_VARS: &[&str] = &[
    "EXTEN",
    "DIALEDPEERNUMBER",
    "DIALEDNUMBER",
    "OUTNUM",
    "DIAL_NUMBER",
    "CALLEDNUM",
    "FROM_DID",
];

fn parse_call_state(s: &str) -> Option<CallState> {
    match s {
        "Down" => Some(CallState::Down),
        "Rsrvd" | "OffHook" | "Dialing" | "Ring" => Some(CallState::Dialing),
        "Ringing" => Some(CallState::Ringing),
        "Up" => Some(CallState::Up),
        _ => None,
    }
}

pub fn on_newchannel(graph: &mut Graph, frame: &Frame, cfg: &MeaningfulNumberConfig) -> Vec<Effect> {
    let now = Utc::now();
    let Some(channel_name) = frame.get("Channel") else {
        return Vec::new();
    };
    let uniqueid = frame.get("Uniqueid").map(str::to_string);
    // Ground truth: Newchannel always assigns some linkedid, falling back
    // to the channel's own uniqueid when Asterisk omits `Linkedid`.
    let linkedid = frame
        .get("Linkedid")
        .map(str::to_string)
        .or_else(|| uniqueid.clone())
        .unwrap_or_else(|| channel_name.to_string());

    let ext = extension_from_channel(channel_name);
    let callerid = frame.get("CallerIDNum").map(str::to_string);

    graph.channels.insert(
        channel_name.to_string(),
        Channel {
            name: channel_name.to_string(),
            owning_extension: ext.clone(),
            callerid_num: callerid.clone(),
            uniqueid: uniqueid.clone(),
            linkedid: Some(linkedid.clone()),
        },
    );
    graph.link_channel(channel_name, &linkedid);

    if let Some(ext) = &ext {
        let call = graph.call_mut(ext);
        call.channel = Some(channel_name.to_string());
        call.uniqueid = uniqueid;
        call.linkedid = Some(linkedid);
        call.state = Some(CallState::New);
        call.touch_start(now);

        if let Some(callerid) = &callerid {
            if callerid != ext && callerid.chars().all(|c| c.is_ascii_digit()) {
                call.caller = Some(callerid.clone());
            }
        }

        if let Some(exten) = frame.get("Exten") {
            if is_meaningful(exten, cfg) && exten != ext {
                if call.original_destination.is_none() {
                    call.original_destination = Some(exten.to_string());
                }
                call.exten = Some(exten.to_string());
            }
        }
    }
    Vec::new()
}

pub fn on_new_callerid(graph: &mut Graph, frame: &Frame, cfg: &MeaningfulNumberConfig) -> Vec<Effect> {
    let Some(channel_name) = frame.get("Channel") else {
        return Vec::new();
    };
    let Some(callerid) = frame.get("CallerIDNum") else {
        return Vec::new();
    };

    if let Some(ch) = graph.channels.get_mut(channel_name) {
        ch.callerid_num = Some(callerid.to_string());
    }
    if let Some(ext) = extension_from_channel(channel_name) {
        if is_meaningful(callerid, cfg) {
            graph.call_mut(&ext).callerid = Some(callerid.to_string());
        }
    }
    Vec::new()
}

pub fn on_newstate(graph: &mut Graph, frame: &Frame) -> Vec<Effect> {
    let now = Utc::now();
    let Some(channel_name) = frame.get("Channel") else {
        return Vec::new();
    };
    let Some(state) = frame.get("ChannelStateDesc").and_then(parse_call_state) else {
        return Vec::new();
    };

    if let Some(ext) = extension_from_channel(channel_name) {
        let call = graph.call_mut(&ext);
        call.state = Some(state);
        if state == CallState::Up {
            call.touch_answer(now);
        }
    }

    // Mirror this channel's new state onto the caller's `dest_state`, if
    // this channel was dialed as someone else's destination.
    if let Some(caller_ext) = graph.destchannel_to_caller_ext.get(channel_name).cloned() {
        graph.call_mut(&caller_ext).dest_state = Some(state.as_str().to_string());
    }
    Vec::new()
}

pub fn on_dial_begin(graph: &mut Graph, frame: &Frame) -> Vec<Effect> {
    let Some(channel_name) = frame.get("Channel") else {
        return Vec::new();
    };
    let Some(destchannel) = frame.get("DestChannel") else {
        return Vec::new();
    };
    let dest_number = frame
        .get("DestExten")
        .or_else(|| frame.get("DialString"))
        .map(str::to_string);

    let caller_ext = extension_from_channel(channel_name);

    if let Some(ext) = &caller_ext {
        let call = graph.call_mut(ext);
        call.destchannel = Some(destchannel.to_string());
        call.state = Some(CallState::Dialing);
        if let Some(n) = &dest_number {
            call.original_destination.get_or_insert_with(|| n.clone());
        }
        graph.destchannel_to_caller_ext.insert(destchannel.to_string(), ext.clone());
    }

    // The originating leg's caller-id, used to populate the destination's
    // `incoming_caller` when the origin is a trunk/system channel (an
    // inbound call has no internal extension on the calling side).
    let origin_callerid = graph.channels.get(channel_name).and_then(|c| c.callerid_num.clone());

    if let Some(dest_ext) = extension_from_channel(destchannel) {
        if looks_internal(&dest_ext) {
            let shadow = graph.call_mut(&dest_ext);
            shadow.state = Some(CallState::Ringing);
            shadow.channel = Some(destchannel.to_string());
            if caller_ext.is_some() {
                shadow.caller = caller_ext;
            } else {
                shadow.incoming_caller = origin_callerid;
            }
        }
    }
    Vec::new()
}

pub fn on_dial_end(graph: &mut Graph, frame: &Frame) -> Vec<Effect> {
    let Some(channel_name) = frame.get("Channel") else {
        return Vec::new();
    };
    let Some(new_status) = frame.get("DialStatus") else {
        return Vec::new();
    };

    apply_dialstatus(graph, extension_from_channel(channel_name).as_deref(), new_status);

    if let Some(destchannel) = frame.get("DestChannel") {
        apply_dialstatus(graph, extension_from_channel(destchannel).as_deref(), new_status);
    }
    Vec::new()
}

/// Priority rule: a new status of `ANSWER` always wins and is sticky;
/// otherwise an existing `ANSWER` is never overwritten.
fn apply_dialstatus(graph: &mut Graph, ext: Option<&str>, new_status: &str) {
    let Some(ext) = ext else { return };
    let call = graph.call_mut(ext);
    let existing_is_answer = call.dialstatus.as_deref() == Some("ANSWER");
    if new_status == "ANSWER" || !existing_is_answer {
        call.dialstatus = Some(new_status.to_string());
    }
}

pub fn on_bridge(graph: &mut Graph, frame: &Frame) -> Vec<Effect> {
    let (Some(ch1), Some(ch2)) = (frame.get("Channel1"), frame.get("Channel2")) else {
        return Vec::new();
    };
    let linkedid = frame
        .get("Linkedid")
        .map(str::to_string)
        .or_else(|| graph.channels.get(ch1).and_then(|c| c.linkedid.clone()))
        .or_else(|| graph.channels.get(ch2).and_then(|c| c.linkedid.clone()));

    if let Some(linkedid) = linkedid {
        for ch in [ch1, ch2] {
            let old_linkedid = graph.channels.get(ch).and_then(|c| c.linkedid.clone());
            if old_linkedid.as_deref() != Some(linkedid.as_str()) {
                if let Some(old) = &old_linkedid {
                    graph.unlink_channel(ch, old);
                }
                graph.link_channel(ch, &linkedid);
            }
            // A channel may reach Bridge without ever having reported its
            // own Newchannel in this test/replay context; ensure it still
            // has a Channel entry so Hangup can resolve its linkedid.
            let entry = graph.channels.entry(ch.to_string()).or_insert_with(|| Channel::new(ch));
            entry.linkedid = Some(linkedid.clone());
            if entry.owning_extension.is_none() {
                entry.owning_extension = extension_from_channel(ch);
            }
        }
    }

    let callerid1 = frame.get("CallerID1").map(str::to_string);
    let callerid2 = frame.get("CallerID2").map(str::to_string);
    let ext1 = extension_from_channel(ch1);
    let ext2 = extension_from_channel(ch2);

    if let (Some(ext1), Some(cid2)) = (&ext1, &callerid2) {
        graph.call_mut(ext1).destination = Some(cid2.clone());
    }
    if let (Some(ext2), Some(cid1)) = (&ext2, &callerid1) {
        graph.call_mut(ext2).destination = Some(cid1.clone());
    }

    // Propagate a `queue` attribute from whichever side has one.
    let queue1 = ext1.as_ref().and_then(|e| graph.calls.get(e)).and_then(|c| c.queue.clone());
    let queue2 = ext2.as_ref().and_then(|e| graph.calls.get(e)).and_then(|c| c.queue.clone());
    match (queue1, queue2) {
        (Some(q), None) => {
            if let Some(ext2) = &ext2 {
                graph.call_mut(ext2).queue = Some(q);
            }
        }
        (None, Some(q)) => {
            if let Some(ext1) = &ext1 {
                graph.call_mut(ext1).queue = Some(q);
            }
        }
        _ => {}
    }
    Vec::new()
}

pub fn on_varset(graph: &mut Graph, frame: &Frame, cfg: &MeaningfulNumberConfig) -> Vec<Effect> {
    let (Some(channel_name), Some(variable), Some(value)) =
        (frame.get("Channel"), frame.get("Variable"), frame.get("Value"))
    else {
        return Vec::new();
    };
    if !DIALED_VARS.contains(&variable) {
        return Vec::new();
    }
    let Some(ext) = extension_from_channel(channel_name) else {
        return Vec::new();
    };
    if is_meaningful(value, cfg) && value != ext {
        let call = graph.call_mut(&ext);
        call.original_destination.get_or_insert_with(|| value.to_string());
        call.exten = Some(value.to_string());
    }
    Vec::new()
}

pub fn on_extension_status(graph: &mut Graph, frame: &Frame) -> Vec<Effect> {
    let (Some(exten), Some(status)) = (frame.get("Exten"), frame.get("Status")) else {
        return Vec::new();
    };
    let entry = graph
        .extensions
        .entry(exten.to_string())
        .or_insert_with(|| crate::model::Extension::new(exten));
    entry.status_code = status.parse().ok();
    // Deliberately does not touch `calls`: ExtensionStatus can arrive
    // before the corresponding Hangup, and deleting the Call here would
    // race the real teardown.
    Vec::new()
}

pub fn on_peer_status(graph: &mut Graph, frame: &Frame) -> Vec<Effect> {
    let Some(peer) = frame.get("Peer") else {
        return Vec::new();
    };
    let ext = peer.split('/').nth(1).unwrap_or(peer);
    if let Some(status) = frame.get("PeerStatus") {
        let entry = graph
            .extensions
            .entry(ext.to_string())
            .or_insert_with(|| crate::model::Extension::new(ext));
        entry.display_status = status.to_string();
    }
    Vec::new()
}

pub fn on_device_state_change(graph: &mut Graph, frame: &Frame) -> Vec<Effect> {
    let Some(device) = frame.get("Device") else {
        return Vec::new();
    };
    let ext = device.split('/').nth(1).unwrap_or(device);
    if let Some(state) = frame.get("State") {
        let entry = graph
            .extensions
            .entry(ext.to_string())
            .or_insert_with(|| crate::model::Extension::new(ext));
        entry.display_status = state.to_string();
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::parse_frame;

    fn frame(raw: &str) -> Frame {
        parse_frame(raw)
    }

    #[test]
    fn newchannel_falls_back_to_uniqueid_for_linkedid() {
        let mut graph = Graph::default();
        let cfg = MeaningfulNumberConfig::default();
        let f = frame("Event: Newchannel\r\nChannel: PJSIP/110-0000001a\r\nUniqueid: 1700000000.1\r\nCallerIDNum: 110\r\n");
        on_newchannel(&mut graph, &f, &cfg);
        let call = graph.calls.get("110").unwrap();
        assert_eq!(call.linkedid.as_deref(), Some("1700000000.1"));
        assert_eq!(call.state, Some(CallState::New));
    }

    #[test]
    fn newchannel_sets_original_destination_when_meaningful() {
        let mut graph = Graph::default();
        let cfg = MeaningfulNumberConfig::default();
        let f = frame(
            "Event: Newchannel\r\nChannel: PJSIP/110-0000001a\r\nUniqueid: 1.1\r\nCallerIDNum: 110\r\nExten: 120\r\n",
        );
        on_newchannel(&mut graph, &f, &cfg);
        assert_eq!(graph.calls["110"].original_destination.as_deref(), Some("120"));
    }

    #[test]
    fn newchannel_does_not_treat_dialplan_context_as_destination() {
        let mut graph = Graph::default();
        let cfg = MeaningfulNumberConfig::default();
        let f = frame("Event: Newchannel\r\nChannel: PJSIP/110-0000001a\r\nUniqueid: 1.1\r\nCallerIDNum: 110\r\nExten: s\r\n");
        on_newchannel(&mut graph, &f, &cfg);
        assert!(graph.calls["110"].original_destination.is_none());
    }

    #[test]
    fn dial_end_answer_always_wins() {
        let mut graph = Graph::default();
        graph.call_mut("110").dialstatus = Some("NOANSWER".to_string());
        let f = frame("Event: DialEnd\r\nChannel: PJSIP/110-0000001a\r\nDialStatus: ANSWER\r\n");
        on_dial_end(&mut graph, &f);
        assert_eq!(graph.calls["110"].dialstatus.as_deref(), Some("ANSWER"));
    }

    #[test]
    fn dial_end_does_not_overwrite_existing_answer() {
        let mut graph = Graph::default();
        graph.call_mut("110").dialstatus = Some("ANSWER".to_string());
        let f = frame("Event: DialEnd\r\nChannel: PJSIP/110-0000001a\r\nDialStatus: CANCEL\r\n");
        on_dial_end(&mut graph, &f);
        assert_eq!(graph.calls["110"].dialstatus.as_deref(), Some("ANSWER"));
    }

    #[test]
    fn varset_ignores_unwatched_variables() {
        let mut graph = Graph::default();
        let cfg = MeaningfulNumberConfig::default();
        let f = frame("Event: VarSet\r\nChannel: PJSIP/110-0000001a\r\nVariable: SOMEOTHERVAR\r\nValue: 120\r\n");
        on_varset(&mut graph, &f, &cfg);
        assert!(graph.calls.get("110").is_none());
    }

    #[test]
    fn extension_status_never_deletes_active_call() {
        let mut graph = Graph::default();
        graph.call_mut("110").state = Some(CallState::Up);
        let f = frame("Event: ExtensionStatus\r\nExten: 110\r\nStatus: 0\r\n");
        on_extension_status(&mut graph, &f);
        assert!(graph.calls.contains_key("110"));
    }
}
