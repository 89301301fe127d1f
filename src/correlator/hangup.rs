//! `Hangup` and final-hangup detection, §4.3.5 — the most complex single
//! handler, since it both tears down channel/linkedid bookkeeping and
//! decides whether this is the moment to emit a CRM record.

use tracing::{debug, warn};

use super::crm::{compose_crm_record, is_missed_category};
use super::effects::{Effect, MissedCallNote};
use super::state::Graph;
use super::util::{extension_from_channel, is_system_channel};
use crate::config::MeaningfulNumberConfig;

pub fn on_hangup(graph: &mut Graph, frame: &crate::transport::Frame, cfg: &MeaningfulNumberConfig) -> Vec<Effect> {
    let Some(channel_name) = frame.get("Channel") else {
        return Vec::new();
    };
    let uniqueid = frame.get("Uniqueid").map(str::to_string);
    let cause = frame.get("Cause").and_then(|c| c.parse::<i64>().ok());

    let linkedid = graph.channels.get(channel_name).and_then(|c| c.linkedid.clone());
    graph.channels.remove(channel_name);

    let Some(linkedid) = linkedid else {
        // §4.3.5 point 3: never tracked under a linkedid at all. Skip CRM
        // conservatively — better to miss than to duplicate.
        warn!(channel = channel_name, "hangup for untracked channel; skipping CRM");
        return Vec::new();
    };

    let (_, group_emptied) = graph.unlink_channel(channel_name, &linkedid);
    let remaining = graph.remaining_non_trunk_channels(&linkedid);
    let is_final = remaining.is_empty();

    if !is_final {
        // Not the last leg. Still clean up the destchannel reference if
        // this channel was someone else's dial target, but do not delete
        // that Call.
        if let Some(caller_ext) = graph.destchannel_to_caller_ext.remove(channel_name) {
            if let Some(call) = graph.calls.get_mut(&caller_ext) {
                if call.destchannel.as_deref() == Some(channel_name) {
                    call.destchannel = None;
                }
            }
        }
        return Vec::new();
    }

    if is_system_channel(channel_name) {
        // Asterisk's own internal system/spy legs never drive CRM
        // emission even when they are the last visible channel. A
        // PSTN/SBC trunk leg is not caught by this check — it is a real
        // call party and falls through to ordinary resolution below.
        if group_emptied {
            graph.purge_crm_markers(&linkedid);
        }
        return Vec::new();
    }

    let mut effects = Vec::new();

    // Resolve the owning Call: primary match, then the destchannel
    // fallback, then the "this was someone's destination channel"
    // fallback for outbound calls whose PSTN leg hangs up first.
    let primary_ext = extension_from_channel(channel_name);
    let owning_ext = primary_ext
        .clone()
        .filter(|ext| graph.calls.get(ext).is_some_and(|c| c.channel.as_deref() == Some(channel_name)))
        .or_else(|| {
            primary_ext.clone().filter(|ext| {
                graph
                    .calls
                    .get(ext)
                    .is_some_and(|c| c.destchannel.as_deref() == Some(channel_name))
            })
        })
        .or_else(|| graph.destchannel_to_caller_ext.get(channel_name).cloned());

    let Some(owning_ext) = owning_ext else {
        debug!(channel = channel_name, "no Call found for final hangup");
        if group_emptied {
            graph.purge_crm_markers(&linkedid);
        }
        return Vec::new();
    };

    let is_destchannel_fallback = graph
        .calls
        .get(&owning_ext)
        .is_some_and(|c| c.channel.as_deref() != Some(channel_name) && c.destchannel.as_deref() == Some(channel_name));

    if is_destchannel_fallback {
        if let Some(call) = graph.calls.get_mut(&owning_ext) {
            call.destchannel = None;
        }
        if group_emptied {
            graph.purge_crm_markers(&linkedid);
        }
        return effects;
    }

    let call_uniqueid = graph
        .calls
        .get(&owning_ext)
        .and_then(|c| c.uniqueid.clone())
        .or(uniqueid)
        .unwrap_or_default();
    let marker = format!("{linkedid}:{call_uniqueid}");

    if let Some(call) = graph.calls.get(&owning_ext).cloned() {
        if !graph.crm_sent.contains(&marker) {
            if let Some(record) = compose_crm_record(graph, &owning_ext, &call, cause, cfg) {
                graph.crm_sent.insert(marker.clone());
                let answered = call.answer_time.is_some();
                if !answered && is_missed_category(&record.call_status) {
                    effects.push(Effect::RecordNotification(MissedCallNote {
                        extension: owning_ext.clone(),
                        caller: record.caller.clone(),
                        queue: call.queue.clone(),
                        call_id: call_uniqueid.clone(),
                        reason: record.call_status.clone(),
                    }));
                }
                effects.push(Effect::PublishCrm(record));
            }
        }
    }

    graph.calls.remove(&owning_ext);
    if group_emptied {
        graph.purge_crm_markers(&linkedid);
    }

    effects
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::handlers::on_newchannel;
    use crate::transport::parse_frame;
    use chrono::Utc;

    fn setup_two_party_call(graph: &mut Graph, cfg: &MeaningfulNumberConfig) {
        on_newchannel(
            graph,
            &parse_frame("Event: Newchannel\r\nChannel: PJSIP/110-a\r\nUniqueid: 1.1\r\nLinkedid: X\r\nCallerIDNum: 110\r\nExten: 120\r\n"),
            cfg,
        );
        on_newchannel(
            graph,
            &parse_frame("Event: Newchannel\r\nChannel: PJSIP/120-b\r\nUniqueid: 1.2\r\nLinkedid: X\r\nCallerIDNum: 120\r\n"),
            cfg,
        );
        graph.call_mut("110").answer_time = Some(Utc::now());
        graph.call_mut("110").original_destination = Some("120".to_string());
        graph.call_mut("120").answer_time = Some(Utc::now());
    }

    #[test]
    fn intermediate_hangup_does_not_emit_crm() {
        let mut graph = Graph::default();
        let cfg = MeaningfulNumberConfig::default();
        setup_two_party_call(&mut graph, &cfg);

        let effects = on_hangup(&mut graph, &parse_frame("Event: Hangup\r\nChannel: PJSIP/110-a\r\nUniqueid: 1.1\r\nCause: 16\r\n"), &cfg);
        assert!(effects.is_empty());
        assert!(!graph.calls.contains_key("110"));
        assert!(graph.linkedid_groups.contains_key("X"));
    }

    #[test]
    fn final_hangup_emits_one_crm_record_and_purges_marker() {
        let mut graph = Graph::default();
        let cfg = MeaningfulNumberConfig::default();
        setup_two_party_call(&mut graph, &cfg);

        on_hangup(&mut graph, &parse_frame("Event: Hangup\r\nChannel: PJSIP/110-a\r\nUniqueid: 1.1\r\nCause: 16\r\n"), &cfg);
        let effects = on_hangup(&mut graph, &parse_frame("Event: Hangup\r\nChannel: PJSIP/120-b\r\nUniqueid: 1.2\r\nCause: 16\r\n"), &cfg);

        let crm_count = effects.iter().filter(|e| matches!(e, Effect::PublishCrm(_))).count();
        assert_eq!(crm_count, 1);
        assert!(graph.calls.is_empty());
        assert!(!graph.linkedid_groups.contains_key("X"));
        assert!(graph.crm_sent.is_empty(), "marker must be purged once the linkedid group empties");
    }

    #[test]
    fn hangup_for_untracked_channel_does_not_mutate_other_state() {
        let mut graph = Graph::default();
        let cfg = MeaningfulNumberConfig::default();
        setup_two_party_call(&mut graph, &cfg);
        let before = graph.calls.get("110").cloned();

        let effects = on_hangup(&mut graph, &parse_frame("Event: Hangup\r\nChannel: PJSIP/999-z\r\nUniqueid: 9.9\r\nCause: 16\r\n"), &cfg);
        assert!(effects.is_empty());
        assert_eq!(graph.calls.get("110").cloned(), before);
    }

    #[test]
    fn trunk_channel_final_hangup_never_emits_crm() {
        let mut graph = Graph::default();
        let cfg = MeaningfulNumberConfig::default();
        on_newchannel(
            &mut graph,
            &parse_frame("Event: Newchannel\r\nChannel: PJSIP/sbc-a\r\nUniqueid: 2.1\r\nLinkedid: Y\r\nCallerIDNum: 15551234567\r\n"),
            &cfg,
        );
        let effects = on_hangup(&mut graph, &parse_frame("Event: Hangup\r\nChannel: PJSIP/sbc-a\r\nUniqueid: 2.1\r\nCause: 16\r\n"), &cfg);
        assert!(effects.is_empty());
    }
}
