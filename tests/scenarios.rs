//! End-to-end scenarios, spec §8. Each test drives a `Correlator` through
//! a realistic event sequence and checks the resulting CRM effects and
//! the end-of-sequence graph state, using only the crate's public API.

use ami_callcenter_engine::config::{AmiConfig, EngineConfig, MeaningfulNumberConfig};
use ami_callcenter_engine::correlator::{Correlator, Effect};
use ami_callcenter_engine::transport::parse_frame;

fn test_config() -> EngineConfig {
    EngineConfig {
        ami: AmiConfig {
            host: "127.0.0.1".into(),
            port: 5038,
            username: "admin".into(),
            secret: "secret".into(),
            action_timeout_secs: 5,
            multi_event_timeout_secs: 10,
        },
        monitored_extensions: vec!["110".into(), "120".into(), "200".into(), "201".into(), "202".into()],
        crm: None,
        meaningful_number: MeaningfulNumberConfig::default(),
        broadcast_interval_ms: 500,
    }
}

fn crm_records(effects: Vec<Effect>) -> Vec<ami_callcenter_engine::correlator::CrmRecord> {
    effects
        .into_iter()
        .filter_map(|e| match e {
            Effect::PublishCrm(r) => Some(r),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn scenario_1_outbound_internal_call_completes() {
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
        .handle_event(&parse_frame(
            "Event: Bridge\r\nChannel1: PJSIP/110-a\r\nChannel2: PJSIP/120-b\r\nLinkedid: X\r\nCallerID1: 110\r\nCallerID2: 120\r\n",
        ))
        .await;
    let first_hangup = correlator
        .handle_event(&parse_frame("Event: Hangup\r\nChannel: PJSIP/110-a\r\nUniqueid: 1.1\r\nCause: 16\r\n"))
        .await;
    assert!(crm_records(first_hangup).is_empty(), "intermediate hangup must not emit CRM");

    let final_hangup = correlator
        .handle_event(&parse_frame("Event: Hangup\r\nChannel: PJSIP/120-b\r\nUniqueid: 1.2\r\nCause: 16\r\n"))
        .await;
    let records = crm_records(final_hangup);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].caller, "110");
    assert_eq!(records[0].destination, "120");
    assert_eq!(records[0].call_type, "internal");
    assert_eq!(records[0].call_status, "completed");

    let active_calls = correlator.with_graph(|g| g.calls.len()).await;
    assert_eq!(active_calls, 0, "active_calls must be empty once the logical call ends");
    let markers = correlator.with_graph(|g| g.crm_sent.len()).await;
    assert_eq!(markers, 0, "the crm_sent marker must be purged when the linkedid group empties");
}

#[tokio::test]
async fn scenario_2_inbound_trunk_call_answered() {
    let correlator = Correlator::new(&test_config());

    correlator
        .handle_event(&parse_frame(
            "Event: Newchannel\r\nChannel: PJSIP/sbc-a\r\nUniqueid: 2.1\r\nCallerIDNum: 15551234567\r\nExten: 110\r\n",
        ))
        .await;
    correlator
        .handle_event(&parse_frame("Event: DialBegin\r\nChannel: PJSIP/sbc-a\r\nDestChannel: PJSIP/110-b\r\nDestExten: 110\r\n"))
        .await;
    correlator
        .handle_event(&parse_frame("Event: Newstate\r\nChannel: PJSIP/110-b\r\nChannelStateDesc: Up\r\n"))
        .await;
    correlator
        .handle_event(&parse_frame(
            "Event: Bridge\r\nChannel1: PJSIP/sbc-a\r\nChannel2: PJSIP/110-b\r\nLinkedid: Y\r\nCallerID1: 15551234567\r\nCallerID2: 110\r\n",
        ))
        .await;

    // The extension's own leg is the last non-trunk channel in the
    // group, so its Hangup is the final one: the trunk leg is excluded
    // from "remaining" regardless of whether it has hung up yet.
    let extension_hangup = correlator
        .handle_event(&parse_frame("Event: Hangup\r\nChannel: PJSIP/110-b\r\nUniqueid: 2.2\r\nCause: 16\r\n"))
        .await;
    let records = crm_records(extension_hangup);
    assert_eq!(records.len(), 1, "extension's hangup is the final one and must emit");
    assert_eq!(records[0].caller, "15551234567");
    assert_eq!(records[0].destination, "110");
    assert_eq!(records[0].call_type, "inbound");
    assert_eq!(records[0].call_status, "completed");

    let trunk_hangup = correlator
        .handle_event(&parse_frame("Event: Hangup\r\nChannel: PJSIP/sbc-a\r\nUniqueid: 2.1\r\nCause: 16\r\n"))
        .await;
    assert!(
        crm_records(trunk_hangup).is_empty(),
        "trunk channel hangup must never itself drive CRM emission"
    );
}

#[tokio::test]
async fn scenario_3_queue_call_agent_answers() {
    let correlator = Correlator::new(&test_config());

    correlator
        .handle_event(&parse_frame(
            "Event: QueueCallerJoin\r\nQueue: sales\r\nUniqueid: U\r\nChannel: PJSIP/sbc-a\r\nCallerIDNum: 15551234567\r\n",
        ))
        .await;
    correlator
        .handle_event(&parse_frame("Event: AgentCalled\r\nQueue: sales\r\nInterface: PJSIP/200\r\nDestChannel: PJSIP/200-b\r\n"))
        .await;
    correlator
        .handle_event(&parse_frame(
            "Event: AgentConnect\r\nQueue: sales\r\nInterface: PJSIP/200\r\nMemberChannel: PJSIP/200-b\r\nCallerIDNum: 15551234567\r\n",
        ))
        .await;
    correlator
        .handle_event(&parse_frame("Event: Newstate\r\nChannel: PJSIP/200-b\r\nChannelStateDesc: Up\r\n"))
        .await;
    correlator
        .handle_event(&parse_frame(
            "Event: Bridge\r\nChannel1: PJSIP/sbc-a\r\nChannel2: PJSIP/200-b\r\nLinkedid: Z\r\nCallerID1: 15551234567\r\nCallerID2: 200\r\n",
        ))
        .await;

    assert!(correlator.with_graph(|g| g.calls["200"].queue_answered).await);
    assert!(!correlator.with_graph(|g| g.calls["200"].queue_waiting).await);

    // The agent's own leg is the last non-trunk channel in the group
    // (the caller's PJSIP/sbc-a is excluded from "remaining"), so this
    // is the final hangup and must emit from the agent's perspective.
    let agent_hangup = correlator
        .handle_event(&parse_frame("Event: Hangup\r\nChannel: PJSIP/200-b\r\nUniqueid: 3.2\r\nCause: 16\r\n"))
        .await;
    let records = crm_records(agent_hangup);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].caller, "15551234567");
    assert_eq!(records[0].destination, "200");
    assert_eq!(records[0].queue.as_deref(), Some("sales"));
    assert_eq!(records[0].call_type, "inbound");
    assert_eq!(records[0].call_status, "completed");

    let trunk_hangup = correlator
        .handle_event(&parse_frame("Event: Hangup\r\nChannel: PJSIP/sbc-a\r\nUniqueid: 3.1\r\nCause: 16\r\n"))
        .await;
    assert!(crm_records(trunk_hangup).is_empty(), "the Call was already emitted and removed at the agent's hangup");
}

/// Multiple agents ring in succession and each ring channel hangs up
/// while the caller is still waiting; only the caller's eventual hangup
/// may emit a CRM record, never the agents' ring-timeout legs.
#[tokio::test]
async fn scenario_4_queue_call_multiple_agents_abandon() {
    let correlator = Correlator::new(&test_config());

    correlator
        .handle_event(&parse_frame(
            "Event: QueueCallerJoin\r\nQueue: sales\r\nUniqueid: U\r\nChannel: PJSIP/sbc-a\r\nCallerIDNum: 15551234567\r\n",
        ))
        .await;

    for (agent, channel) in [("200", "PJSIP/200-b"), ("201", "PJSIP/201-b"), ("202", "PJSIP/202-b")] {
        let called = correlator
            .handle_event(&parse_frame(&format!(
                "Event: AgentCalled\r\nQueue: sales\r\nInterface: PJSIP/{agent}\r\nDestChannel: {channel}\r\n"
            )))
            .await;
        assert!(crm_records(called).is_empty());

        let ring_hangup = correlator
            .handle_event(&parse_frame(&format!("Event: Hangup\r\nChannel: {channel}\r\nUniqueid: 4.{agent}\r\nCause: 17\r\n")))
            .await;
        assert!(
            crm_records(ring_hangup).is_empty(),
            "an agent's ring-timeout leg must never itself emit a CRM record"
        );
    }

    let caller_hangup = correlator
        .handle_event(&parse_frame("Event: Hangup\r\nChannel: PJSIP/sbc-a\r\nUniqueid: U\r\nCause: 16\r\n"))
        .await;
    let records = crm_records(caller_hangup);
    assert_eq!(records.len(), 1, "exactly one record, for the caller, once it finally hangs up");
    // Open Question 1: cause 16 maps to `completed` by the original's own
    // `map_cause_to_status` ground truth, regardless of whether the call
    // was ever answered — there is no separate `abandoned` status.
    assert_eq!(records[0].call_status, "completed");
}

#[tokio::test]
async fn scenario_5_transfer_leaves_one_leg_active() {
    let correlator = Correlator::new(&test_config());

    correlator
        .handle_event(&parse_frame("Event: Newchannel\r\nChannel: PJSIP/110-a\r\nUniqueid: 5.1\r\nLinkedid: T\r\nCallerIDNum: 110\r\nExten: 120\r\n"))
        .await;
    correlator
        .handle_event(&parse_frame("Event: Newchannel\r\nChannel: PJSIP/120-b\r\nUniqueid: 5.2\r\nLinkedid: T\r\nCallerIDNum: 120\r\n"))
        .await;
    correlator
        .handle_event(&parse_frame(
            "Event: Bridge\r\nChannel1: PJSIP/110-a\r\nChannel2: PJSIP/120-b\r\nLinkedid: T\r\nCallerID1: 110\r\nCallerID2: 120\r\n",
        ))
        .await;

    // The supervisor redirects 110's channel elsewhere; from the
    // correlator's point of view this looks like 110's channel hanging up
    // while 120's leg, sharing the same linkedid, remains live.
    let first_hangup = correlator
        .handle_event(&parse_frame("Event: Hangup\r\nChannel: PJSIP/110-a\r\nUniqueid: 5.1\r\nCause: 16\r\n"))
        .await;
    assert!(crm_records(first_hangup).is_empty(), "other channels in the linkedid group are still active");
    assert!(!correlator.with_graph(|g| g.calls.contains_key("110")).await);
    assert!(correlator.with_graph(|g| g.linkedid_groups.contains_key("T")).await);

    let final_hangup = correlator
        .handle_event(&parse_frame("Event: Hangup\r\nChannel: PJSIP/120-b\r\nUniqueid: 5.2\r\nCause: 16\r\n"))
        .await;
    let records = crm_records(final_hangup);
    assert_eq!(records.len(), 1, "the final leg's hangup emits exactly one CRM record");
}

#[tokio::test]
async fn scenario_6_feature_code_no_crm() {
    let correlator = Correlator::new(&test_config());

    correlator
        .handle_event(&parse_frame("Event: Newchannel\r\nChannel: PJSIP/110-a\r\nUniqueid: 6.1\r\nCallerIDNum: 110\r\nExten: *43\r\n"))
        .await;
    assert_eq!(correlator.with_graph(|g| g.calls["110"].original_destination.clone()).await, Some("*43".to_string()));

    correlator
        .handle_event(&parse_frame("Event: Newstate\r\nChannel: PJSIP/110-a\r\nChannelStateDesc: Up\r\n"))
        .await;
    let effects = correlator
        .handle_event(&parse_frame("Event: Hangup\r\nChannel: PJSIP/110-a\r\nUniqueid: 6.1\r\nCause: 16\r\n"))
        .await;
    assert!(crm_records(effects).is_empty(), "a single-party feature code call has no meaningful destination side");
}

#[tokio::test]
async fn boundary_hangup_for_unknown_channel_does_not_mutate_state() {
    let correlator = Correlator::new(&test_config());
    correlator
        .handle_event(&parse_frame("Event: Newchannel\r\nChannel: PJSIP/110-a\r\nUniqueid: 7.1\r\nLinkedid: B\r\nCallerIDNum: 110\r\nExten: 120\r\n"))
        .await;
    let before = correlator.with_graph(|g| g.calls.get("110").cloned()).await;

    let effects = correlator
        .handle_event(&parse_frame("Event: Hangup\r\nChannel: PJSIP/999-z\r\nUniqueid: 9.9\r\nCause: 16\r\n"))
        .await;
    assert!(crm_records(effects).is_empty());
    assert_eq!(correlator.with_graph(|g| g.calls.get("110").cloned()).await, before);
}
