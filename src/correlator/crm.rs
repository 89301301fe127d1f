//! CRM payload composition, §4.4.1. Rules are applied in order; the
//! first one that matches wins. This module only *computes* a record (or
//! decides not to); handing it to the publisher and enforcing the
//! at-most-once marker happens in `hangup.rs`, which is the only caller.

use chrono::Utc;

use super::effects::CrmRecord;
use super::state::Graph;
use super::util::{dialstatus_override, format_duration, is_meaningful, looks_internal, map_cause_to_status};
use crate::config::MeaningfulNumberConfig;
use crate::model::Call;

/// Composes a CRM record for `ext`'s call, or returns `None` if any rule
/// says the record must not be emitted.
pub fn compose_crm_record(
    graph: &Graph,
    ext: &str,
    call: &Call,
    cause: Option<i64>,
    cfg: &MeaningfulNumberConfig,
) -> Option<CrmRecord> {
    // Rule 1: queue call still waiting, hung up from an agent's
    // ring-timeout channel — never emit from the agent's perspective.
    if call.queue_waiting && !call.queue_answered {
        if let Some(queue) = &call.queue {
            if graph.queue_members.contains_key(&format!("{queue}:{ext}")) {
                return None;
            }
        }
    }

    // Rule 2: the extension *is* the queue identifier itself.
    if let Some(queue) = &call.queue {
        if queue == ext {
            return None;
        }
    }

    // Rule 2b: a queue call answered by a different extension already has
    // its authoritative record emitted from that agent's own Call — the
    // caller's raw-callerid shadow Call must not also emit one.
    if let Some(agent) = &call.answered_agent {
        if agent != ext {
            return None;
        }
    }

    // Rule 3: determine direction.
    let (caller, mut destination) = if let Some(qc) = &call.queue_caller {
        if qc != ext {
            (qc.clone(), ext.to_string())
        } else {
            (ext.to_string(), call.original_destination.clone().unwrap_or_default())
        }
    } else if call.incoming_caller.as_deref().is_some_and(|c| c != ext) {
        let inbound_caller = call.incoming_caller.clone().unwrap_or_else(|| ext.to_string());
        (inbound_caller, ext.to_string())
    } else if call.caller.as_deref().is_some_and(|c| c != ext) {
        // `ext` is the callee side of an internal call: its own Call
        // record's `caller` names who dialed it.
        (call.caller.clone().unwrap_or_default(), ext.to_string())
    } else if !looks_internal(ext) {
        let inbound_caller = call.callerid.clone().unwrap_or_else(|| ext.to_string());
        (inbound_caller, ext.to_string())
    } else {
        (ext.to_string(), call.original_destination.clone().unwrap_or_default())
    };

    // Rule 4: destination still resolves to the queue id, but we know who
    // answered — use that instead.
    if let Some(queue) = &call.queue {
        if &destination == queue {
            if let Some(agent) = &call.answered_agent {
                destination = agent.clone();
            }
        }
    }

    // Rule 5: both ends must be meaningful.
    if !is_meaningful(&caller, cfg) || !is_meaningful(&destination, cfg) {
        return None;
    }

    // Rule 6: cause → status, then dial-status override, then the
    // queue-answered override.
    let mut status = cause.map(map_cause_to_status).unwrap_or("failed").to_string();
    if let Some(dialstatus) = &call.dialstatus {
        if let Some(over) = dialstatus_override(dialstatus) {
            status = over.to_string();
        }
    }
    if call.queue_answered && (status == "noanswer" || status == "failed") {
        status = "completed".to_string();
    }

    // Rule 7: durations.
    let now = Utc::now();
    let start = call.start_time.unwrap_or(now);
    let duration = format_duration(now - start);
    let talk_time = match call.answer_time {
        Some(answered) => format_duration(now - answered),
        None => "00:00:00".to_string(),
    };

    // Rule 8: call type classification. An answered queue call carries
    // its inbound signal in `queue_caller`, not `incoming_caller` — use
    // whichever one of the two the direction rule above actually found.
    let inbound = call.queue_caller.as_deref().is_some_and(|c| c != ext)
        || call.incoming_caller.as_deref().is_some_and(|c| c != ext);
    let call_type = if inbound {
        "inbound"
    } else if looks_internal(&destination) {
        "internal"
    } else {
        "outbound"
    };

    Some(CrmRecord {
        caller,
        destination,
        datetime: now,
        duration,
        talk_time,
        call_status: status,
        queue: call.queue.clone(),
        call_type: call_type.to_string(),
    })
}

/// §4.4.2: a missed-call note is recorded only when the call was never
/// answered and the status maps to one of these categories.
pub fn is_missed_category(status: &str) -> bool {
    matches!(status, "busy" | "noanswer" | "switched_off" | "failed" | "invalid_number")
}
