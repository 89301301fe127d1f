//! Free functions shared by the event handlers: extension derivation, the
//! meaningful-number predicate, hangup-cause mapping, and duration
//! formatting. Kept separate from `handlers` because none of these
//! mutate correlator state.

use crate::config::MeaningfulNumberConfig;
use chrono::Duration;

/// Extracts the owning extension from a channel name like
/// `PJSIP/110-0000001a`: the leading run of ASCII digits between the
/// first `/` and the first `-`. Returns `None` for trunk/system channels
/// (`PJSIP/sbc-...`, `PJSIP/asterisk-...`) whose post-`/` segment is not
/// all digits.
pub fn extension_from_channel(channel: &str) -> Option<String> {
    let after_slash = channel.split_once('/')?.1;
    let before_dash = after_slash.split('-').next().unwrap_or(after_slash);
    if !before_dash.is_empty() && before_dash.chars().all(|c| c.is_ascii_digit()) {
        Some(before_dash.to_string())
    } else {
        None
    }
}

/// Extracts the technology prefix from a channel name, e.g. `PJSIP` from
/// `PJSIP/110-0000001a`.
pub fn channel_tech(channel: &str) -> Option<&str> {
    channel.split_once('/').map(|(tech, _)| tech)
}

/// True when `channel` names a trunk/system leg that must never be
/// treated as a call endpoint even though it is tracked for linkedid
/// bookkeeping.
pub fn is_trunk_or_system_channel(channel: &str) -> bool {
    extension_from_channel(channel).is_none()
}

/// True only for Asterisk's own internal system/spy channels
/// (`PJSIP/asterisk-*`, `SIP/asterisk-*`) — narrower than
/// `is_trunk_or_system_channel`. A PSTN/SBC trunk leg (`PJSIP/sbc-*`)
/// also owns no extension, but unlike an internal system channel it is a
/// genuine call party: its hangup can still drive CRM emission. §4.3.5
/// point 4 names only the `asterisk` channels for suppression.
pub fn is_system_channel(channel: &str) -> bool {
    channel
        .split_once('/')
        .map(|(_, rest)| rest)
        .and_then(|rest| rest.split('-').next())
        .is_some_and(|tech| tech.eq_ignore_ascii_case("asterisk"))
}

/// The "meaningful number" predicate (spec §4.3.3): gates promotion of a
/// raw digit string into an authoritative caller/destination field.
pub fn is_meaningful(value: &str, cfg: &MeaningfulNumberConfig) -> bool {
    if value.is_empty() {
        return false;
    }
    let digits = value.strip_prefix('*').unwrap_or(value);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    if cfg.context_keywords.iter().any(|kw| kw == value) {
        return false;
    }
    if value.len() <= 2 {
        return false;
    }
    for (len, lead) in &cfg.digit_prefix_filters {
        if value.len() == *len && value.starts_with(*lead) {
            return false;
        }
    }
    true
}

/// True when `ext` looks like a plausible internal extension: all digits,
/// 3 to 5 characters long.
pub fn looks_internal(ext: &str) -> bool {
    (3..=5).contains(&ext.len()) && !ext.is_empty() && ext.chars().all(|c| c.is_ascii_digit())
}

/// Maps an AMI `Cause` code to a CRM status token (ground truth:
/// `map_cause_to_status` in the source PBX integration).
pub fn map_cause_to_status(cause: i64) -> &'static str {
    match cause {
        16 => "completed",
        17 => "busy",
        18 | 19 | 127 => "noanswer",
        20 => "switched_off",
        21 | 31 => "failed",
        28 | 34 => "invalid_number",
        0 => "busy",
        _ => "failed",
    }
}

/// Dial-status override applied after the cause-code mapping. Returns
/// `None` when `dialstatus` carries no override (notably `ANSWER` has no
/// entry here: it never forces a status change on its own).
pub fn dialstatus_override(dialstatus: &str) -> Option<&'static str> {
    match dialstatus.to_ascii_uppercase().as_str() {
        "CANCEL" => Some("noanswer"),
        "BUSY" => Some("busy"),
        "CONGESTION" => Some("failed"),
        "CHANUNAVAIL" => Some("failed"),
        "NOANSWER" => Some("noanswer"),
        _ => None,
    }
}

/// Numeric `QueueMemberStatus` code → human-readable label.
pub fn queue_member_status_label(code: &str) -> String {
    match code {
        "1" => "Not in use",
        "2" => "In use",
        "3" => "Busy",
        "4" => "Invalid",
        "5" => "Unavailable",
        "6" => "Ringing",
        "7" => "Ring+In use",
        "8" => "On hold",
        other => return format!("Unknown({other})"),
    }
    .to_string()
}

/// Formats a duration as `HH:MM:SS`, matching the CRM payload's required
/// wire format.
pub fn format_duration(d: Duration) -> String {
    let total = d.num_seconds().max(0);
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    format!("{h:02}:{m:02}:{s:02}")
}
