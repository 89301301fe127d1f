//! The live entity graph: extensions, channels, calls, linkedid groups,
//! and queues.
//!
//! The original tracked per-call state as a loose key→value map with
//! dozens of optional fields. Here every entity is a single typed
//! aggregate struct with `Option` fields for anything that is not always
//! known, and the three reference axes (channel → extension, channel →
//! linkedid, extension → call) are modeled as independent maps owned by
//! the correlator rather than embedded pointers, so there are no
//! reference cycles to reason about.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`Call`], mirroring the channel states Asterisk
/// reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallState {
    New,
    Dialing,
    Ringing,
    Up,
    Down,
}

impl CallState {
    pub fn as_str(self) -> &'static str {
        match self {
            CallState::New => "New",
            CallState::Dialing => "Dialing",
            CallState::Ringing => "Ringing",
            CallState::Up => "Up",
            CallState::Down => "Down",
        }
    }
}

/// A monitored extension (loaded from configuration at startup).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extension {
    pub number: String,
    /// Raw AMI `ExtensionStatus`/`DeviceStateChange` status code, if known.
    pub status_code: Option<i64>,
    /// Human-readable status derived from `status_code`.
    pub display_status: String,
}

impl Extension {
    pub fn new(number: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            status_code: None,
            display_status: "Unknown".to_string(),
        }
    }
}

/// One leg of a call as Asterisk names it, e.g. `PJSIP/110-0000001a`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    /// `None` for trunk/system channels (`PJSIP/sbc-...`, `PJSIP/asterisk-...`).
    pub owning_extension: Option<String>,
    pub callerid_num: Option<String>,
    pub uniqueid: Option<String>,
    pub linkedid: Option<String>,
}

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owning_extension: None,
            callerid_num: None,
            uniqueid: None,
            linkedid: None,
        }
    }

    /// True for PBX-internal trunk/system channels that must be tracked
    /// for linkedid bookkeeping but never treated as call endpoints.
    pub fn is_trunk_or_system(&self) -> bool {
        self.owning_extension.is_none()
    }
}

/// The aggregate "this extension currently has a call" record. At most
/// one per extension, per the data model's identity rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Call {
    pub channel: Option<String>,
    pub destchannel: Option<String>,
    pub uniqueid: Option<String>,
    pub linkedid: Option<String>,
    pub state: Option<CallState>,
    pub caller: Option<String>,
    pub callerid: Option<String>,
    pub destination: Option<String>,
    pub original_destination: Option<String>,
    pub exten: Option<String>,
    pub dest_state: Option<String>,
    pub dialstatus: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub answer_time: Option<DateTime<Utc>>,
    pub queue: Option<String>,
    /// The external caller identity for a queue call (set by
    /// `QueueCallerJoin`/`QueueEntry`), distinct from `caller`.
    pub queue_caller: Option<String>,
    pub queue_waiting: bool,
    pub queue_answered: bool,
    pub answered_agent: Option<String>,
    /// Extension of the external party for an inbound trunk call, used by
    /// the payload-composition direction rule.
    pub incoming_caller: Option<String>,
}

impl Call {
    pub fn touch_start(&mut self, now: DateTime<Utc>) {
        if self.start_time.is_none() {
            self.start_time = Some(now);
        }
    }

    pub fn touch_answer(&mut self, now: DateTime<Utc>) {
        if self.answer_time.is_none() {
            self.answer_time = Some(now);
        }
    }
}

/// The set of live channels sharing an Asterisk-assigned linkedid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkedIdGroup {
    pub linkedid: String,
    pub channels: std::collections::HashSet<String>,
}

/// An agent endpoint registered against a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMember {
    pub queue: String,
    pub interface: String,
    pub member_name: String,
    pub status: String,
    pub paused: bool,
    pub pause_reason: Option<String>,
    /// Added/removed via AMI (`QueueMemberAdded`/`QueueMemberRemoved`);
    /// members seen only through sync are static unless Asterisk's
    /// `Membership` field says otherwise.
    pub dynamic: bool,
}

/// A caller waiting in a queue, pre-answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub queue: String,
    pub callerid: String,
    pub position: i64,
    pub entry_time: DateTime<Utc>,
}

/// A queue and its current member roster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Queue {
    pub name: String,
    pub members: std::collections::HashMap<String, QueueMember>,
    pub calls_waiting: i64,
    pub available: i64,
    pub logged_in: i64,
}

impl Queue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}
