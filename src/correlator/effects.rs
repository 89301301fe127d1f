//! Side effects the correlator asks the engine to perform after a lock
//! section completes. Handlers never call sink code directly — they
//! return these values, and the engine dispatches them once the
//! correlator's mutex has been released, per the "never invoke user code
//! while holding a lock" redesign flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One CRM record, ready to hand to a [`crate::sinks::CrmSink`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmRecord {
    pub caller: String,
    pub destination: String,
    pub datetime: DateTime<Utc>,
    pub duration: String,
    pub talk_time: String,
    pub call_status: String,
    pub queue: Option<String>,
    pub call_type: String,
}

/// One missed-call note, ready to hand to a
/// [`crate::sinks::NotificationSink`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissedCallNote {
    pub extension: String,
    pub caller: String,
    pub queue: Option<String>,
    pub call_id: String,
    pub reason: String,
}

/// Something the correlator wants done outside its own lock.
#[derive(Debug, Clone)]
pub enum Effect {
    PublishCrm(CrmRecord),
    RecordNotification(MissedCallNote),
}
