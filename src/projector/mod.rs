//! State Projector, §4.5. Builds a read-only, scope-filtered snapshot of
//! the correlator's graph for push to external subscribers. Never
//! mutates anything it reads, and never keeps a reference to the graph
//! after it returns — everything in a [`Snapshot`] is an owned copy.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::correlator::Graph;
use crate::model::{CallState, Queue, QueueEntry, QueueMember};

/// Which extensions/queues a subscriber is allowed to see.
#[derive(Debug, Clone)]
pub enum Scope {
    All,
    Only(std::collections::HashSet<String>),
}

impl Scope {
    fn allows(&self, key: &str) -> bool {
        match self {
            Scope::All => true,
            Scope::Only(set) => set.contains(key),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScopeFilter {
    pub allow_extensions: Scope,
    pub allow_queues: Scope,
}

impl ScopeFilter {
    pub fn unrestricted() -> Self {
        Self {
            allow_extensions: Scope::All,
            allow_queues: Scope::All,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionView {
    pub status_token: String,
    pub raw_code: Option<i64>,
    pub active_call: Option<CallView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallView {
    pub caller: Option<String>,
    pub destination: Option<String>,
    pub state: String,
    pub queue: Option<String>,
    pub dialstatus: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SnapshotStats {
    pub extensions: usize,
    pub active_calls: usize,
    pub queues: usize,
    pub queue_members: usize,
    pub queue_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub extensions: HashMap<String, ExtensionView>,
    pub active_calls: HashMap<String, CallView>,
    pub queues: HashMap<String, Queue>,
    pub queue_members: HashMap<String, QueueMember>,
    pub queue_entries: HashMap<String, QueueEntry>,
    pub stats: SnapshotStats,
}

/// An extension is a "callee" — the receiving side of an internal call —
/// when its Call's `caller` field looks like another internal extension.
/// Callees are excluded from `active_calls` since including them would
/// duplicate the caller's own entry under a different key.
fn is_callee(call: &crate::model::Call) -> bool {
    call.caller
        .as_deref()
        .is_some_and(|c| c.chars().all(|ch| ch.is_ascii_digit()) && c.len() <= 5)
}

/// Builds a scope-filtered snapshot. Pure: takes a `&Graph`, returns an
/// owned `Snapshot`, never touches `graph` mutably.
pub fn project(graph: &Graph, scope: &ScopeFilter) -> Snapshot {
    let mut extensions = HashMap::new();
    for (number, ext) in &graph.extensions {
        if !scope.allow_extensions.allows(number) {
            continue;
        }
        let active_call = graph.calls.get(number).filter(|c| c.state != Some(CallState::Down)).map(to_call_view);
        extensions.insert(
            number.clone(),
            ExtensionView {
                status_token: ext.display_status.clone(),
                raw_code: ext.status_code,
                active_call,
            },
        );
    }

    let mut active_calls = HashMap::new();
    for (ext, call) in &graph.calls {
        if !scope.allow_extensions.allows(ext) {
            continue;
        }
        if call.state == Some(CallState::Down) {
            continue;
        }
        if is_callee(call) {
            continue;
        }
        active_calls.insert(ext.clone(), to_call_view(call));
    }

    let queues: HashMap<String, Queue> = graph
        .queues
        .iter()
        .filter(|(name, _)| name.as_str() != "default" && scope.allow_queues.allows(name))
        .map(|(name, q)| (name.clone(), q.clone()))
        .collect();

    let queue_members: HashMap<String, QueueMember> = graph
        .queue_members
        .iter()
        .filter(|(_, m)| m.queue != "default" && scope.allow_queues.allows(&m.queue))
        .map(|(k, m)| (k.clone(), m.clone()))
        .collect();

    let queue_entries: HashMap<String, QueueEntry> = graph
        .queue_entries
        .iter()
        .filter(|(_, e)| e.queue != "default" && scope.allow_queues.allows(&e.queue))
        .map(|(k, e)| (k.clone(), e.clone()))
        .collect();

    let stats = SnapshotStats {
        extensions: extensions.len(),
        active_calls: active_calls.len(),
        queues: queues.len(),
        queue_members: queue_members.len(),
        queue_entries: queue_entries.len(),
    };

    Snapshot {
        extensions,
        active_calls,
        queues,
        queue_members,
        queue_entries,
        stats,
    }
}

fn to_call_view(call: &crate::model::Call) -> CallView {
    CallView {
        caller: call.caller.clone().or_else(|| call.callerid.clone()),
        destination: call.destination.clone().or_else(|| call.original_destination.clone()),
        state: call.state.map(|s| s.as_str().to_string()).unwrap_or_else(|| "Unknown".to_string()),
        queue: call.queue.clone(),
        dialstatus: call.dialstatus.clone(),
    }
}
