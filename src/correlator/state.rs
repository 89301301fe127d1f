//! The live entity graph and the mutex that serializes every mutation of
//! it. Three independent maps (channels, calls, linkedid groups) plus the
//! queue maps — no entity holds a pointer to another; all cross-entity
//! navigation goes through these maps by key, per the cyclic-reference
//! redesign flag.

use std::collections::{HashMap, HashSet};

use crate::model::{Call, Channel, Extension, LinkedIdGroup, Queue, QueueEntry, QueueMember};

/// Everything the correlator knows right now.
#[derive(Debug, Default)]
pub struct Graph {
    pub extensions: HashMap<String, Extension>,
    pub channels: HashMap<String, Channel>,
    /// Keyed by extension: at most one active call per extension.
    pub calls: HashMap<String, Call>,
    pub linkedid_groups: HashMap<String, LinkedIdGroup>,
    pub queues: HashMap<String, Queue>,
    /// Keyed by `"{queue}:{interface}"`.
    pub queue_members: HashMap<String, QueueMember>,
    pub dynamic_members: HashSet<String>,
    /// Keyed by caller channel uniqueid.
    pub queue_entries: HashMap<String, QueueEntry>,
    /// `"{linkedid}:{uniqueid}"` markers for calls a CRM record has
    /// already been emitted for.
    pub crm_sent: HashSet<String>,
    /// Maps a dialed destination channel back to the extension that
    /// originated the dial, so `DialEnd`/`Newstate` on the destination
    /// leg can be mirrored onto the caller's Call.
    pub destchannel_to_caller_ext: HashMap<String, String>,
    /// Extensions loaded from configuration at startup; used by the
    /// "is this extension one we actually track" invariant.
    pub monitored_extensions: HashSet<String>,
}

impl Graph {
    pub fn new(monitored_extensions: impl IntoIterator<Item = String>) -> Self {
        let monitored_extensions: HashSet<String> = monitored_extensions.into_iter().collect();
        let extensions = monitored_extensions
            .iter()
            .map(|e| (e.clone(), Extension::new(e.clone())))
            .collect();
        Self {
            extensions,
            monitored_extensions,
            ..Default::default()
        }
    }

    pub fn call_mut(&mut self, ext: &str) -> &mut Call {
        self.calls.entry(ext.to_string()).or_default()
    }

    /// Adds `channel` to the linkedid group `linkedid`, creating the group
    /// if this is the first channel to report it.
    pub fn link_channel(&mut self, channel: &str, linkedid: &str) {
        self.linkedid_groups
            .entry(linkedid.to_string())
            .or_insert_with(|| LinkedIdGroup {
                linkedid: linkedid.to_string(),
                channels: HashSet::new(),
            })
            .channels
            .insert(channel.to_string());
    }

    /// Removes `channel` from `linkedid`'s group. Returns the group's
    /// remaining channel count, and whether the group was removed because
    /// it emptied.
    pub fn unlink_channel(&mut self, channel: &str, linkedid: &str) -> (usize, bool) {
        let Some(group) = self.linkedid_groups.get_mut(linkedid) else {
            return (0, false);
        };
        group.channels.remove(channel);
        if group.channels.is_empty() {
            self.linkedid_groups.remove(linkedid);
            (0, true)
        } else {
            (group.channels.len(), false)
        }
    }

    /// Non-trunk/system channels still present in `linkedid`'s group.
    pub fn remaining_non_trunk_channels(&self, linkedid: &str) -> Vec<String> {
        let Some(group) = self.linkedid_groups.get(linkedid) else {
            return Vec::new();
        };
        group
            .channels
            .iter()
            .filter(|ch| !crate::correlator::util::is_trunk_or_system_channel(ch))
            .cloned()
            .collect()
    }

    /// Purges every `crm_sent` marker belonging to `linkedid`.
    pub fn purge_crm_markers(&mut self, linkedid: &str) {
        let prefix = format!("{linkedid}:");
        self.crm_sent.retain(|k| !k.starts_with(&prefix));
    }

    pub fn queue_mut(&mut self, name: &str) -> &mut Queue {
        self.queues.entry(name.to_string()).or_insert_with(|| Queue::new(name))
    }

    pub fn recalc_calls_waiting(&mut self, queue: &str) {
        let count = self.queue_entries.values().filter(|e| e.queue == queue).count() as i64;
        if let Some(q) = self.queues.get_mut(queue) {
            q.calls_waiting = count;
        }
    }
}
