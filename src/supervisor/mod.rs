//! Supervisor operations, §6. Thin wrappers over AMI actions plus an
//! optimistic local correlator update, grounded in the original's
//! `hangup_call`/`_channel_for_transfer_source`/`transfer_call`/
//! `_chanspy`/`listen_to_call`/`whisper_to_call`/`barge_into_call`/
//! `queue_add`/`queue_remove`/`queue_pause` functions.

use std::collections::BTreeMap;

use tracing::warn;

use crate::correlator::Correlator;
use crate::dispatcher::ActionDispatcher;
use crate::error::{CallCenterError, Result};
use crate::model::QueueMember;

/// `ChanSpy` option strings for the three supervisor listen modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpyMode {
    Listen,
    Whisper,
    Barge,
}

impl SpyMode {
    fn options(self) -> &'static str {
        match self {
            SpyMode::Listen => "qsE",
            SpyMode::Whisper => "qwsE",
            SpyMode::Barge => "qBsE",
        }
    }
}

pub struct SupervisorApi<'a> {
    dispatcher: &'a ActionDispatcher,
    correlator: &'a Correlator,
}

impl<'a> SupervisorApi<'a> {
    pub fn new(dispatcher: &'a ActionDispatcher, correlator: &'a Correlator) -> Self {
        Self { dispatcher, correlator }
    }

    /// Finds `extension`'s primary channel and hangs it up.
    pub async fn hangup(&self, extension: &str) -> Result<()> {
        let channel = self
            .correlator
            .with_graph(|g| g.calls.get(extension).and_then(|c| c.channel.clone()))
            .await
            .ok_or_else(|| CallCenterError::Invariant(format!("no active channel for extension {extension}")))?;

        let mut params = BTreeMap::new();
        params.insert("Channel".to_string(), channel);
        let response = self.dispatcher.send("Hangup", params).await?;
        ensure_success(&response, "Hangup")
    }

    /// Resolves `source` to a channel — either its own primary channel, or,
    /// if `source` is the number it is currently talking to (a
    /// "talking-to" lookup), the bridge peer reached by linkedid — then
    /// sends `Redirect`.
    pub async fn transfer(&self, source: &str, destination: &str, context: &str, priority: &str) -> Result<()> {
        let channel = self.resolve_transfer_source(source).await?;

        let mut params = BTreeMap::new();
        params.insert("Channel".to_string(), channel);
        params.insert("Exten".to_string(), destination.to_string());
        params.insert("Context".to_string(), context.to_string());
        params.insert("Priority".to_string(), priority.to_string());
        let response = self.dispatcher.send("Redirect", params).await?;
        ensure_success(&response, "Redirect")
    }

    async fn resolve_transfer_source(&self, source: &str) -> Result<String> {
        self.correlator
            .with_graph(|g| {
                if let Some(channel) = g.calls.get(source).and_then(|c| c.channel.clone()) {
                    return Some(channel);
                }
                // `source` might be a "talking-to" number: find the call
                // whose destination is `source`, then resolve the bridge
                // peer's channel via the shared linkedid.
                let (_, call) = g.calls.iter().find(|(_, c)| c.destination.as_deref() == Some(source))?;
                let linkedid = call.linkedid.as_ref()?;
                let group = g.linkedid_groups.get(linkedid)?;
                group
                    .channels
                    .iter()
                    .find(|ch| call.channel.as_deref() != Some(ch.as_str()))
                    .cloned()
            })
            .await
            .ok_or_else(|| CallCenterError::Invariant(format!("could not resolve transfer source {source}")))
    }

    pub async fn listen(&self, supervisor: &str, target: &str) -> Result<()> {
        self.chanspy(supervisor, target, SpyMode::Listen).await
    }

    pub async fn whisper(&self, supervisor: &str, target: &str) -> Result<()> {
        self.chanspy(supervisor, target, SpyMode::Whisper).await
    }

    pub async fn barge(&self, supervisor: &str, target: &str) -> Result<()> {
        self.chanspy(supervisor, target, SpyMode::Barge).await
    }

    /// Resolves `target`'s channel, strips the trailing `-nnnnnnnn` suffix
    /// to obtain the spy prefix, and originates a call from `supervisor`
    /// into `ChanSpy` with the mode's option string.
    async fn chanspy(&self, supervisor: &str, target: &str, mode: SpyMode) -> Result<()> {
        let channel = self
            .correlator
            .with_graph(|g| g.calls.get(target).and_then(|c| c.channel.clone()))
            .await
            .ok_or_else(|| CallCenterError::Invariant(format!("no active channel for target {target}")))?;

        let prefix = channel.rsplit_once('-').map(|(p, _)| p).unwrap_or(&channel);
        let mut params = BTreeMap::new();
        params.insert("Channel".to_string(), format!("PJSIP/{supervisor}"));
        params.insert("Application".to_string(), "ChanSpy".to_string());
        params.insert("Data".to_string(), format!("{prefix},{}", mode.options()));
        params.insert("Context".to_string(), "from-internal".to_string());
        let response = self.dispatcher.send("Originate", params).await?;
        ensure_success(&response, "Originate")
    }

    /// Adds a dynamic member to a queue, updating local state optimistically
    /// before the `QueueMemberAdded` event echo arrives.
    pub async fn queue_add(&self, queue: &str, interface: &str, member_name: &str) -> Result<()> {
        let mut params = BTreeMap::new();
        params.insert("Queue".to_string(), queue.to_string());
        params.insert("Interface".to_string(), interface.to_string());
        params.insert("MemberName".to_string(), member_name.to_string());
        let response = self.dispatcher.send("QueueAdd", params).await?;
        ensure_success(&response, "QueueAdd")?;

        let key = format!("{queue}:{interface}");
        self.correlator
            .with_graph_mut(|g| {
                g.dynamic_members.insert(key.clone());
                g.queue_members.insert(
                    key,
                    QueueMember {
                        queue: queue.to_string(),
                        interface: interface.to_string(),
                        member_name: member_name.to_string(),
                        status: "Not in use".to_string(),
                        paused: false,
                        pause_reason: None,
                        dynamic: true,
                    },
                );
            })
            .await;
        Ok(())
    }

    /// Removes a member from a queue. Asterisk rejects removal of a static
    /// member with an error response; ground truth treats that as "mark it
    /// static locally" rather than a hard failure.
    pub async fn queue_remove(&self, queue: &str, interface: &str) -> Result<()> {
        let mut params = BTreeMap::new();
        params.insert("Queue".to_string(), queue.to_string());
        params.insert("Interface".to_string(), interface.to_string());
        let response = self.dispatcher.send("QueueRemove", params).await?;
        let key = format!("{queue}:{interface}");

        if response.first().is_some_and(|f| f.is_success()) {
            self.correlator
                .with_graph_mut(|g| {
                    g.queue_members.remove(&key);
                    g.dynamic_members.remove(&key);
                })
                .await;
            return Ok(());
        }

        let message = response.first().and_then(|f| f.get("Message")).unwrap_or("");
        if message.to_lowercase().contains("not dynamic") {
            self.correlator
                .with_graph_mut(|g| {
                    g.dynamic_members.remove(&key);
                    if let Some(member) = g.queue_members.get_mut(&key) {
                        member.dynamic = false;
                    }
                })
                .await;
            warn!(queue, interface, "member is static; marked local state accordingly instead of removing");
            return Ok(());
        }

        Err(CallCenterError::ActionFailure(format!("QueueRemove failed: {message}")))
    }

    pub async fn queue_pause(&self, queue: &str, interface: &str, reason: Option<&str>) -> Result<()> {
        self.set_paused(queue, interface, true, reason).await
    }

    pub async fn queue_unpause(&self, queue: &str, interface: &str) -> Result<()> {
        self.set_paused(queue, interface, false, None).await
    }

    async fn set_paused(&self, queue: &str, interface: &str, paused: bool, reason: Option<&str>) -> Result<()> {
        let mut params = BTreeMap::new();
        params.insert("Queue".to_string(), queue.to_string());
        params.insert("Interface".to_string(), interface.to_string());
        params.insert("Paused".to_string(), if paused { "true" } else { "false" }.to_string());
        if let Some(reason) = reason {
            params.insert("Reason".to_string(), reason.to_string());
        }
        let response = self.dispatcher.send("QueuePause", params).await?;
        ensure_success(&response, "QueuePause")?;

        let key = format!("{queue}:{interface}");
        let reason = reason.map(str::to_string);
        self.correlator
            .with_graph_mut(|g| {
                if let Some(member) = g.queue_members.get_mut(&key) {
                    member.paused = paused;
                    member.pause_reason = if paused { reason } else { None };
                }
            })
            .await;
        Ok(())
    }
}

fn ensure_success(response: &[crate::transport::Frame], action: &str) -> Result<()> {
    match response.first() {
        Some(frame) if frame.is_success() => Ok(()),
        Some(frame) => Err(CallCenterError::ActionFailure(format!(
            "{action} failed: {}",
            frame.get("Message").unwrap_or("no message")
        ))),
        None => Err(CallCenterError::ActionFailure(format!("{action} produced no response"))),
    }
}
