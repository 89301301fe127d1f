//! Top-level wiring. `CallCenterEngine` owns every component and drives
//! the main event loop; `CallCenterEngineBuilder` assembles one from
//! configuration, mirroring the teacher's builder-pattern server
//! construction.

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info};

use crate::config::EngineConfig;
use crate::correlator::{Correlator, Effect};
use crate::dispatcher::ActionDispatcher;
use crate::error::Result;
use crate::projector::{project, Snapshot, ScopeFilter};
use crate::sinks::{CrmPublisher, CrmSink, HttpCrmSink, LoggingCrmSink, LoggingNotificationSink, NotificationSink};
use crate::supervisor::SupervisorApi;
use crate::transport::Transport;

/// A subscriber's scope plus the channel used to push snapshots to it.
pub struct Subscriber {
    pub scope: ScopeFilter,
    pub sender: tokio::sync::mpsc::Sender<Snapshot>,
}

/// Owns every component for one running engine instance.
pub struct CallCenterEngine {
    transport: Arc<Transport>,
    dispatcher: ActionDispatcher,
    correlator: Arc<Correlator>,
    crm_publisher: Option<CrmPublisher>,
    notification_sink: Box<dyn NotificationSink>,
    subscribers: AsyncMutex<Vec<Subscriber>>,
    broadcast_interval: std::time::Duration,
}

impl CallCenterEngine {
    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub fn supervisor(&self) -> SupervisorApi<'_> {
        SupervisorApi::new(&self.dispatcher, &self.correlator)
    }

    /// Registers a subscriber and immediately sends its `initial_state`.
    pub async fn subscribe(&self, scope: ScopeFilter, sender: tokio::sync::mpsc::Sender<Snapshot>) {
        let snapshot = self.correlator.with_graph(|g| project(g, &scope)).await;
        let _ = sender.send(snapshot).await;
        self.subscribers.lock().await.push(Subscriber { scope, sender });
    }

    /// Runs the engine to completion: the event reader loop, dispatching
    /// correlator effects to sinks, and the coalesced broadcast loop. This
    /// only returns when the transport's read lease reports an error
    /// (connection closed), matching §4.1's "no automatic reconnect"
    /// failure behavior.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let broadcaster = {
            let engine = self.clone();
            tokio::spawn(async move { engine.broadcast_loop().await })
        };

        let result = self.event_loop().await;
        broadcaster.abort();
        result
    }

    async fn event_loop(&self) -> Result<()> {
        self.dispatcher.enable_events().await?;
        self.correlator.full_sync(&self.dispatcher).await?;

        loop {
            let frame = {
                let mut lease = self.transport.acquire_lease().await;
                lease.read_frame().await?
            };
            let effects = self.correlator.handle_event(&frame).await;
            if !effects.is_empty() {
                self.dispatch_effects(effects).await;
                self.broadcast_now().await;
            }
        }
    }

    async fn dispatch_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::PublishCrm(record) => {
                    if let Some(publisher) = &self.crm_publisher {
                        publisher.enqueue(record).await;
                    }
                }
                Effect::RecordNotification(note) => {
                    if let Err(err) = self.notification_sink.record(&note).await {
                        error!(%err, "notification sink failed");
                    }
                }
            }
        }
    }

    async fn broadcast_loop(&self) {
        let mut ticker = tokio::time::interval(self.broadcast_interval);
        loop {
            ticker.tick().await;
            self.broadcast_now().await;
        }
    }

    async fn broadcast_now(&self) {
        let subscribers = self.subscribers.lock().await;
        for sub in subscribers.iter() {
            let snapshot = self.correlator.with_graph(|g| project(g, &sub.scope)).await;
            let _ = sub.sender.try_send(snapshot);
        }
    }
}

pub struct CallCenterEngineBuilder {
    config: EngineConfig,
}

impl CallCenterEngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub async fn build(self) -> Result<Arc<CallCenterEngine>> {
        let config = self.config;
        info!(host = %config.ami.host, port = config.ami.port, "connecting to AMI");
        let transport = Arc::new(Transport::connect(&config.ami.host, config.ami.port, &config.ami.username, &config.ami.secret).await?);
        let dispatcher = ActionDispatcher::new(transport.clone(), &config.ami);
        let correlator = Arc::new(Correlator::new(&config));

        let crm_publisher = match &config.crm {
            Some(crm_config) => {
                let sink: Box<dyn CrmSink> = Box::new(HttpCrmSink::new(crm_config)?);
                Some(CrmPublisher::spawn(sink, crm_config.channel_capacity))
            }
            None => {
                let sink: Box<dyn CrmSink> = Box::new(LoggingCrmSink);
                Some(CrmPublisher::spawn(sink, 256))
            }
        };

        Ok(Arc::new(CallCenterEngine {
            transport,
            dispatcher,
            correlator,
            crm_publisher,
            notification_sink: Box::new(LoggingNotificationSink),
            subscribers: AsyncMutex::new(Vec::new()),
            broadcast_interval: std::time::Duration::from_millis(config.broadcast_interval_ms),
        }))
    }
}
