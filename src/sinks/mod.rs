//! Sinks, §4.4: the two places a correlator `Effect` can end up. Both are
//! async trait objects so the engine can swap in a logging-only
//! implementation for local development without touching the wiring.
//!
//! The CRM sink runs behind a bounded `mpsc` channel and a dedicated
//! publisher task rather than being awaited inline from the event loop —
//! a slow or down CRM endpoint must never stall event processing, and a
//! bounded channel gives natural backpressure instead of unbounded
//! memory growth if the endpoint falls behind.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::{CrmAuth, CrmConfig};
use crate::correlator::{CrmRecord, MissedCallNote};
use crate::error::{CallCenterError, Result};

#[async_trait]
pub trait CrmSink: Send + Sync {
    async fn publish(&self, record: &CrmRecord) -> Result<()>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn record(&self, note: &MissedCallNote) -> Result<()>;
}

/// Default sink: logs at `info` level. Always available, zero external
/// dependencies — useful standalone and as the fallback when no CRM
/// endpoint is configured.
pub struct LoggingCrmSink;

#[async_trait]
impl CrmSink for LoggingCrmSink {
    async fn publish(&self, record: &CrmRecord) -> Result<()> {
        info!(
            caller = %record.caller,
            destination = %record.destination,
            status = %record.call_status,
            call_type = %record.call_type,
            queue = ?record.queue,
            "crm record"
        );
        Ok(())
    }
}

pub struct LoggingNotificationSink;

#[async_trait]
impl NotificationSink for LoggingNotificationSink {
    async fn record(&self, note: &MissedCallNote) -> Result<()> {
        info!(
            extension = %note.extension,
            caller = %note.caller,
            reason = %note.reason,
            queue = ?note.queue,
            "missed call notification"
        );
        Ok(())
    }
}

/// Publishes CRM records to an HTTP endpoint. Authentication, retry, and
/// backoff policy on that endpoint are explicitly out of scope here — one
/// POST per record, mapped to `CallCenterError::SinkFailure` on a non-2xx
/// response or transport error.
pub struct HttpCrmSink {
    client: reqwest::Client,
    endpoint_url: String,
    auth: CrmAuth,
}

impl HttpCrmSink {
    pub fn new(config: &CrmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| CallCenterError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint_url: config.endpoint_url.clone(),
            auth: config.auth.clone().unwrap_or(CrmAuth::None),
        })
    }
}

#[async_trait]
impl CrmSink for HttpCrmSink {
    async fn publish(&self, record: &CrmRecord) -> Result<()> {
        let mut request = self.client.post(&self.endpoint_url).json(record);
        request = match &self.auth {
            CrmAuth::None => request,
            CrmAuth::ApiKey { key, header } => request.header(header.as_str(), key.as_str()),
            CrmAuth::Basic { username, password } => request.basic_auth(username, Some(password)),
            CrmAuth::Bearer { token } => request.bearer_auth(token),
        };

        let response = request
            .send()
            .await
            .map_err(|e| CallCenterError::SinkFailure(format!("crm request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CallCenterError::SinkFailure(format!(
                "crm endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Front door for CRM publishing: hands records off to a bounded channel
/// drained by a dedicated worker, so `publish` never blocks the caller on
/// network I/O.
pub struct CrmPublisher {
    tx: mpsc::Sender<CrmRecord>,
}

impl CrmPublisher {
    pub fn spawn(sink: Box<dyn CrmSink>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<CrmRecord>(capacity);
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(err) = sink.publish(&record).await {
                    error!(%err, "crm publish failed; record dropped");
                }
            }
        });
        Self { tx }
    }

    /// Enqueues a record. If the channel is full this applies backpressure
    /// by waiting rather than dropping — the publisher worker is expected
    /// to drain faster than the correlator produces records under normal
    /// load.
    pub async fn enqueue(&self, record: CrmRecord) {
        if self.tx.send(record).await.is_err() {
            warn!("crm publisher worker has stopped; record dropped");
        }
    }
}
