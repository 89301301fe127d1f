//! The AMI TCP connection: login, the single-reader lease, and the three
//! send modes (fire-and-forget, single-response, multi-event).

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::codec::{parse_frame, Frame, FrameBuffer};
use crate::error::{CallCenterError, Result};

/// Holds the read half and its buffer behind a mutex. The only way to
/// obtain a [`ReadLease`] is to lock this, which is exactly the
/// "single reader at a time" discipline §5 calls the one invariant whose
/// breach corrupts the whole correlator — baking it into the type system
/// means a caller cannot read a frame without holding the guard.
struct ReadHalf {
    stream: OwnedReadHalf,
    buffer: FrameBuffer,
}

/// Proof that the caller currently owns the right to read from the AMI
/// socket. Obtained via [`Transport::acquire_lease`]; dropping it releases
/// the socket to the next waiter (the event reader or the dispatcher).
pub struct ReadLease<'a> {
    guard: tokio::sync::MutexGuard<'a, ReadHalf>,
}

impl<'a> ReadLease<'a> {
    /// Reads and parses the next complete frame, blocking on the socket
    /// until one is available.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(raw) = self.guard.buffer.next_frame() {
                return Ok(parse_frame(&raw));
            }
            let mut chunk = [0u8; 4096];
            let n = self.guard.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(CallCenterError::Transport("connection closed by peer".to_string()));
            }
            self.guard.buffer.feed(&chunk[..n]);
        }
    }
}

/// One authenticated AMI session.
pub struct Transport {
    read_half: Mutex<ReadHalf>,
    write_half: Mutex<BufWriter<OwnedWriteHalf>>,
}

impl Transport {
    /// Connects and logs in. On a login failure the connection is closed
    /// and the error is transport-fatal, per §4.1.
    pub async fn connect(host: &str, port: u16, username: &str, secret: &str) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        let (read, write) = stream.into_split();
        let transport = Transport {
            read_half: Mutex::new(ReadHalf {
                stream: read,
                buffer: FrameBuffer::new(),
            }),
            write_half: Mutex::new(BufWriter::new(write)),
        };

        // The banner is the server's first frame; consume and discard it.
        {
            let mut lease = transport.acquire_lease().await;
            let _banner = lease.read_frame().await?;
        }

        let mut params = BTreeMap::new();
        params.insert("Username".to_string(), username.to_string());
        params.insert("Secret".to_string(), secret.to_string());
        let resp = transport.send_action("Login", params).await?;
        if !resp.is_success() {
            return Err(CallCenterError::Transport(format!(
                "AMI login refused: {}",
                resp.get("Message").unwrap_or("no message")
            )));
        }
        Ok(transport)
    }

    /// Acquires the read lease. Held until the returned value is dropped.
    pub async fn acquire_lease(&self) -> ReadLease<'_> {
        ReadLease {
            guard: self.read_half.lock().await,
        }
    }

    async fn write_frame(&self, action: &str, params: &BTreeMap<String, String>) -> Result<()> {
        let mut out = String::new();
        out.push_str("Action: ");
        out.push_str(action);
        out.push_str("\r\n");
        for (k, v) in params {
            out.push_str(k);
            out.push_str(": ");
            out.push_str(v);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");

        let mut writer = self.write_half.lock().await;
        writer.write_all(out.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Fire-and-forget: write a frame, do not wait for a response. Used
    /// for `Action: Events`.
    pub async fn send_fire_and_forget(&self, action: &str, params: BTreeMap<String, String>) -> Result<()> {
        self.write_frame(action, &params).await
    }

    /// Single-response action: write, then read exactly one frame back.
    /// The lease is acquired *before* the write so the event reader can
    /// never slip in between and consume this action's response as an
    /// ignored event (§4.1/§5's single-reader invariant).
    pub async fn send_action(&self, action: &str, params: BTreeMap<String, String>) -> Result<Frame> {
        let mut lease = self.acquire_lease().await;
        self.write_frame(action, &params).await?;
        lease.read_frame().await
    }

    /// Multi-event action: write, then read frames until one whose
    /// `Event` field equals `complete_event`, or until `timeout` elapses.
    /// Returns every frame observed, including the completion frame.
    pub async fn send_action_with_events(
        &self,
        action: &str,
        params: BTreeMap<String, String>,
        complete_event: &str,
        timeout: Duration,
    ) -> Result<Vec<Frame>> {
        let mut lease = self.acquire_lease().await;
        self.write_frame(action, &params).await?;
        let mut frames = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                warn!(%action, "multi-event action timed out; returning partial response");
                break;
            }
            match tokio::time::timeout(remaining, lease.read_frame()).await {
                Ok(Ok(frame)) => {
                    let is_complete = frame.event_name() == Some(complete_event);
                    frames.push(frame);
                    if is_complete {
                        break;
                    }
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(%action, "multi-event action timed out; returning partial response");
                    break;
                }
            }
        }
        debug!(%action, frames = frames.len(), "multi-event action complete");
        Ok(frames)
    }
}
