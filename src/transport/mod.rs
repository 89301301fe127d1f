//! # AMI Transport
//!
//! The lowest layer: one authenticated TCP session to Asterisk's Manager
//! Interface, framed into `Key: Value` blocks.
//!
//! ```text
//! ┌────────────┐  TCP   ┌───────────────┐  Frame  ┌───────────────────┐
//! │  Asterisk  │ ─────▶ │  FrameBuffer  │ ──────▶ │  Dispatcher /      │
//! │  (AMI)     │ ◀───── │  (codec.rs)   │         │  Correlator        │
//! └────────────┘        └───────────────┘         └───────────────────┘
//! ```
//!
//! Only one task may read the socket at a time. [`ReadLease`] is the only
//! way to call [`ReadLease::read_frame`], and the only way to get one is
//! [`Transport::acquire_lease`] — so the "single reader" rule from the
//! design (the one invariant whose violation corrupts the whole
//! correlator) is enforced by the type system rather than by convention.
//!
//! ```rust,no_run
//! # use ami_callcenter_engine::transport::Transport;
//! # async fn example() -> ami_callcenter_engine::error::Result<()> {
//! let transport = Transport::connect("10.0.0.5", 5038, "admin", "secret").await?;
//! transport.send_fire_and_forget("Events", Default::default()).await?;
//! # Ok(())
//! # }
//! ```

mod codec;
mod connection;

pub use codec::{parse_frame, Frame, FrameBuffer};
pub use connection::{ReadLease, Transport};
