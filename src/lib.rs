//! AMI event-driven call-state engine for Asterisk call centers.
//!
//! Five components, leaves first: [`transport`] frames the AMI protocol,
//! [`dispatcher`] correlates action calls with their responses,
//! [`correlator`] owns the live entity graph and detects final hangup,
//! [`sinks`] fan correlator output out to a CRM publisher and a missed-call
//! notification recorder, and [`projector`] builds scope-filtered
//! snapshots for external subscribers. [`engine`] wires all five together;
//! [`supervisor`] exposes the operator-facing hangup/transfer/listen/
//! queue-mutation actions.

pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod model;
pub mod projector;
pub mod sinks;
pub mod supervisor;
pub mod transport;

pub use config::EngineConfig;
pub use engine::{CallCenterEngine, CallCenterEngineBuilder};
pub use error::{CallCenterError, Result};
