//! Runtime configuration for the engine.
//!
//! Loaded from a TOML file (see `config::EngineConfig::from_file`), matching
//! the plain `serde` + `toml` pattern used for configuration elsewhere in
//! the Rust ecosystem rather than a bespoke key-value reader.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CallCenterError, Result};

/// AMI connection + credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmiConfig {
    pub host: String,
    #[serde(default = "default_ami_port")]
    pub port: u16,
    pub username: String,
    pub secret: String,
    /// Seconds to wait for a single-response action before giving up.
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,
    /// Seconds to wait for a multi-event action's completion sentinel.
    #[serde(default = "default_multi_event_timeout_secs")]
    pub multi_event_timeout_secs: u64,
}

fn default_ami_port() -> u16 {
    5038
}

fn default_action_timeout_secs() -> u64 {
    5
}

fn default_multi_event_timeout_secs() -> u64 {
    10
}

/// Authentication scheme for the HTTP CRM sink, mirroring the handful of
/// ambient auth methods a CRM integration realistically needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrmAuth {
    None,
    ApiKey {
        key: String,
        #[serde(default = "default_api_key_header")]
        header: String,
    },
    Basic {
        username: String,
        password: String,
    },
    Bearer {
        token: String,
    },
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

/// CRM publisher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmConfig {
    pub endpoint_url: String,
    #[serde(default)]
    pub auth: Option<CrmAuth>,
    #[serde(default = "default_crm_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_crm_channel_capacity() -> usize {
    256
}

/// Tunables for the "meaningful number" predicate (§4.3.3). The
/// digit-length/leading-digit filter is site-specific dialplan leakage in
/// the source PBX and is made configurable per the open design question
/// rather than hardcoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeaningfulNumberConfig {
    /// Dialplan context names that must never be treated as extensions.
    #[serde(default = "default_context_keywords")]
    pub context_keywords: Vec<String>,
    /// (length, leading_digit) pairs to reject, e.g. `(4, '5')` rejects
    /// any 4-digit string starting with '5'.
    #[serde(default = "default_digit_prefix_filters")]
    pub digit_prefix_filters: Vec<(usize, char)>,
}

fn default_context_keywords() -> Vec<String> {
    ["s", "h", "i", "t", "o", "a", "e", "start", "hangup", "invalid", "timeout"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_digit_prefix_filters() -> Vec<(usize, char)> {
    vec![(4, '5')]
}

impl Default for MeaningfulNumberConfig {
    fn default() -> Self {
        Self {
            context_keywords: default_context_keywords(),
            digit_prefix_filters: default_digit_prefix_filters(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub ami: AmiConfig,
    /// Extensions to poll/monitor at startup and on full resync.
    #[serde(default)]
    pub monitored_extensions: Vec<String>,
    #[serde(default)]
    pub crm: Option<CrmConfig>,
    #[serde(default)]
    pub meaningful_number: MeaningfulNumberConfig,
    /// Cadence, in milliseconds, for coalesced subscriber broadcasts.
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,
}

fn default_broadcast_interval_ms() -> u64 {
    500
}

impl EngineConfig {
    /// Load configuration from a TOML file on disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CallCenterError::Config(format!("reading {}: {e}", path.as_ref().display())))?;
        Self::from_toml_str(&text)
    }

    /// Parse configuration from an in-memory TOML string.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| CallCenterError::Config(e.to_string()))
    }
}
