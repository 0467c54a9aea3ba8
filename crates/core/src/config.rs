use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// Process configuration. Loaded from YAML; every field has a default so a
/// missing or partial file still yields a runnable setup. The policy
/// section is additionally mutable at runtime through the gateway's
/// `/policy` endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Load the config file, falling back to defaults when it is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Port of the browser's remote debugging endpoint.
    #[serde(default = "default_remote_debug_port")]
    pub remote_debug_port: u16,
}

fn default_port() -> u16 {
    9333
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_remote_debug_port() -> u16 {
    9222
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            remote_debug_port: default_remote_debug_port(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainMode {
    Allowlist,
    Blocklist,
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    #[serde(default = "default_domain_mode")]
    pub domain_mode: DomainMode,
    #[serde(default)]
    pub domain_list: Vec<String>,
    #[serde(default = "default_true")]
    pub block_payment_actions: bool,
    #[serde(default = "default_true")]
    pub block_delete_actions: bool,
    /// Reserved; parsed and persisted but not yet enforced.
    #[serde(default)]
    pub require_user_present: bool,
    #[serde(default = "default_max_per_second")]
    pub max_commands_per_second: u32,
    #[serde(default = "default_max_per_minute")]
    pub max_commands_per_minute: u32,
    #[serde(default = "default_true")]
    pub log_all_commands: bool,
}

fn default_domain_mode() -> DomainMode {
    DomainMode::All
}

fn default_true() -> bool {
    true
}

fn default_max_per_second() -> u32 {
    10
}

fn default_max_per_minute() -> u32 {
    300
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            domain_mode: default_domain_mode(),
            domain_list: Vec::new(),
            block_payment_actions: true,
            block_delete_actions: true,
            require_user_present: false,
            max_commands_per_second: default_max_per_second(),
            max_commands_per_minute: default_max_per_minute(),
            log_all_commands: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Offline-queue length beyond which only resync frames are kept.
    #[serde(default = "default_backpressure_threshold")]
    pub backpressure_threshold: usize,
}

fn default_reconnect_interval_ms() -> u64 {
    2_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_backpressure_threshold() -> usize {
    100
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: default_reconnect_interval_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            backpressure_threshold: default_backpressure_threshold(),
        }
    }
}
