pub mod config_cmd;
pub mod controller;
pub mod gateway;

use std::path::PathBuf;

/// Base directory for config and audit logs: `~/.tabsense`.
pub fn base_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".tabsense")
}

pub fn config_path() -> PathBuf {
    base_dir().join("config.yaml")
}
