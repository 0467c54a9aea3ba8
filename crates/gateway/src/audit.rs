//! Command audit log.
//!
//! One JSONL record per policy decision and command outcome, appended to a
//! day-keyed file. Enabled by the policy's `logAllCommands` flag.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tracing::error;

use tabsense_core::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAudit {
    pub timestamp_ms: i64,
    pub command_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub tab_id: u64,
    /// "allowed", "denied", "failed", or "acked".
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub struct AuditLogger {
    dir: PathBuf,
}

impl AuditLogger {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn log_command(
        &self,
        command_id: &str,
        kind: &str,
        tab_id: u64,
        outcome: &str,
        reason: Option<&str>,
    ) {
        let record = CommandAudit {
            timestamp_ms: Utc::now().timestamp_millis(),
            command_id: command_id.to_string(),
            kind: kind.to_string(),
            tab_id,
            outcome: outcome.to_string(),
            reason: reason.map(|r| r.to_string()),
        };
        if let Err(e) = self.write_record(&record) {
            error!(error = %e, "failed to write audit record");
        }
    }

    fn write_record(&self, record: &CommandAudit) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.current_file();
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let json = serde_json::to_string(record)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }

    fn current_file(&self) -> PathBuf {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        self.dir.join(format!("{}.jsonl", day))
    }

    /// Read back one day's records; unparseable lines are skipped.
    pub fn read_day(&self, date: &str) -> Result<Vec<CommandAudit>> {
        let path = self.dir.join(format!("{}.jsonl", date));
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }

    pub fn read_today(&self) -> Result<Vec<CommandAudit>> {
        self.read_day(&Utc::now().format("%Y-%m-%d").to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_round_trip_through_jsonl() {
        let dir = tempfile::TempDir::new().unwrap();
        let logger = AuditLogger::new(dir.path().to_path_buf());

        logger.log_command("cmd_1_ab12", "click", 1, "allowed", None);
        logger.log_command(
            "cmd_2_cd34",
            "type",
            1,
            "denied",
            Some("Blocked destructive action (delete): delete account"),
        );

        let records = logger.read_today().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, "click");
        assert_eq!(records[0].outcome, "allowed");
        assert_eq!(records[1].outcome, "denied");
        assert!(records[1].reason.as_ref().unwrap().contains("delete"));
    }

    #[test]
    fn missing_day_reads_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let logger = AuditLogger::new(dir.path().to_path_buf());
        assert!(logger.read_day("1999-01-01").unwrap().is_empty());
    }
}
