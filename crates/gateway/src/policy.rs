//! Pre-execution admission control.
//!
//! Checks run in a fixed order on every command: domain allow/block, the
//! dual-window rate limit, then action-name pattern blocks for click/type.
//! The rate-limit history is a single process-wide sorted list of command
//! timestamps shared across tabs and controllers. Evaluation is pure with
//! respect to the config and the supplied clock.

use tabsense_core::config::{DomainMode, PolicyConfig};

/// Case-insensitive substrings that mark a payment action.
const PAYMENT_PATTERNS: &[&str] = &[
    "checkout",
    "payment",
    "purchase",
    "buy now",
    "place order",
    "confirm order",
    "submit order",
    "pay $",
];

/// Case-insensitive substrings that mark a destructive action.
const DELETE_PATTERNS: &[&str] = &["delete", "remove", "clear all", "destroy", "erase"];

const MINUTE_MS: i64 = 60_000;
const SECOND_MS: i64 = 1_000;

pub struct PolicyEngine {
    config: PolicyConfig,
    /// Sorted append-only command timestamps (ms). Entries older than the
    /// minute window are discarded on each check.
    history: Vec<i64>,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            history: Vec::new(),
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Swap the active config at runtime. The rate-limit history carries
    /// over.
    pub fn set_config(&mut self, config: PolicyConfig) {
        self.config = config;
    }

    /// Commands seen in the last second / last minute, for the status
    /// surface.
    pub fn window_counts(&self, now_ms: i64) -> (usize, usize) {
        let per_minute = self
            .history
            .iter()
            .filter(|t| **t > now_ms - MINUTE_MS)
            .count();
        let per_second = self
            .history
            .iter()
            .filter(|t| **t > now_ms - SECOND_MS)
            .count();
        (per_second, per_minute)
    }

    /// Admit or deny one command. On admission the timestamp is appended
    /// to the history; denials leave the history untouched.
    pub fn check(
        &mut self,
        command_kind: &str,
        tab_url: &str,
        candidate_name: Option<&str>,
        now_ms: i64,
    ) -> Result<(), String> {
        self.check_domain(tab_url)?;
        self.check_rate(now_ms)?;
        self.check_action_name(command_kind, candidate_name)?;
        self.history.push(now_ms);
        Ok(())
    }

    fn check_domain(&self, tab_url: &str) -> Result<(), String> {
        match self.config.domain_mode {
            DomainMode::All => Ok(()),
            DomainMode::Allowlist => {
                if self.host_in_list(tab_url) {
                    Ok(())
                } else {
                    Err(format!("Domain not allowed: {}", tab_url))
                }
            }
            DomainMode::Blocklist => {
                if self.host_in_list(tab_url) {
                    Err(format!("Domain blocked: {}", tab_url))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Host equals or is a subdomain of a list entry. Malformed urls fail
    /// closed: never in the allowlist, always caught by the blocklist.
    fn host_in_list(&self, tab_url: &str) -> bool {
        let host = match url::Url::parse(tab_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        {
            Some(h) => h,
            None => return matches!(self.config.domain_mode, DomainMode::Blocklist),
        };
        self.config.domain_list.iter().any(|entry| {
            let entry = entry.to_lowercase();
            host == entry || host.ends_with(&format!(".{}", entry))
        })
    }

    fn check_rate(&mut self, now_ms: i64) -> Result<(), String> {
        self.history.retain(|t| *t > now_ms - MINUTE_MS);

        if self.history.len() >= self.config.max_commands_per_minute as usize {
            return Err(format!(
                "Rate limit exceeded: {} commands per minute",
                self.config.max_commands_per_minute
            ));
        }
        let last_second = self
            .history
            .iter()
            .filter(|t| **t > now_ms - SECOND_MS)
            .count();
        if last_second >= self.config.max_commands_per_second as usize {
            return Err(format!(
                "Rate limit exceeded: {} commands per second",
                self.config.max_commands_per_second
            ));
        }
        Ok(())
    }

    /// Name-pattern blocks apply only to click and type, and only when the
    /// target candidate's accessible name is known.
    fn check_action_name(
        &self,
        command_kind: &str,
        candidate_name: Option<&str>,
    ) -> Result<(), String> {
        if command_kind != "click" && command_kind != "type" {
            return Ok(());
        }
        let name = match candidate_name {
            Some(n) if !n.is_empty() => n.to_lowercase(),
            _ => return Ok(()),
        };

        if self.config.block_payment_actions {
            if let Some(p) = PAYMENT_PATTERNS.iter().find(|p| name.contains(**p)) {
                return Err(format!("Blocked payment action ({}): {}", p, name));
            }
        }
        if self.config.block_delete_actions {
            if let Some(p) = DELETE_PATTERNS.iter().find(|p| name.contains(**p)) {
                return Err(format!("Blocked destructive action ({}): {}", p, name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(mutator: impl FnOnce(&mut PolicyConfig)) -> PolicyEngine {
        let mut config = PolicyConfig::default();
        mutator(&mut config);
        PolicyEngine::new(config)
    }

    #[test]
    fn allowlist_admits_subdomains_only() {
        let mut p = engine(|c| {
            c.domain_mode = DomainMode::Allowlist;
            c.domain_list = vec!["example.com".into()];
        });
        assert!(p.check("click", "https://example.com/x", None, 0).is_ok());
        assert!(p
            .check("click", "https://sub.example.com/x", None, 10)
            .is_ok());
        let err = p.check("click", "https://other.com", None, 20).unwrap_err();
        assert_eq!(err, "Domain not allowed: https://other.com");
        // Suffix tricks are not subdomains.
        assert!(p
            .check("click", "https://notexample.com", None, 30)
            .is_err());
    }

    #[test]
    fn malformed_urls_fail_closed() {
        let mut allow = engine(|c| {
            c.domain_mode = DomainMode::Allowlist;
            c.domain_list = vec!["example.com".into()];
        });
        assert!(allow.check("click", "not a url", None, 0).is_err());

        let mut block = engine(|c| {
            c.domain_mode = DomainMode::Blocklist;
            c.domain_list = vec!["bad.com".into()];
        });
        assert!(block.check("click", "not a url", None, 0).is_err());
    }

    #[test]
    fn per_second_window_denies_the_second_command() {
        let mut p = engine(|c| c.max_commands_per_second = 1);
        assert!(p.check("click", "https://a/", None, 1_000).is_ok());
        let err = p.check("click", "https://a/", None, 1_500).unwrap_err();
        assert!(err.contains("per second"), "{err}");
        // Outside the window the next command passes again.
        assert!(p.check("click", "https://a/", None, 2_100).is_ok());
    }

    #[test]
    fn per_minute_window_prunes_old_entries() {
        let mut p = engine(|c| {
            c.max_commands_per_minute = 2;
            c.max_commands_per_second = 10;
        });
        assert!(p.check("click", "https://a/", None, 0).is_ok());
        assert!(p.check("click", "https://a/", None, 10_000).is_ok());
        let err = p.check("click", "https://a/", None, 20_000).unwrap_err();
        assert!(err.contains("per minute"), "{err}");
        // 61 s after the first command, one slot has freed up.
        assert!(p.check("click", "https://a/", None, 61_000).is_ok());
    }

    #[test]
    fn delete_patterns_block_click_and_type_but_not_hover() {
        let mut p = engine(|_| {});
        let name = Some("Delete account");
        assert!(p.check("click", "https://a/", name, 0).is_err());
        assert!(p.check("type", "https://a/", name, 10).is_err());
        assert!(p.check("hover", "https://a/", name, 20).is_ok());
    }

    #[test]
    fn payment_patterns_respect_the_toggle() {
        let mut p = engine(|_| {});
        assert!(p
            .check("click", "https://a/", Some("Proceed to checkout"), 0)
            .is_err());

        let mut relaxed = engine(|c| c.block_payment_actions = false);
        assert!(relaxed
            .check("click", "https://a/", Some("Proceed to checkout"), 0)
            .is_ok());
    }

    #[test]
    fn unknown_names_pass_the_pattern_check() {
        let mut p = engine(|_| {});
        assert!(p.check("click", "https://a/", None, 0).is_ok());
        assert!(p.check("click", "https://a/", Some(""), 10).is_ok());
    }

    #[test]
    fn denials_do_not_consume_the_rate_window() {
        let mut p = engine(|c| c.max_commands_per_second = 1);
        assert!(p
            .check("click", "https://a/", Some("Delete it"), 0)
            .is_err());
        // The denial above appended nothing, so this one is the first in
        // its window.
        assert!(p.check("click", "https://a/", None, 100).is_ok());
    }

    #[test]
    fn window_counts_report_both_windows() {
        let mut p = engine(|_| {});
        p.check("click", "https://a/", None, 0).unwrap();
        p.check("click", "https://a/", None, 500).unwrap();
        p.check("click", "https://a/", None, 30_000).unwrap();
        let (sec, min) = p.window_counts(30_200);
        assert_eq!(sec, 1);
        assert_eq!(min, 3);
    }
}
