//! Minimal, runnable reference implementations of the collaborator
//! traits, wired up by the `xray-guard` binary by default. A real
//! deployment is expected to substitute at least [`LoggingBanTransport`]
//! with something that actually talks to the fleet.

use async_trait::async_trait;
use guard_types::{Node, UserObservation};
use regex::Regex;

use crate::collaborators::BanTransport;
use crate::collaborators::LogFrameParser;

/// Parses the primary panel's Xray access-log line format, e.g.:
///
/// ```text
/// 2024/01/02 15:04:05 from 1.2.3.4:51234 accepted tcp:example.com:443 [in-1 -> out-1] email: alice
/// ```
///
/// Lines that don't match (startup banners, non-access-log entries) are
/// not user-connection events and yield `None`, not an error.
pub struct MarzneshinLogParser {
    pattern: Regex,
}

impl Default for MarzneshinLogParser {
    fn default() -> Self {
        Self {
            pattern: Regex::new(
                r"(?x)
                from\s+(?P<ip>[0-9a-fA-F\.:]+):\d+\s+
                (?P<accepted>accepted|rejected)\s+
                \S+\s+
                \[(?P<inbound>[^\s\]]+)(?:\s*->\s*[^\]]+)?\]\s+
                email:\s*(?P<name>\S+)
                ",
            )
            .expect("static regex is valid"),
        }
    }
}

impl LogFrameParser for MarzneshinLogParser {
    fn parse_log_to_user(&self, frame: &str) -> Option<UserObservation> {
        let caps = self.pattern.captures(frame)?;
        Some(UserObservation {
            name: caps["name"].to_string(),
            ip: caps["ip"].to_string(),
            node: String::new(),
            inbound: caps["inbound"].to_string(),
            accepted: Some(&caps["accepted"] == "accepted"),
        })
    }
}

/// A [`BanTransport`] that only logs; ships so the binary runs out of
/// the box, but issues no real bans. A deployment must substitute a
/// transport that actually calls the node's ban RPC.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingBanTransport;

#[async_trait]
impl BanTransport for LoggingBanTransport {
    async fn ban_user(&self, node: &Node, user: &UserObservation) -> eyre::Result<()> {
        tracing::warn!(
            "would ban {} ({}) on node {} — no ban transport configured",
            user.name,
            user.ip,
            node.name
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_access_log_line() {
        let parser = MarzneshinLogParser::default();
        let line = "2024/01/02 15:04:05 from 1.2.3.4:51234 accepted tcp:example.com:443 [in-1 -> out-1] email: alice";
        let obs = parser.parse_log_to_user(line).unwrap();
        assert_eq!(obs.name, "alice");
        assert_eq!(obs.ip, "1.2.3.4");
        assert_eq!(obs.inbound, "in-1");
        assert_eq!(obs.accepted, Some(true));
    }

    #[test]
    fn non_access_log_lines_yield_none() {
        let parser = MarzneshinLogParser::default();
        assert!(parser.parse_log_to_user("Xray 1.8.4 started").is_none());
    }
}
