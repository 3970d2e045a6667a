//! iptables firewall backend.
//!
//! Uses the following commands:
//! - `iptables -C/-I INPUT -p tcp --dport PORT -j ACCEPT` to open the port,
//!   inserting the rule only if it is not already there
//! - `iptables -D INPUT -p tcp --dport PORT -j ACCEPT`, repeated until none is
//!   left, to drop that rule again
//! - `iptables -C/-A INPUT -p tcp --dport PORT -j REJECT --reject-with tcp-reset`
//!   to make sure a reject rule is in place

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::FirewallError;
use crate::ports::FirewallPort;

/// Exit status used by iptables when a rule does not exist.
const RULE_MISSING_STATUS: i32 = 1;

/// Upper bound on duplicate ACCEPT rules removed by one `deny`.
const MAX_RULE_DELETIONS: usize = 64;

/// Firewall backend driving the `iptables` binary.
#[derive(Debug, Clone)]
pub struct IptablesFirewall {
    binary: PathBuf,
}

impl IptablesFirewall {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, port: u16, args: &[String]) -> Result<std::process::Output, FirewallError> {
        debug!(binary = %self.binary.display(), args = ?args, "Running iptables");

        Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                FirewallError::CommandFailed(format!(
                    "Failed to run {} for port {}: {}",
                    self.binary.display(),
                    port,
                    e
                ))
            })
    }

    /// Run a command and turn a non-zero exit into [`FirewallError::Rejected`].
    async fn apply(&self, port: u16, args: &[String]) -> Result<(), FirewallError> {
        let output = self.run(port, args).await?;
        if output.status.success() {
            return Ok(());
        }

        Err(rejected(port, &output))
    }

    /// Whether the rule exists, per `iptables -C`.
    async fn rule_present(&self, port: u16, verdict: Verdict) -> Result<bool, FirewallError> {
        let check = self.run(port, &rule_args("-C", port, verdict)).await?;
        match check.status.code() {
            Some(0) => Ok(true),
            Some(RULE_MISSING_STATUS) => Ok(false),
            _ => Err(rejected(port, &check)),
        }
    }

    /// Delete every copy of the ACCEPT rule, including ones left behind by
    /// an earlier run.
    async fn remove_accept_rules(&self, port: u16) -> Result<(), FirewallError> {
        let delete = rule_args("-D", port, Verdict::Accept);
        for removed in 0..MAX_RULE_DELETIONS {
            let output = self.run(port, &delete).await?;
            match output.status.code() {
                Some(0) => continue,
                Some(RULE_MISSING_STATUS) => {
                    debug!(port = port, removed = removed, "ACCEPT rules removed");
                    return Ok(());
                }
                _ => return Err(rejected(port, &output)),
            }
        }

        Err(FirewallError::CommandFailed(format!(
            "ACCEPT rule for port {} still present after {} deletions",
            port, MAX_RULE_DELETIONS
        )))
    }
}

fn rejected(port: u16, output: &std::process::Output) -> FirewallError {
    FirewallError::Rejected {
        port,
        status: output.status.code().unwrap_or(-1),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

impl Default for IptablesFirewall {
    fn default() -> Self {
        Self::new("iptables")
    }
}

impl FirewallPort for IptablesFirewall {
    async fn allow(&self, port: u16) -> Result<(), FirewallError> {
        info!(port = port, "Opening firewall for protected port");

        if self.rule_present(port, Verdict::Accept).await? {
            debug!(port = port, "ACCEPT rule already present");
            return Ok(());
        }
        self.apply(port, &rule_args("-I", port, Verdict::Accept)).await
    }

    async fn deny(&self, port: u16) -> Result<(), FirewallError> {
        info!(port = port, "Closing protected port");

        self.remove_accept_rules(port).await?;

        if self.rule_present(port, Verdict::Reject).await? {
            debug!(port = port, "REJECT rule already present");
            return Ok(());
        }
        self.apply(port, &rule_args("-A", port, Verdict::Reject)).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Accept,
    Reject,
}

/// Arguments for one INPUT-chain rule operation (`-I`, `-A`, `-C` or `-D`).
fn rule_args(op: &str, port: u16, verdict: Verdict) -> Vec<String> {
    let mut args: Vec<String> = [op, "INPUT", "-p", "tcp", "--dport"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.push(port.to_string());
    args.push("-j".to_string());
    match verdict {
        Verdict::Accept => args.push("ACCEPT".to_string()),
        Verdict::Reject => {
            args.extend(["REJECT", "--reject-with", "tcp-reset"].map(String::from));
        }
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_rule_args() {
        assert_eq!(
            rule_args("-I", 2222, Verdict::Accept).join(" "),
            "-I INPUT -p tcp --dport 2222 -j ACCEPT"
        );
    }

    #[test]
    fn test_reject_rule_args() {
        assert_eq!(
            rule_args("-A", 2222, Verdict::Reject).join(" "),
            "-A INPUT -p tcp --dport 2222 -j REJECT --reject-with tcp-reset"
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_command_failure() {
        let firewall = IptablesFirewall::new("/nonexistent/knockgate-iptables");
        let result = firewall.allow(2222).await;
        assert!(matches!(result, Err(FirewallError::CommandFailed(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_rejection() {
        // `false` ignores its arguments and exits with status 1.
        let firewall = IptablesFirewall::new("false");
        match firewall.allow(2222).await {
            Err(FirewallError::Rejected { port, status, .. }) => {
                assert_eq!(port, 2222);
                assert_eq!(status, 1);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    /// Stand-in for iptables that keeps its INPUT chain in a text file.
    #[cfg(unix)]
    fn fake_iptables(dir: &std::path::Path) -> (IptablesFirewall, std::path::PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let rules = dir.join("rules");
        let script = dir.join("iptables");
        let body = format!(
            r#"#!/bin/sh
RULES="{rules}"
touch "$RULES"
op="$1"
shift
rule="$*"
case "$op" in
  -C) grep -qxF -- "$rule" "$RULES" ;;
  -A) echo "$rule" >> "$RULES" ;;
  -I) {{ echo "$rule"; cat "$RULES"; }} > "$RULES.new" && mv "$RULES.new" "$RULES" ;;
  -D)
    grep -qxF -- "$rule" "$RULES" || exit 1
    awk -v r="$rule" '!done && $0 == r {{ done = 1; next }} {{ print }}' "$RULES" > "$RULES.new"
    mv "$RULES.new" "$RULES"
    ;;
  *) exit 2 ;;
esac
"#,
            rules = rules.display()
        );
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (IptablesFirewall::new(script), rules)
    }

    #[cfg(unix)]
    fn count(rules: &std::path::Path, rule: &str) -> usize {
        std::fs::read_to_string(rules)
            .unwrap_or_default()
            .lines()
            .filter(|line| *line == rule)
            .count()
    }

    #[cfg(unix)]
    const ACCEPT_RULE: &str = "INPUT -p tcp --dport 2222 -j ACCEPT";
    #[cfg(unix)]
    const REJECT_RULE: &str = "INPUT -p tcp --dport 2222 -j REJECT --reject-with tcp-reset";

    #[cfg(unix)]
    #[tokio::test]
    async fn test_deny_after_repeated_allow_closes_port() {
        let dir = tempfile::tempdir().unwrap();
        let (firewall, rules) = fake_iptables(dir.path());

        firewall.deny(2222).await.unwrap();
        firewall.allow(2222).await.unwrap();
        firewall.allow(2222).await.unwrap();
        assert_eq!(count(&rules, ACCEPT_RULE), 1);

        firewall.deny(2222).await.unwrap();
        assert_eq!(count(&rules, ACCEPT_RULE), 0);
        assert_eq!(count(&rules, REJECT_RULE), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_deny_removes_rules_left_by_earlier_runs() {
        let dir = tempfile::tempdir().unwrap();
        let (firewall, rules) = fake_iptables(dir.path());
        std::fs::write(&rules, format!("{0}\n{0}\n{0}\n", ACCEPT_RULE)).unwrap();

        firewall.deny(2222).await.unwrap();
        firewall.deny(2222).await.unwrap();
        assert_eq!(count(&rules, ACCEPT_RULE), 0);
        assert_eq!(count(&rules, REJECT_RULE), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_allow_puts_accept_above_reject() {
        let dir = tempfile::tempdir().unwrap();
        let (firewall, rules) = fake_iptables(dir.path());

        firewall.deny(2222).await.unwrap();
        firewall.allow(2222).await.unwrap();
        let chain = std::fs::read_to_string(&rules).unwrap();
        let lines: Vec<&str> = chain.lines().collect();
        assert_eq!(lines, vec![ACCEPT_RULE, REJECT_RULE]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_deny_gives_up_when_rule_never_disappears() {
        // `true` accepts every deletion without the rule ever going away.
        let firewall = IptablesFirewall::new("true");
        assert!(matches!(
            firewall.deny(2222).await,
            Err(FirewallError::CommandFailed(_))
        ));
    }
}
