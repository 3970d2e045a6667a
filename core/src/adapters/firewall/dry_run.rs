//! Firewall backend that only logs its intent.

use tracing::info;

use crate::error::FirewallError;
use crate::ports::FirewallPort;

/// Records what would have changed without touching the host firewall.
///
/// Lets the detector run unprivileged, e.g. to try out a knock sequence.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunFirewall;

impl DryRunFirewall {
    pub fn new() -> Self {
        Self
    }
}

impl FirewallPort for DryRunFirewall {
    async fn allow(&self, port: u16) -> Result<(), FirewallError> {
        info!(port = port, "[dry-run] Would open protected port");
        Ok(())
    }

    async fn deny(&self, port: u16) -> Result<(), FirewallError> {
        info!(port = port, "[dry-run] Would close protected port");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dry_run_always_succeeds() {
        let firewall = DryRunFirewall::new();
        assert!(firewall.allow(2222).await.is_ok());
        assert!(firewall.deny(2222).await.is_ok());
    }
}
