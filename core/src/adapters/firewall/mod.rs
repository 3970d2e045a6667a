//! Firewall adapters.
//!
//! Implementations of [`FirewallPort`](crate::ports::FirewallPort).

mod dry_run;
mod iptables;

pub use dry_run::DryRunFirewall;
pub use iptables::IptablesFirewall;
