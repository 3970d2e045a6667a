//! Firewall port (interface).

use crate::error::FirewallError;

/// Port for changing the reachability of the protected service.
///
/// Both operations are best-effort. The engine logs failures and never lets
/// them influence knock tracking.
pub trait FirewallPort: Send + Sync {
    /// Make `port` reachable.
    fn allow(
        &self,
        port: u16,
    ) -> impl std::future::Future<Output = Result<(), FirewallError>> + Send;

    /// Make `port` unreachable to new connections.
    fn deny(
        &self,
        port: u16,
    ) -> impl std::future::Future<Output = Result<(), FirewallError>> + Send;
}
