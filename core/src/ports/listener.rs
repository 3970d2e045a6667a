//! Knock source port (interface).

use std::time::Duration;

use crate::domain::KnockEvent;

/// Port for observing connection attempts on the knock ports.
pub trait KnockSource: Send {
    /// Wait up to `timeout` and return the attempts that arrived, oldest first.
    ///
    /// An empty batch means the timeout elapsed with nothing to report.
    fn poll(
        &mut self,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Vec<KnockEvent>> + Send;

    /// Release every listening endpoint. Calling it twice is harmless.
    fn close(&self);
}
