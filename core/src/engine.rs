//! Knock engine - drives the listener into the tracker and the firewall.
//!
//! The engine is the single consumer of knock events. It applies tracker
//! transitions strictly in the order the listener reports them, opens the
//! protected port on every completed sequence and, between poll cycles,
//! performs window-expiry housekeeping.
//!
//! Firewall changes are queued to a separate task. The detection loop never
//! waits on the firewall, and every change is bounded by the configured
//! timeout.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::ValidatedConfig;
use crate::domain::{KnockEvent, KnockOutcome, SequenceTracker, Transition};
use crate::error::FirewallError;
use crate::ports::{FirewallPort, KnockSource};

/// Counters reported when the engine stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineSummary {
    pub knocks: u64,
    pub advanced: u64,
    pub resets: u64,
    pub completed: u64,
    pub firewall_failures: u64,
}

/// Change requested from the firewall task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FirewallCommand {
    Allow(u16),
    Deny(u16),
}

/// Port-knock detection loop.
pub struct KnockEngine<L: KnockSource, F: FirewallPort> {
    listener: L,
    firewall: Arc<F>,
    firewall_timeout: Duration,
    commands: mpsc::UnboundedSender<FirewallCommand>,
    /// Queue handed to the firewall task when `run` starts.
    pending: Option<mpsc::UnboundedReceiver<FirewallCommand>>,
    firewall_failures: Arc<AtomicU64>,
    tracker: SequenceTracker,
    protected_port: u16,
    poll_interval: Duration,
    relock_after: Option<Duration>,
    /// When the protected port is due to be closed again.
    relock_at: Option<Instant>,
    summary: EngineSummary,
}

impl<L: KnockSource, F: FirewallPort + 'static> KnockEngine<L, F> {
    pub fn new(listener: L, firewall: F, config: &ValidatedConfig) -> Self {
        let (commands, pending) = mpsc::unbounded_channel();
        Self {
            listener,
            firewall: Arc::new(firewall),
            firewall_timeout: config.firewall_timeout,
            commands,
            pending: Some(pending),
            firewall_failures: Arc::new(AtomicU64::new(0)),
            tracker: SequenceTracker::new(config.sequence.clone(), config.window),
            protected_port: config.protected_port,
            poll_interval: config.poll_interval,
            relock_after: config.relock_after,
            relock_at: None,
            summary: EngineSummary::default(),
        }
    }

    pub fn tracker(&self) -> &SequenceTracker {
        &self.tracker
    }

    /// Run until `shutdown` resolves, then close the listener.
    ///
    /// The protected port is denied once up front so the service starts
    /// closed. Shutdown is observed between poll cycles; changes still queued
    /// for the firewall get one timeout period to finish.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> EngineSummary {
        info!(
            sequence = %self.tracker.sequence(),
            protected_port = self.protected_port,
            window_secs = self.tracker.window().as_secs_f64(),
            "Listening for knocks"
        );

        let worker = self.pending.take().map(|pending| {
            tokio::spawn(firewall_worker(
                Arc::clone(&self.firewall),
                pending,
                self.firewall_timeout,
                Arc::clone(&self.firewall_failures),
            ))
        });

        self.deny();

        tokio::pin!(shutdown);
        loop {
            let events = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                events = self.listener.poll(self.poll_interval) => events,
            };

            for event in events {
                self.handle(&event);
            }
            self.housekeeping(Instant::now());
        }

        info!("Shutting down knock listener");
        self.listener.close();

        // Closing the queue lets the firewall task drain and exit.
        drop(self.commands);
        if let Some(mut worker) = worker {
            if tokio::time::timeout(self.firewall_timeout, &mut worker)
                .await
                .is_err()
            {
                warn!("Firewall backend still busy at shutdown, dropping queued changes");
                worker.abort();
            }
        }

        self.summary.firewall_failures = self.firewall_failures.load(Ordering::Relaxed);
        self.summary
    }

    /// Feed one knock to the tracker and act on the result.
    pub fn handle(&mut self, event: &KnockEvent) -> Transition {
        self.summary.knocks += 1;
        let transition = self.tracker.observe(event);

        if transition.window_expired {
            info!(source = %event.source, "Timing window expired, resetting");
        }

        match transition.outcome {
            KnockOutcome::Advanced { source, index } => {
                self.summary.advanced += 1;
                info!(
                    source = %source,
                    port = event.port,
                    "Correct knock {}/{}",
                    index,
                    self.tracker.sequence().len()
                );
            }
            KnockOutcome::Reset { source, port } => {
                self.summary.resets += 1;
                warn!(source = %source, port = port, "Incorrect knock, resetting");
            }
            KnockOutcome::Completed { source } => {
                self.summary.completed += 1;
                info!(source = %source, "Correct sequence completed");
                self.allow(event.at);
            }
        }

        transition
    }

    /// Purge stale attempts and close the protected port once its hold
    /// time is over.
    fn housekeeping(&mut self, now: Instant) {
        let purged = self.tracker.purge_expired(now);
        if purged > 0 {
            debug!(purged = purged, "Dropped expired knock attempts");
        }

        if self.relock_at.is_some_and(|at| now >= at) {
            self.relock_at = None;
            info!(port = self.protected_port, "Relock delay elapsed");
            self.deny();
        }
    }

    fn allow(&mut self, at: Instant) {
        self.send(FirewallCommand::Allow(self.protected_port));
        // Each completion restarts the hold, whatever the firewall reports.
        if let Some(hold) = self.relock_after {
            self.relock_at = Some(at + hold);
        }
    }

    fn deny(&mut self) {
        self.send(FirewallCommand::Deny(self.protected_port));
    }

    fn send(&self, command: FirewallCommand) {
        if self.commands.send(command).is_err() {
            // Only possible if the firewall task panicked.
            self.firewall_failures.fetch_add(1, Ordering::Relaxed);
            error!(command = ?command, "Firewall task is gone, change dropped");
        }
    }
}

/// Apply queued firewall changes one at a time, in order.
async fn firewall_worker<F: FirewallPort>(
    firewall: Arc<F>,
    mut commands: mpsc::UnboundedReceiver<FirewallCommand>,
    timeout: Duration,
    failures: Arc<AtomicU64>,
) {
    while let Some(command) = commands.recv().await {
        let (port, result) = match command {
            FirewallCommand::Allow(port) => {
                (port, tokio::time::timeout(timeout, firewall.allow(port)).await)
            }
            FirewallCommand::Deny(port) => {
                (port, tokio::time::timeout(timeout, firewall.deny(port)).await)
            }
        };
        let result = result.unwrap_or(Err(FirewallError::TimedOut {
            port,
            after: timeout,
        }));

        if let Err(e) = result {
            failures.fetch_add(1, Ordering::Relaxed);
            match command {
                FirewallCommand::Allow(_) => {
                    error!(port = port, error = %e, "Failed to open protected port")
                }
                FirewallCommand::Deny(_) => {
                    warn!(port = port, error = %e, "Failed to close protected port")
                }
            }
        }
    }
}
