//! Run command - listen for knocks until interrupted.

use anyhow::Result;
use knockgate_core::{
    DryRunFirewall, EngineSummary, FirewallPort, IptablesFirewall, KnockConfig, KnockEngine,
    TcpKnockListener, ValidatedConfig,
};
use tracing::{error, info};

pub async fn run(config: KnockConfig, dry_run: bool) -> Result<()> {
    // Bad configuration must be caught before any socket is bound.
    let config = config.validate()?;
    let listener = TcpKnockListener::open(config.bind_address, config.sequence.ports()).await?;

    let summary = if dry_run {
        serve(listener, DryRunFirewall::new(), &config).await
    } else {
        serve(listener, IptablesFirewall::new(config.iptables_path.clone()), &config).await
    };

    info!(
        knocks = summary.knocks,
        completed = summary.completed,
        resets = summary.resets,
        firewall_failures = summary.firewall_failures,
        "Knock listener stopped"
    );
    Ok(())
}

async fn serve<F: FirewallPort + 'static>(
    listener: TcpKnockListener,
    firewall: F,
    config: &ValidatedConfig,
) -> EngineSummary {
    KnockEngine::new(listener, firewall, config)
        .run(shutdown_signal())
        .await
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
