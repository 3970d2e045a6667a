//! Resolve the effective configuration from a config file and CLI flags.

use anyhow::{bail, Result};
use knockgate_core::{ConfigStore, KnockConfig};

use crate::SettingsArgs;

pub async fn resolve(args: &SettingsArgs) -> Result<KnockConfig> {
    let mut config = match &args.config {
        Some(path) => {
            if !path.exists() {
                bail!("Config file {} does not exist", path.display());
            }
            ConfigStore::with_path(path.clone()).load().await?
        }
        None => KnockConfig::default(),
    };

    apply_overrides(&mut config, args);
    Ok(config)
}

fn apply_overrides(config: &mut KnockConfig, args: &SettingsArgs) {
    if let Some(sequence) = &args.sequence {
        config.sequence = sequence.clone();
    }
    if let Some(port) = args.protected_port {
        config.protected_port = port;
    }
    if let Some(window) = args.window {
        config.window_seconds = window;
    }
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(ms) = args.poll_interval_ms {
        config.poll_interval_ms = ms;
    }
    if let Some(secs) = args.relock_after {
        config.relock_after_seconds = Some(secs);
    }
    if let Some(ms) = args.firewall_timeout_ms {
        config.firewall_timeout_ms = ms;
    }
    if let Some(path) = &args.iptables {
        config.iptables_path = path.clone();
    }
}
