//! Config command - show (and optionally save) the effective configuration.

use std::path::PathBuf;

use anyhow::Result;
use knockgate_core::{ConfigStore, KnockConfig};

pub async fn show(config: &KnockConfig, json: bool, write: Option<PathBuf>) -> Result<()> {
    // Refuse to print or save something the daemon would reject.
    let validated = config.validate()?;

    if let Some(path) = write {
        ConfigStore::with_path(path.clone()).save(config).await?;
        eprintln!("Saved configuration to {}", path.display());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    println!("{:<18} {}", "Knock sequence:", validated.sequence);
    println!("{:<18} {}", "Protected port:", validated.protected_port);
    println!("{:<18} {}s", "Window:", validated.window.as_secs_f64());
    println!("{:<18} {}", "Bind address:", validated.bind_address);
    println!("{:<18} {}ms", "Poll interval:", validated.poll_interval.as_millis());
    match validated.relock_after {
        Some(hold) => println!("{:<18} {}s", "Relock after:", hold.as_secs_f64()),
        None => println!("{:<18} never", "Relock after:"),
    }
    println!(
        "{:<18} {}ms",
        "Firewall timeout:",
        validated.firewall_timeout.as_millis()
    );
    println!("{:<18} {}", "iptables:", validated.iptables_path.display());

    Ok(())
}
