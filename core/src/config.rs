//! Detector configuration.
//!
//! Settings can be stored as JSON (e.g. `/etc/knockgate/config.json`); every
//! field is optional and falls back to the defaults below. Configuration is
//! validated before any socket is bound.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::domain::KnockSequence;
use crate::error::{Error, Result};

/// Knock ports used when none are configured.
pub const DEFAULT_KNOCK_SEQUENCE: [u16; 3] = [1234, 5678, 9012];

/// Protected service port used when none is configured.
pub const DEFAULT_PROTECTED_PORT: u16 = 2222;

/// Seconds allowed to complete the sequence.
pub const DEFAULT_WINDOW_SECONDS: f64 = 10.0;

/// Raw configuration as read from disk or assembled from CLI flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnockConfig {
    /// Knock ports, in the order they must be hit.
    #[serde(default = "default_sequence")]
    pub sequence: Vec<u16>,

    /// Port opened after a completed sequence.
    #[serde(default = "default_protected_port")]
    pub protected_port: u16,

    /// Seconds from the first knock of an attempt to its completion.
    #[serde(default = "default_window_seconds")]
    pub window_seconds: f64,

    /// Address the knock ports are bound on.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Upper bound on how long the engine waits for knocks before running
    /// housekeeping.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Close the protected port again this many seconds after it was opened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relock_after_seconds: Option<f64>,

    /// Longest a single firewall change may take before it is abandoned.
    #[serde(default = "default_firewall_timeout_ms")]
    pub firewall_timeout_ms: u64,

    /// iptables binary used by the firewall backend.
    #[serde(default = "default_iptables_path")]
    pub iptables_path: PathBuf,
}

fn default_sequence() -> Vec<u16> {
    DEFAULT_KNOCK_SEQUENCE.to_vec()
}

fn default_protected_port() -> u16 {
    DEFAULT_PROTECTED_PORT
}

fn default_window_seconds() -> f64 {
    DEFAULT_WINDOW_SECONDS
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_firewall_timeout_ms() -> u64 {
    5000
}

fn default_iptables_path() -> PathBuf {
    PathBuf::from("iptables")
}

impl Default for KnockConfig {
    fn default() -> Self {
        Self {
            sequence: default_sequence(),
            protected_port: default_protected_port(),
            window_seconds: default_window_seconds(),
            bind_address: default_bind_address(),
            poll_interval_ms: default_poll_interval_ms(),
            relock_after_seconds: None,
            firewall_timeout_ms: default_firewall_timeout_ms(),
            iptables_path: default_iptables_path(),
        }
    }
}

impl KnockConfig {
    /// Check every setting and convert to typed values.
    pub fn validate(&self) -> Result<ValidatedConfig> {
        let sequence = KnockSequence::new(self.sequence.clone())?;

        if self.protected_port == 0 {
            return Err(Error::Config("Protected port must not be 0".to_string()));
        }
        if sequence.contains(self.protected_port) {
            return Err(Error::Config(format!(
                "Protected port {} cannot also be a knock port",
                self.protected_port
            )));
        }

        let window = positive_seconds("Timing window", self.window_seconds)?;

        if self.poll_interval_ms == 0 {
            return Err(Error::Config("Poll interval must be positive".to_string()));
        }

        if self.firewall_timeout_ms == 0 {
            return Err(Error::Config("Firewall timeout must be positive".to_string()));
        }

        let relock_after = self
            .relock_after_seconds
            .map(|secs| positive_seconds("Relock delay", secs))
            .transpose()?;

        Ok(ValidatedConfig {
            sequence,
            protected_port: self.protected_port,
            window,
            bind_address: self.bind_address,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            relock_after,
            firewall_timeout: Duration::from_millis(self.firewall_timeout_ms),
            iptables_path: self.iptables_path.clone(),
        })
    }
}

fn positive_seconds(what: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(Error::Config(format!(
            "{} must be a positive number of seconds, got {}",
            what, secs
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| Error::Config(format!("{} of {} seconds is out of range: {}", what, secs, e)))
}

/// Configuration that passed [`KnockConfig::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    pub sequence: KnockSequence,
    pub protected_port: u16,
    pub window: Duration,
    pub bind_address: IpAddr,
    pub poll_interval: Duration,
    pub relock_after: Option<Duration>,
    pub firewall_timeout: Duration,
    pub iptables_path: PathBuf,
}

/// Reads and writes a [`KnockConfig`] JSON file.
pub struct ConfigStore {
    /// Path to the configuration file.
    config_path: PathBuf,
}

impl ConfigStore {
    pub fn with_path(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from disk.
    ///
    /// Returns default config if the file doesn't exist.
    pub async fn load(&self) -> Result<KnockConfig> {
        if !self.config_path.exists() {
            return Ok(KnockConfig::default());
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to disk.
    ///
    /// Creates the parent directory if it doesn't exist.
    pub async fn save(&self, config: &KnockConfig) -> Result<()> {
        if let Some(dir) = self.config_path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).await.map_err(|e| {
                    Error::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = serde_json::to_string_pretty(config)?;

        // Write atomically by writing to temp file then renaming
        let temp_path = self.config_path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to create temp config file: {}", e)))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;

        file.sync_all()
            .await
            .map_err(|e| Error::Config(format!("Failed to sync config: {}", e)))?;

        fs::rename(&temp_path, &self.config_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to rename config file: {}", e)))?;

        Ok(())
    }
}
