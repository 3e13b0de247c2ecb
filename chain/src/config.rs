//! Node configuration.
//!
//! This module aggregates the runtime knobs of a peer:
//!
//! - the network difficulty (CLI argument, default 4),
//! - fault injection for resilience testing (tamper and broadcast
//!   suppression, from the optional JSON config file),
//! - the metrics exporter (off unless the config file names an address).
//!
//! Absent config-file keys mean "always broadcast, never tamper".

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

/// Default number of leading hex zeros a block hash must carry.
pub const DEFAULT_DIFFICULTY: usize = 4;

/// Which field of an outgoing broadcast the tamper hook corrupts.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TamperType {
    /// Corrupt the broadcast copy's `hash`.
    #[default]
    Hash,
    /// Corrupt the broadcast copy's `prev_hash`.
    PrevHash,
    /// Corrupt the first transaction's payload in the broadcast copy.
    TxnData,
    /// Permanently corrupt a historical block on the sender's own chain.
    Chain,
}

/// Fault-injection settings for resilience testing.
#[derive(Clone, Debug, Default)]
pub struct FaultConfig {
    /// Every N-th mined block gets tampered before broadcast. `None`
    /// disables tampering.
    pub tamper_freq: Option<u64>,
    /// What the tamper hook corrupts.
    pub tamper_type: TamperType,
    /// Broadcasts are suppressed except for every N-th mined block.
    /// `None` broadcasts everything.
    pub broadcast_freq: Option<u64>,
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Whether to run a `/metrics` HTTP exporter.
    pub enabled: bool,
    /// Address to bind the metrics HTTP server to.
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        // Disabled by default: several peers usually share a host, and
        // each would need its own port anyway.
        let addr: SocketAddr = "127.0.0.1:9898"
            .parse()
            .expect("hard-coded metrics listen address should parse");
        Self {
            enabled: false,
            listen_addr: addr,
        }
    }
}

/// Top-level configuration for a peer node.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub difficulty: usize,
    pub faults: FaultConfig,
    pub metrics: MetricsConfig,
}

impl NodeConfig {
    pub fn new(difficulty: usize) -> Self {
        Self {
            difficulty,
            faults: FaultConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }

    /// Overlays settings from a JSON config file onto this config.
    /// Only the keys present in the file change anything.
    pub fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let bytes = std::fs::read(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e.to_string()))?;
        let file: ConfigFile = serde_json::from_slice(&bytes)
            .map_err(|e| ConfigError::Parse(path.display().to_string(), e.to_string()))?;

        if file.tamper_freq.is_some() {
            self.faults.tamper_freq = file.tamper_freq;
        }
        if let Some(tamper_type) = file.tamper_type {
            self.faults.tamper_type = tamper_type;
        }
        if file.broadcast_freq.is_some() {
            self.faults.broadcast_freq = file.broadcast_freq;
        }
        if let Some(addr) = file.metrics_listen_addr {
            self.metrics.enabled = true;
            self.metrics.listen_addr = addr;
        }

        Ok(())
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DIFFICULTY)
    }
}

/// On-disk shape of the optional config file. Every key is optional.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    tamper_freq: Option<u64>,
    tamper_type: Option<TamperType>,
    broadcast_freq: Option<u64>,
    metrics_listen_addr: Option<SocketAddr>,
}

/// Error loading the config file. Fatal at startup.
#[derive(Debug)]
pub enum ConfigError {
    Io(String, String),
    Parse(String, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(path, msg) => write!(f, "cannot read config {path}: {msg}"),
            ConfigError::Parse(path, msg) => write!(f, "cannot parse config {path}: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp_config(label: &str, contents: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("pollchain-config-{}-{label}.json", std::process::id()));
        let mut file = std::fs::File::create(&path).expect("create temp config");
        file.write_all(contents.as_bytes()).expect("write temp config");
        path
    }

    #[test]
    fn defaults_mean_no_faults_and_no_metrics() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.difficulty, DEFAULT_DIFFICULTY);
        assert!(cfg.faults.tamper_freq.is_none());
        assert!(cfg.faults.broadcast_freq.is_none());
        assert_eq!(cfg.faults.tamper_type, TamperType::Hash);
        assert!(!cfg.metrics.enabled);
    }

    #[test]
    fn file_overlays_only_present_keys() {
        let path = write_temp_config("overlay", r#"{"tamper_freq": 3, "tamper_type": "prev_hash"}"#);

        let mut cfg = NodeConfig::new(2);
        cfg.apply_file(&path).expect("config should load");
        std::fs::remove_file(&path).ok();

        assert_eq!(cfg.difficulty, 2);
        assert_eq!(cfg.faults.tamper_freq, Some(3));
        assert_eq!(cfg.faults.tamper_type, TamperType::PrevHash);
        assert!(cfg.faults.broadcast_freq.is_none());
        assert!(!cfg.metrics.enabled);
    }

    #[test]
    fn metrics_key_enables_the_exporter() {
        let path = write_temp_config("metrics", r#"{"metrics_listen_addr": "127.0.0.1:9777"}"#);

        let mut cfg = NodeConfig::default();
        cfg.apply_file(&path).expect("config should load");
        std::fs::remove_file(&path).ok();

        assert!(cfg.metrics.enabled);
        assert_eq!(cfg.metrics.listen_addr.port(), 9777);
    }

    #[test]
    fn all_tamper_types_parse() {
        for (raw, expected) in [
            ("\"hash\"", TamperType::Hash),
            ("\"prev_hash\"", TamperType::PrevHash),
            ("\"txn_data\"", TamperType::TxnData),
            ("\"chain\"", TamperType::Chain),
        ] {
            let parsed: TamperType = serde_json::from_str(raw).expect("tamper type parses");
            assert_eq!(parsed, expected);
        }
    }

    #[test]
    fn unreadable_or_invalid_files_error() {
        let mut cfg = NodeConfig::default();
        assert!(cfg.apply_file(Path::new("/no/such/config.json")).is_err());

        let path = write_temp_config("invalid", "not json at all");
        let result = cfg.apply_file(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(ConfigError::Parse(_, _))));
    }
}
