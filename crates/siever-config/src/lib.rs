//! Layered configuration for the siever node, grounded in the teacher's
//! `config` crate (`Config::builder().add_source(File).add_source(Environment)`):
//! a JSON/TOML file overridden by `SIEVER__*` environment variables, plus
//! the channel-membership JSON format from spec.md §6 that the directory
//! service hands to joining peers.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),
    #[error("failed to read channel membership file {path}: {source}")]
    MembershipIo { path: String, source: std::io::Error },
    #[error("malformed channel membership file {path}: {source}")]
    MembershipSchema { path: String, source: serde_json::Error },
}

/// Top-level node configuration, populated by [`load_config`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Human-readable name for this node, used in tracing spans and logs.
    #[serde(default)]
    pub moniker: String,

    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub consensus: ConsensusConfig,
    pub network: NetworkConfig,
    pub rs: RsConfig,
    pub metrics: MetricsConfig,

    /// Channel membership, as shipped by the directory service or loaded
    /// from a local file for single-process test networks (spec.md §6).
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelMembership>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `RUST_LOG`-style filter directive, e.g. `"info"` or
    /// `"siever_consensus=debug,siever_sync=info"`.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { level: "info".to_string(), json: false }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory; each channel gets `db_<peer_target>_<channel>/`
    /// underneath it, per spec.md §6's persisted-state layout.
    pub path: std::path::PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig { path: std::path::PathBuf::from("./data") }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusVariantConfig {
    Siever,
    Lft,
}

impl Default for ConsensusVariantConfig {
    fn default() -> Self {
        ConsensusVariantConfig::Siever
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    pub variant: ConsensusVariantConfig,
    /// Config-gated fault injection (REDESIGN FLAGS, spec.md §9): replaces
    /// the original's `TEST_FAIL_VOTE_SIGN` wire sentinel.
    #[serde(default)]
    pub fault_injection: FaultInjectionConfig,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultInjectionConfig {
    #[serde(default)]
    pub always_nay_vote: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Outer (peer-to-peer) listen address.
    pub listen_addr: String,
    /// Inner (loopback-only, plaintext) listen address.
    pub inner_listen_addr: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            listen_addr: "0.0.0.0:7100".to_string(),
            inner_listen_addr: "127.0.0.1:7200".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RsConfig {
    /// Primary and (optional) fallback directory-service targets, matching
    /// the CLI's `-r RS_TARGET[,RS_TARGET_SUB]` (spec.md §6).
    pub targets: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig { enabled: true, listen_addr: "127.0.0.1:9000".to_string() }
    }
}

/// One channel's `score_package` and peer list, as stored on the RS side
/// (spec.md §6's "Channel membership file").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelMembership {
    pub score_package: String,
    pub peers: Vec<MemberPeer>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemberPeer {
    pub peer_target: String,
}

/// Loads `Config` from `path`, overridden by `SIEVER__*` environment
/// variables (double-underscore separator, matching the teacher's
/// `Environment::with_prefix(...).separator("__")`).
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(config::Environment::with_prefix("SIEVER").separator("__"))
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))
}

/// Parses a channel-membership JSON document (spec.md §6), substituting
/// the literal token `[local_ip]` in every `peer_target` with `local_ip`.
pub fn parse_membership(
    json: &str,
    local_ip: &str,
) -> Result<BTreeMap<String, ChannelMembership>, serde_json::Error> {
    let mut membership: BTreeMap<String, ChannelMembership> = serde_json::from_str(json)?;
    for channel in membership.values_mut() {
        for peer in &mut channel.peers {
            if peer.peer_target.contains("[local_ip]") {
                peer.peer_target = peer.peer_target.replace("[local_ip]", local_ip);
            }
        }
    }
    Ok(membership)
}

/// Loads and parses a channel-membership file from disk (default path
/// `channel_manage_data.json`, per spec.md §6).
pub fn load_membership(
    path: &Path,
    local_ip: &str,
) -> Result<BTreeMap<String, ChannelMembership>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::MembershipIo {
        path: path.display().to_string(),
        source,
    })?;
    parse_membership(&raw, local_ip).map_err(|source| ConfigError::MembershipSchema {
        path: path.display().to_string(),
        source,
    })
}

/// Default channel-membership file name, per spec.md §6.
pub const DEFAULT_MEMBERSHIP_FILE: &str = "channel_manage_data.json";

#[allow(dead_code)]
fn humantime_default() -> Duration {
    Duration::from_secs(30)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_ip_token_is_substituted() {
        let json = r#"{
            "chain1": {
                "score_package": "hello",
                "peers": [{"peer_target": "[local_ip]:7100"}, {"peer_target": "10.0.0.2:7100"}]
            }
        }"#;

        let membership = parse_membership(json, "192.168.1.5").unwrap();
        let chain1 = &membership["chain1"];
        assert_eq!(chain1.peers[0].peer_target, "192.168.1.5:7100");
        assert_eq!(chain1.peers[1].peer_target, "10.0.0.2:7100");
    }

    #[test]
    fn load_membership_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_MEMBERSHIP_FILE);
        std::fs::write(
            &path,
            r#"{"chain1": {"score_package": "hello", "peers": [{"peer_target": "[local_ip]:7100"}]}}"#,
        )
        .unwrap();

        let membership = load_membership(&path, "127.0.0.1").unwrap();
        assert_eq!(membership["chain1"].peers[0].peer_target, "127.0.0.1:7100");
    }

    #[test]
    fn load_config_applies_environment_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            serde_json::to_string(&Config {
                moniker: "node-a".to_string(),
                ..Config::default()
            })
            .unwrap(),
        )
        .unwrap();

        std::env::set_var("SIEVER__MONIKER", "node-a-overridden");
        let loaded = load_config(&path).unwrap();
        std::env::remove_var("SIEVER__MONIKER");

        assert_eq!(loaded.moniker, "node-a-overridden");
    }
}
