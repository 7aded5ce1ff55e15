use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::time::Duration;

use containers::{Checkpoint, CheckpointError, parse_checkpoints};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PROTOCOL_VERSION: u32 = 0;

pub const SERVICE_NODE: u64 = 1;
pub const VERIFY_NODE: u64 = 2;

pub const MAX_SYNC_HDR_REQ: usize = 2;
pub const MAX_OUTBOUND_CNT: usize = 8;
pub const DEFAULT_MAX_PEERS: usize = 125;
pub const GETADDR_MAX: usize = 2500;
pub const MIN_CONN_CNT: usize = 3;

pub const MAX_CACHE_HASH: usize = 16;
pub const MAX_INV_CACHE_HASH: usize = 16;

pub const DEFAULT_NODE_PORT: u16 = 20338;
pub const DEFAULT_MAGIC: u32 = 0x7464_6e61;
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_BLOCK_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_METRICS_PORT: u16 = 5054;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    #[default]
    Service,
    Verify,
}

impl NodeType {
    /// Service bitmask advertised in the version handshake.
    pub fn services(self) -> u64 {
        match self {
            NodeType::Service => SERVICE_NODE,
            NodeType::Verify => VERIFY_NODE,
        }
    }
}

/// Node parameters loaded from YAML. Every field has a default, so an empty
/// file is a valid configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct NodeConfig {
    pub node_port: u16,
    pub node_type: NodeType,
    pub magic: u32,
    pub max_hdr_sync_reqs: usize,
    pub max_outbound_cnt: usize,
    pub default_max_peers: usize,
    pub get_addr_max: usize,
    pub min_conn_cnt: usize,
    pub checkpoints: Vec<String>,
    pub seed_list: Vec<String>,
    pub sync_interval_secs: u64,
    pub block_request_timeout_secs: u64,
    pub metrics_enabled: bool,
    pub metrics_address: String,
    pub metrics_port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_port: DEFAULT_NODE_PORT,
            node_type: NodeType::Service,
            magic: DEFAULT_MAGIC,
            max_hdr_sync_reqs: 0,
            max_outbound_cnt: 0,
            default_max_peers: 0,
            get_addr_max: 0,
            min_conn_cnt: 0,
            checkpoints: Vec::new(),
            seed_list: Vec::new(),
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            block_request_timeout_secs: DEFAULT_BLOCK_REQUEST_TIMEOUT_SECS,
            metrics_enabled: true,
            metrics_address: "127.0.0.1".to_string(),
            metrics_port: DEFAULT_METRICS_PORT,
        }
    }
}

/// Use `value` only when it is positive and below the protocol limit.
fn clamp_to(value: usize, limit: usize) -> usize {
    if value > 0 && value < limit { value } else { limit }
}

impl NodeConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: NodeConfig = serde_yaml::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.checkpoints()?;
        Ok(())
    }

    pub fn checkpoints(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        parse_checkpoints(&self.checkpoints)
    }

    /// Capacity of each of the header and block request windows.
    pub fn effective_sync_reqs(&self) -> usize {
        if self.max_hdr_sync_reqs == 0 {
            MAX_SYNC_HDR_REQ
        } else {
            self.max_hdr_sync_reqs
        }
    }

    pub fn effective_max_outbound(&self) -> usize {
        clamp_to(self.max_outbound_cnt, MAX_OUTBOUND_CNT)
    }

    pub fn effective_max_peers(&self) -> usize {
        clamp_to(self.default_max_peers, DEFAULT_MAX_PEERS)
    }

    pub fn effective_get_addr_max(&self) -> usize {
        clamp_to(self.get_addr_max, GETADDR_MAX)
    }

    pub fn effective_min_conn_cnt(&self) -> usize {
        if self.min_conn_cnt == 0 {
            MIN_CONN_CNT
        } else {
            self.min_conn_cnt
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    pub fn block_request_timeout(&self) -> Duration {
        Duration::from_secs(self.block_request_timeout_secs.max(1))
    }
}
