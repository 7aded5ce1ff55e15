pub mod config;

pub use config::{ConfigError, NodeConfig, NodeType};
