use crate::cluster::ShardTopology;
use crate::core::{KvError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix for environment variables layered over the shard table file.
pub const ENV_PREFIX: &str = "SHARDKV";

/// One `[[shards]]` entry of the shard table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardConfig {
    pub name: String,
    pub idx: u32,
    pub address: String,
    #[serde(default)]
    pub replicas: Vec<String>,
}

/// Static cluster description shared by every node.
///
/// ```toml
/// [[shards]]
/// name = "Moscow"
/// idx = 0
/// address = "127.0.0.2:8080"
/// replicas = ["127.0.0.22:8080"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ClusterConfig {
    #[serde(default)]
    pub shards: Vec<ShardConfig>,
}

impl ClusterConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .to_str()
            .ok_or_else(|| KvError::Config(format!("non UTF-8 config path {}", path.display())))?;

        let settings = config::Config::builder()
            .add_source(config::File::new(name, config::FileFormat::Toml).required(true))
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .map_err(|e| KvError::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| KvError::Config(e.to_string()))
    }

    /// Parses the shard table from an in-memory TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        config::Config::builder()
            .add_source(config::File::from_str(contents, config::FileFormat::Toml))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| KvError::Config(e.to_string()))
    }

    /// Validated topology for the node named `shard_name`.
    pub fn topology(&self, shard_name: &str) -> Result<ShardTopology> {
        ShardTopology::from_shards(&self.shards, shard_name)
    }
}
