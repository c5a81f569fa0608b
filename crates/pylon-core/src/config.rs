//! Cluster topology configuration.
//!
//! A configuration is the address book of the cluster: logical node
//! names resolved to `host:port`, plus the name of the node this process
//! listens as. The daemon loads it from a TOML file:
//!
//! ```toml
//! local = "alpha"
//!
//! [nodes]
//! alpha = "127.0.0.1:3345"
//! beta  = "10.0.0.2:3345"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// The node this process opens an inbound gate for.
    pub local: String,

    /// Logical node name → `host:port`.
    pub nodes: HashMap<String, String>,
}

impl ClusterConfig {
    /// Resolve a node name to its configured address.
    pub fn node_info(&self, name: &str) -> Option<&str> {
        self.nodes.get(name).map(String::as_str)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }
}

impl<N, A> FromIterator<(N, A)> for ClusterConfig
where
    N: Into<String>,
    A: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, A)>>(iter: I) -> Self {
        ClusterConfig {
            local: String::new(),
            nodes: iter
                .into_iter()
                .map(|(n, a)| (n.into(), a.into()))
                .collect(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),

    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
}
