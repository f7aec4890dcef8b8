//! Node configuration, loaded from YAML.
//!
//! ```yaml
//! proposer_id: 1
//! rpc_timeout_ms: 500
//! log_level: info
//! acceptors:
//!   - 127.0.0.1:7001
//!   - 127.0.0.1:7002
//!   - 127.0.0.1:7003
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use yaml_rust::{Yaml, YamlLoader};

use crate::error::PaxosError;
use crate::proposer::{DEFAULT_RPC_TIMEOUT, ProposerConfig};

pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub proposer_id: u16,
    pub rpc_timeout: Duration,
    pub log_level: String,
    pub acceptors: Vec<String>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PaxosError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| PaxosError::Config(format!("read {}: {}", path.display(), e)))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, PaxosError> {
        let docs = YamlLoader::load_from_str(text)
            .map_err(|e| PaxosError::Config(format!("invalid yaml: {}", e)))?;
        let doc = docs
            .first()
            .ok_or_else(|| PaxosError::Config("empty config".to_string()))?;

        let proposer_id = match &doc["proposer_id"] {
            Yaml::BadValue => 0,
            value => value
                .as_i64()
                .and_then(|n| u16::try_from(n).ok())
                .ok_or_else(|| PaxosError::Config("proposer_id must fit in 16 bits".to_string()))?,
        };

        let rpc_timeout = match &doc["rpc_timeout_ms"] {
            Yaml::BadValue => DEFAULT_RPC_TIMEOUT,
            value => value
                .as_i64()
                .and_then(|n| u64::try_from(n).ok())
                .filter(|n| *n > 0)
                .map(Duration::from_millis)
                .ok_or_else(|| {
                    PaxosError::Config("rpc_timeout_ms must be a positive integer".to_string())
                })?,
        };

        let log_level = match &doc["log_level"] {
            Yaml::BadValue => DEFAULT_LOG_LEVEL.to_string(),
            value => value
                .as_str()
                .map(str::to_owned)
                .ok_or_else(|| PaxosError::Config("log_level must be a string".to_string()))?,
        };

        let raw = doc["acceptors"]
            .as_vec()
            .ok_or_else(|| PaxosError::Config("acceptors must be a list".to_string()))?;
        let acceptors = raw
            .iter()
            .map(|entry| {
                entry.as_str().map(str::to_owned).ok_or_else(|| {
                    PaxosError::Config(format!("acceptor entry {:?} is not a string", entry))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        check_acceptors(&acceptors)?;

        Ok(Config {
            proposer_id,
            rpc_timeout,
            log_level,
            acceptors,
        })
    }

    pub fn proposer_config(&self) -> ProposerConfig {
        ProposerConfig {
            proposer_id: self.proposer_id,
            rpc_timeout: self.rpc_timeout,
        }
    }
}

/// Parse a comma-separated acceptor address list such as `"a:1, b:2"`.
pub fn parse_acceptor_list(list: &str) -> Result<Vec<String>, PaxosError> {
    let acceptors: Vec<String> = list.split(',').map(|s| s.trim().to_owned()).collect();
    check_acceptors(&acceptors)?;
    Ok(acceptors)
}

fn check_acceptors(acceptors: &[String]) -> Result<(), PaxosError> {
    if acceptors.is_empty() {
        return Err(PaxosError::Config("no acceptors configured".to_string()));
    }
    let mut seen = HashSet::new();
    for addr in acceptors {
        if addr.is_empty() {
            return Err(PaxosError::Config("empty acceptor address".to_string()));
        }
        if !seen.insert(addr.as_str()) {
            return Err(PaxosError::Config(format!("duplicate acceptor {}", addr)));
        }
    }
    Ok(())
}
