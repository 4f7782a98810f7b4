//! Configuration layer.
//!
//! Mirrors the per-component `*Config` struct convention seen across
//! `apollo_gateway::config::GatewayConfig` and its siblings: a plain
//! `serde`-deserializable struct with a `Default` impl, loaded from an optional
//! TOML file and then handed to the entry point as an explicit parameter bag
//! (per spec.md §9 — there is no module-level mutable configuration state
//! anywhere in this crate).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::election::Validator;
use crate::error::{LedgerError, LedgerResult};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParallelValidatorConfig {
    /// Number of worker threads. `None` means `std::thread::available_parallelism()`.
    pub worker_count: Option<usize>,
}

impl Default for ParallelValidatorConfig {
    fn default() -> Self {
        Self { worker_count: None }
    }
}

impl ParallelValidatorConfig {
    pub fn resolved_worker_count(&self) -> usize {
        self.worker_count.unwrap_or_else(|| {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AbiHandlerConfig {
    /// How long `end_block` waits for the parallel validator to harvest results
    /// before failing the block (§5).
    pub harvest_timeout: Duration,
}

impl Default for AbiHandlerConfig {
    fn default() -> Self {
        Self { harvest_timeout: Duration::from_secs(30) }
    }
}

/// The validator set effective at height 0, before any election has ever
/// concluded (spec §3 "Validator-set snapshot"). Empty by default: a node
/// with no configured genesis validators starts with zero total power, which
/// makes every `VALIDATOR_ELECTION`'s power-change bound trivially `0 < 0`
/// (rejected) until an operator configures at least one genesis validator.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct GenesisConfig {
    pub validators: Vec<Validator>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct NodeConfig {
    pub parallel_validator: ParallelValidatorConfig,
    pub abi_handler: AbiHandlerConfig,
    pub genesis: GenesisConfig,
}

impl NodeConfig {
    /// Load a configuration file, falling back to defaults for any field the file
    /// does not set. Absence of the file is not an error: a node with no config
    /// file simply runs with defaults, matching the convention of `Default`-able
    /// configs used throughout.
    pub fn load(path: &Path) -> LedgerResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| LedgerError::Config(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&contents)
            .map_err(|e| LedgerError::Config(format!("failed to parse {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_yields_defaults() {
        let path = Path::new("/nonexistent/ledger-node.toml");
        let config = NodeConfig::load(path).unwrap();
        assert_eq!(config, NodeConfig::default());
    }

    #[test]
    fn resolved_worker_count_defaults_to_available_parallelism() {
        let config = ParallelValidatorConfig::default();
        assert!(config.resolved_worker_count() >= 1);
    }

    #[test]
    fn loads_partial_toml_file_filling_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger-node.toml");
        std::fs::write(&path, "[parallel_validator]\nworker_count = 4\n").unwrap();

        let config = NodeConfig::load(&path).unwrap();
        assert_eq!(config.parallel_validator.worker_count, Some(4));
        assert_eq!(config.abi_handler, AbiHandlerConfig::default());
        assert!(config.genesis.validators.is_empty());
    }
}
