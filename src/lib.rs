//! Permissioned, BFT-replicated transaction ledger node — application side of
//! the application-blockchain interface (ABI) consumed by an external BFT
//! consensus engine.
//!
//! This crate implements the three tightly coupled subsystems the node's
//! hard core comprises: the parallel transaction validation pipeline
//! ([`parallel`]), the validator-set election protocol ([`election`]), and
//! crash-recovery reconciliation ([`abi::recover`]). The command-line
//! front-end, the BFT engine, the storage backend's real implementation, and
//! cryptographic primitive implementations remain external collaborators;
//! this crate consumes them through narrow traits and libraries
//! ([`storage::StorageAdapter`], `ed25519-dalek`, `sha3`, `bs58`).

pub mod abi;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod election;
pub mod error;
pub mod parallel;
pub mod storage;
pub mod transaction;
pub mod validation;

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::NodeConfig;
use crate::election::ValidatorSet;
use crate::error::LedgerResult;
use crate::storage::{InMemoryStorage, StorageAdapter};

/// Wires the ambient stack's `start` entry point (spec §1, §9): load
/// configuration, construct the reference storage backend, seed the genesis
/// validator set if storage has none yet, run crash recovery, and construct
/// the ABI handler. There is no module-level mutable configuration state —
/// everything the handler needs is an explicit parameter bag built here and
/// handed off (spec §9 "Global configuration").
///
/// Returns the constructed handler; serving it over an actual ABI socket is
/// the external transport's job (spec §1 Non-goals), so this function does
/// not block.
pub fn start_node(config_path: &Path) -> LedgerResult<abi::AbiHandler> {
    let config = NodeConfig::load(config_path)?;
    let storage: Arc<dyn StorageAdapter> = Arc::new(InMemoryStorage::new());

    if storage.get_validators(0)?.is_empty() && !config.genesis.validators.is_empty() {
        let genesis = ValidatorSet::new(config.genesis.validators.clone());
        storage.store_validator_set(0, genesis, None)?;
        info!(count = config.genesis.validators.len(), "seeded genesis validator set");
    }

    abi::recover(storage.as_ref())?;

    let worker_count = config.parallel_validator.resolved_worker_count();
    let handler = abi::AbiHandler::new(Arc::clone(&storage), worker_count, config.abi_handler.clone());
    info!(worker_count, "ABI handler ready; awaiting transport wiring to the BFT engine");
    Ok(handler)
}
