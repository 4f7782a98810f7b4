//! Drives `AbiHandler::election_status` through all three outcomes the status
//! query can report (spec §4.E "Status query"): an election that already
//! concluded, one still collecting votes, and one whose topology shifted
//! underneath it before it ever reached a supermajority.

use std::sync::Arc;

use ledger_node::abi::AbiHandler;
use ledger_node::config::AbiHandlerConfig;
use ledger_node::election::{ElectionStatus, Validator, ValidatorSet};
use ledger_node::storage::{Block, InMemoryStorage, StorageAdapter};

fn handler(storage: &Arc<InMemoryStorage>) -> AbiHandler {
    AbiHandler::new(Arc::clone(storage) as Arc<dyn StorageAdapter>, 1, AbiHandlerConfig::default())
}

fn genesis_set() -> ValidatorSet {
    ValidatorSet::new(vec![Validator { public_key: "p".into(), power: 10, node_id: "P".into() }])
}

#[test]
fn concluded_election_is_reported_concluded() {
    let storage = Arc::new(InMemoryStorage::new());
    storage.store_validator_set(0, genesis_set(), None).unwrap();
    storage.store_validator_set(3, genesis_set(), Some("e-concluded".into())).unwrap();

    let handler = handler(&storage);
    assert_eq!(handler.election_status("e-concluded").unwrap(), ElectionStatus::Concluded);
}

#[test]
fn election_with_no_recorded_conclusion_and_no_committed_block_is_ongoing() {
    let storage = Arc::new(InMemoryStorage::new());
    storage.store_validator_set(0, genesis_set(), None).unwrap();

    // No block ever recorded the election transaction's id, so there is no
    // election height to compare against a later topology change.
    let handler = handler(&storage);
    assert_eq!(handler.election_status("e-unseen").unwrap(), ElectionStatus::Ongoing);
}

#[test]
fn election_still_within_the_unchanged_topology_is_ongoing() {
    let storage = Arc::new(InMemoryStorage::new());
    storage.store_validator_set(0, genesis_set(), None).unwrap();
    storage
        .store_block(Block { height: 3, transaction_ids: vec!["e-ongoing".into()], app_hash: vec![] })
        .unwrap();

    // The validator set has not changed since before the election's block,
    // so it is still free to conclude.
    let handler = handler(&storage);
    assert_eq!(handler.election_status("e-ongoing").unwrap(), ElectionStatus::Ongoing);
}

#[test]
fn election_whose_topology_changed_underneath_it_is_inconclusive() {
    let storage = Arc::new(InMemoryStorage::new());
    storage.store_validator_set(0, genesis_set(), None).unwrap();
    storage
        .store_block(Block { height: 2, transaction_ids: vec!["e-stale".into()], app_hash: vec![] })
        .unwrap();
    // A different election concluded at height 5, after e-stale's block (2):
    // e-stale's proposed topology no longer matches current validators and it
    // can never conclude.
    storage.store_validator_set(5, genesis_set(), Some("e-other".into())).unwrap();

    let handler = handler(&storage);
    assert_eq!(handler.election_status("e-stale").unwrap(), ElectionStatus::Inconclusive);
}
