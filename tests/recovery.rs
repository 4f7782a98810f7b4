//! Crash-recovery reconciliation (spec §4.F "Recovery", §8 scenario 6).

use ledger_node::abi::recover;
use ledger_node::storage::{Block, InMemoryStorage, PreCommitState, StorageAdapter};
use ledger_node::transaction::TransactionBuilder;

fn dummy_transaction(seed: &str) -> ledger_node::transaction::Transaction {
    TransactionBuilder::create(format!("pk-{seed}"), serde_json::json!({"seed": seed}))
        .with_output(1, vec![format!("pk-{seed}")])
        .build_unsigned()
        .finalize()
}

#[test]
fn recovery_deletes_transactions_from_an_uncommitted_pre_commit_record() {
    let storage = InMemoryStorage::new();

    let tx1 = dummy_transaction("one");
    let tx1_id = tx1.id.clone().unwrap();
    storage.store_transactions(&[tx1]).unwrap();
    storage
        .store_block(Block { height: 9, transaction_ids: vec![tx1_id.clone()], app_hash: vec![] })
        .unwrap();

    let tx2 = dummy_transaction("two");
    let tx2_id = tx2.id.clone().unwrap();
    storage.store_transactions(&[tx2]).unwrap();
    storage
        .store_pre_commit_state(PreCommitState { height: 10, transaction_ids: vec![tx2_id.clone()] })
        .unwrap();

    recover(&storage).unwrap();

    assert_eq!(storage.get_transaction(&tx2_id).unwrap(), None);
    assert!(storage.get_transaction(&tx1_id).unwrap().is_some());
}

#[test]
fn recovery_is_a_no_op_when_pre_commit_is_already_consistent() {
    let storage = InMemoryStorage::new();

    let tx1 = dummy_transaction("one");
    let tx1_id = tx1.id.clone().unwrap();
    storage.store_transactions(&[tx1]).unwrap();
    storage
        .store_block(Block { height: 10, transaction_ids: vec![tx1_id.clone()], app_hash: vec![] })
        .unwrap();
    storage
        .store_pre_commit_state(PreCommitState { height: 10, transaction_ids: vec![tx1_id.clone()] })
        .unwrap();

    recover(&storage).unwrap();

    assert!(storage.get_transaction(&tx1_id).unwrap().is_some());
}

#[test]
fn recovery_is_a_no_op_when_no_pre_commit_record_exists() {
    let storage = InMemoryStorage::new();
    assert!(recover(&storage).is_ok());
}
