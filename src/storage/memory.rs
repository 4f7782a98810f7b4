//! Reference in-process storage adapter.
//!
//! `InMemoryStorage` is a `Mutex`-guarded set of `HashMap`/`BTreeMap` collections
//! implementing `StorageAdapter`. It is not a production storage engine — the real
//! backend is an external collaborator per spec §1 — but it is sufficient to run
//! the node standalone and to drive the test suite, the same role in-memory test
//! doubles play in the wider codebase this one's storage trait is modeled on.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::election::ValidatorSet;
use crate::error::{StorageError, StorageResult};
use crate::storage::{Block, PreCommitState, StorageAdapter};
use crate::transaction::{OutputLink, Transaction};

#[derive(Default)]
struct Inner {
    transactions: HashMap<String, Transaction>,
    blocks: BTreeMap<u64, Block>,
    pre_commit: Option<PreCommitState>,
    /// `(output-creating tx id, output index) -> spender tx id`. Keyed by the
    /// link being spent, not the spender, so `is_spent` stays a point lookup;
    /// the spender id is carried alongside so `delete_transactions` can also
    /// roll back markers the deleted transaction itself set (as opposed to
    /// only markers on outputs it created).
    spent: HashMap<(String, u32), String>,
    validator_sets: BTreeMap<u64, (ValidatorSet, Option<String>)>,
    /// `tx_id -> height`, populated by `store_block`.
    tx_height: HashMap<String, u64>,
}

/// In-memory reference implementation of the storage adapter (spec §4.A).
///
/// Internally single-`Mutex`-guarded: the core's storage surface is narrow
/// enough (point queries, small scans) that splitting locks per collection
/// would add complexity without a measurable benefit for a reference/test
/// backend.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StorageAdapter for InMemoryStorage {
    fn get_transaction(&self, id: &str) -> StorageResult<Option<Transaction>> {
        Ok(self.lock().transactions.get(id).cloned())
    }

    fn store_transactions(&self, transactions: &[Transaction]) -> StorageResult<()> {
        let mut inner = self.lock();
        for tx in transactions {
            let id = tx
                .id
                .clone()
                .ok_or_else(|| StorageError::Backend("cannot store a transaction without an id".into()))?;
            inner.transactions.insert(id, tx.clone());
        }
        Ok(())
    }

    fn get_output_recipients(&self, link: &OutputLink) -> StorageResult<Option<Vec<String>>> {
        let inner = self.lock();
        Ok(inner
            .transactions
            .get(&link.transaction_id)
            .and_then(|tx| tx.outputs.get(link.output_index as usize))
            .map(|output| output.public_keys.clone()))
    }

    fn get_output_amount(&self, link: &OutputLink) -> StorageResult<Option<u64>> {
        let inner = self.lock();
        Ok(inner
            .transactions
            .get(&link.transaction_id)
            .and_then(|tx| tx.outputs.get(link.output_index as usize))
            .map(|output| output.amount))
    }

    fn is_spent(&self, link: &OutputLink) -> StorageResult<bool> {
        let inner = self.lock();
        Ok(inner.spent.contains_key(&(link.transaction_id.clone(), link.output_index)))
    }

    fn mark_spent(&self, link: &OutputLink, spender_tx_id: &str) -> StorageResult<()> {
        let mut inner = self.lock();
        inner.spent.insert((link.transaction_id.clone(), link.output_index), spender_tx_id.to_string());
        Ok(())
    }

    fn get_latest_block(&self) -> StorageResult<Option<Block>> {
        Ok(self.lock().blocks.values().next_back().cloned())
    }

    fn store_block(&self, block: Block) -> StorageResult<()> {
        let mut inner = self.lock();
        for id in &block.transaction_ids {
            inner.tx_height.insert(id.clone(), block.height);
        }
        inner.blocks.insert(block.height, block);
        Ok(())
    }

    fn get_pre_commit_state(&self) -> StorageResult<Option<PreCommitState>> {
        Ok(self.lock().pre_commit.clone())
    }

    fn store_pre_commit_state(&self, state: PreCommitState) -> StorageResult<()> {
        self.lock().pre_commit = Some(state);
        Ok(())
    }

    fn delete_transactions(&self, ids: &[String]) -> StorageResult<()> {
        let mut inner = self.lock();
        for id in ids {
            inner.transactions.remove(id);
            inner.tx_height.remove(id);
        }
        // Clear markers on outputs these transactions created, and markers
        // these transactions set by spending someone else's output — a
        // deleted pre-commit TRANSFER/VOTE must not leave its input looking
        // spent, or its re-delivery after recovery spuriously double-spend-
        // rejects.
        inner.spent.retain(|(tx_id, _), spender_id| !ids.contains(tx_id) && !ids.contains(spender_id));
        Ok(())
    }

    fn get_validators(&self, height: u64) -> StorageResult<ValidatorSet> {
        let inner = self.lock();
        Ok(inner
            .validator_sets
            .range(..=height)
            .next_back()
            .map(|(_, (set, _))| set.clone())
            .unwrap_or_default())
    }

    fn store_validator_set(
        &self,
        height: u64,
        set: ValidatorSet,
        election_id: Option<String>,
    ) -> StorageResult<()> {
        self.lock().validator_sets.insert(height, (set, election_id));
        Ok(())
    }

    fn get_transactions_by_asset_id(&self, asset_id: &str) -> StorageResult<Vec<Transaction>> {
        let inner = self.lock();
        Ok(inner
            .transactions
            .values()
            .filter(|tx| tx.asset_id() == Some(asset_id))
            .cloned()
            .collect())
    }

    fn get_block_containing_tx(&self, id: &str) -> StorageResult<Option<u64>> {
        Ok(self.lock().tx_height.get(id).copied())
    }

    fn get_validators_by_election_id(&self, id: &str) -> StorageResult<Option<(u64, ValidatorSet)>> {
        let inner = self.lock();
        Ok(inner
            .validator_sets
            .iter()
            .find(|(_, (_, election_id))| election_id.as_deref() == Some(id))
            .map(|(height, (set, _))| (*height, set.clone())))
    }

    fn latest_validator_set_height(&self) -> StorageResult<u64> {
        Ok(self.lock().validator_sets.keys().next_back().copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::Validator;
    use crate::transaction::TransactionBuilder;

    fn sample_tx() -> Transaction {
        TransactionBuilder::create("pk-a".into(), serde_json::json!({"name": "x"}))
            .with_output(10, vec!["pk-a".into()])
            .build_unsigned()
            .finalize()
    }

    #[test]
    fn stores_and_retrieves_transaction_by_id() {
        let storage = InMemoryStorage::new();
        let tx = sample_tx();
        storage.store_transactions(&[tx.clone()]).unwrap();
        let fetched = storage.get_transaction(tx.id.as_deref().unwrap()).unwrap();
        assert_eq!(fetched, Some(tx));
    }

    #[test]
    fn delete_transactions_clears_spend_markers() {
        let storage = InMemoryStorage::new();
        let tx = sample_tx();
        let id = tx.id.clone().unwrap();
        storage.store_transactions(&[tx]).unwrap();
        let link = OutputLink { transaction_id: id.clone(), output_index: 0 };
        storage.mark_spent(&link, "someone").unwrap();
        assert!(storage.is_spent(&link).unwrap());

        storage.delete_transactions(&[id.clone()]).unwrap();
        assert_eq!(storage.get_transaction(&id).unwrap(), None);
        assert!(!storage.is_spent(&link).unwrap());
    }

    /// Deleting a TRANSFER/VOTE that spent someone else's output must also
    /// clear the marker it set on that output, not just markers on outputs it
    /// created itself — otherwise a pre-commit tx that is later deleted by
    /// recovery leaves its input looking permanently spent, and its
    /// re-delivery after the BFT engine re-proposes the block spuriously
    /// fails as a double spend.
    #[test]
    fn delete_transactions_clears_markers_it_set_as_spender() {
        let storage = InMemoryStorage::new();
        let funding_tx = sample_tx();
        let funding_id = funding_tx.id.clone().unwrap();
        storage.store_transactions(&[funding_tx]).unwrap();

        let spender_id = "spender-tx".to_string();
        let link = OutputLink { transaction_id: funding_id.clone(), output_index: 0 };
        storage.mark_spent(&link, &spender_id).unwrap();
        assert!(storage.is_spent(&link).unwrap());

        storage.delete_transactions(&[spender_id]).unwrap();
        assert!(!storage.is_spent(&link).unwrap());
        // The funding transaction itself was untouched by this deletion.
        assert!(storage.get_transaction(&funding_id).unwrap().is_some());
    }

    #[test]
    fn get_validators_returns_greatest_height_at_or_below_query() {
        let storage = InMemoryStorage::new();
        let v = |pk: &str, power: u64| Validator { public_key: pk.into(), power, node_id: pk.into() };
        storage.store_validator_set(0, ValidatorSet::new(vec![v("a", 10)]), None).unwrap();
        storage
            .store_validator_set(5, ValidatorSet::new(vec![v("a", 10), v("b", 5)]), Some("e1".into()))
            .unwrap();

        assert_eq!(storage.get_validators(3).unwrap().len(), 1);
        assert_eq!(storage.get_validators(5).unwrap().len(), 2);
        assert_eq!(storage.get_validators(100).unwrap().len(), 2);
    }
}
