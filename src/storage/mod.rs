//! Storage adapter boundary (§4.A).
//!
//! The ledger core never touches a concrete database; it depends only on this
//! trait. `InMemoryStorage` is the reference implementation used by tests and by
//! the CLI when no persistent backend is configured, the same line
//! `apollo_batcher` draws between its storage trait and its test double.

mod memory;

pub use memory::InMemoryStorage;

use crate::election::ValidatorSet;
use crate::error::StorageResult;
use crate::transaction::{OutputLink, Transaction};

/// A committed block: its height, the ordered transaction ids it contains, and
/// the app hash carried forward from `commit` (§5).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub height: u64,
    pub transaction_ids: Vec<String>,
    pub app_hash: Vec<u8>,
}

/// The intent record written before `commit` completes, and compared against the
/// latest committed block on restart to drive crash recovery (§7).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreCommitState {
    pub height: u64,
    pub transaction_ids: Vec<String>,
}

/// Storage surface the validation engine, parallel validator, and ABI handler
/// depend on. Implementations must be safe to share across worker threads.
pub trait StorageAdapter: Send + Sync {
    fn get_transaction(&self, id: &str) -> StorageResult<Option<Transaction>>;

    fn store_transactions(&self, transactions: &[Transaction]) -> StorageResult<()>;

    /// All transactions in the block that created or touched the given output's
    /// asset — used to check whether a TRANSFER/VOTE's `owners_before` matches the
    /// referenced output's recipients, and whether that output has already been
    /// spent by a prior transaction.
    fn get_output_recipients(&self, link: &OutputLink) -> StorageResult<Option<Vec<String>>>;

    fn get_output_amount(&self, link: &OutputLink) -> StorageResult<Option<u64>>;

    /// Whether `link` has already been consumed by some other transaction's
    /// input (§4.C check 4, double-spend).
    fn is_spent(&self, link: &OutputLink) -> StorageResult<bool>;

    fn mark_spent(&self, link: &OutputLink, spender_tx_id: &str) -> StorageResult<()>;

    fn get_latest_block(&self) -> StorageResult<Option<Block>>;

    fn store_block(&self, block: Block) -> StorageResult<()>;

    fn get_pre_commit_state(&self) -> StorageResult<Option<PreCommitState>>;

    fn store_pre_commit_state(&self, state: PreCommitState) -> StorageResult<()>;

    /// Remove transactions (and their spend markers) from storage. Used by crash
    /// recovery to undo a pre-commit whose block was never actually committed
    /// (§7).
    fn delete_transactions(&self, ids: &[String]) -> StorageResult<()>;

    fn get_validators(&self, height: u64) -> StorageResult<ValidatorSet>;

    /// Append-only: writes the validator set effective as of `height`, tagged
    /// with the id of the election that concluded to produce it (spec §3,
    /// §4.A). Snapshots at height 0 (genesis) may pass `election_id = None`.
    fn store_validator_set(
        &self,
        height: u64,
        set: ValidatorSet,
        election_id: Option<String>,
    ) -> StorageResult<()>;

    /// All committed transactions whose `asset.id` (or, for CREATE/ELECTION, own
    /// `id`) equals `asset_id` — the `transactions by asset.id` index of spec §6,
    /// used to tally votes cast against an election (§4.E).
    fn get_transactions_by_asset_id(&self, asset_id: &str) -> StorageResult<Vec<Transaction>>;

    /// The height of the block that committed transaction `id`, if any (§4.A
    /// `get_block_containing_tx`), used by election status queries (§4.E).
    fn get_block_containing_tx(&self, id: &str) -> StorageResult<Option<u64>>;

    /// The validator-set snapshot whose `election_id` equals `id`, if any — used
    /// to determine whether an election has concluded (§4.A
    /// `get_validators_by_election_id`, §4.E).
    fn get_validators_by_election_id(&self, id: &str) -> StorageResult<Option<(u64, ValidatorSet)>>;

    /// The height of the most recently written validator-set snapshot (0 if
    /// only the genesis set has ever been stored), used by election status
    /// queries (§4.E "the last validator-change height").
    fn latest_validator_set_height(&self) -> StorageResult<u64>;
}
