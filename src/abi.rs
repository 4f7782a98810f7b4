//! ABI handler and crash recovery (§4.F).
//!
//! Wires the transaction model, validation engine, parallel validator, and
//! election subsystem to the four lifecycle hooks an external BFT engine
//! drives: `check_tx`, `begin_block`, `deliver_tx`, `end_block` (which also
//! folds in `commit`, since the core treats the two as one atomic handoff —
//! the socket framing between them is an external-collaborator concern per
//! §1). This module does not speak protobuf or own a socket; `AbiHandler`'s
//! methods are shaped so a thin transport adapter can call them directly, the
//! same separation `Gateway` (business logic) keeps from its wire adapter.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::config::AbiHandlerConfig;
use crate::crypto;
use crate::election::{self, ElectionStatus, ValidatorDelta, ValidatorSet};
use crate::error::{LedgerError, LedgerResult};
use crate::parallel::ParallelValidator;
use crate::storage::{Block, PreCommitState, StorageAdapter};
use crate::transaction::{Operation, Transaction};

/// A validator-set change the ABI handler reports back to the BFT engine at
/// `end_block`, in the shape spec §6 describes: `{public_key: {type, value},
/// power}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorUpdate {
    pub public_key_type: String,
    pub public_key_value: String,
    pub power: u64,
}

impl ValidatorUpdate {
    fn from_delta(delta: &ValidatorDelta) -> Self {
        Self { public_key_type: "ed25519".to_string(), public_key_value: delta.public_key.clone(), power: delta.power }
    }
}

/// `code = 0` signals acceptance (spec §6). Non-zero is a domain-specific
/// rejection code; this core only distinguishes "accepted" from "rejected" and
/// always returns `ACCEPTED` from `check_tx`/`deliver_tx` per §4.F (actual
/// admission is deferred).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponseCode(pub u32);

impl ResponseCode {
    pub const ACCEPTED: ResponseCode = ResponseCode(0);
    pub const REJECTED: ResponseCode = ResponseCode(1);
}

/// What `end_block` returns to the BFT engine: the accepted transaction ids
/// (in delivered order, rejections removed) and any validator-set updates
/// produced by a concluding election.
#[derive(Debug, Default)]
pub struct EndBlockResult {
    pub accepted_transaction_ids: Vec<String>,
    pub validator_updates: Vec<ValidatorUpdate>,
}

/// Per-block accumulator the handler resets at `begin_block` (§4.F hook 1).
#[derive(Default)]
struct BlockAccumulator {
    height: u64,
    submitted: u64,
}

/// Implements the four ABI lifecycle hooks against a `StorageAdapter` and a
/// `ParallelValidator`.
pub struct AbiHandler {
    storage: Arc<dyn StorageAdapter>,
    validator: ParallelValidator,
    config: AbiHandlerConfig,
    block: BlockAccumulator,
    /// Transactions accepted by the last `end_block`, awaiting `commit`.
    pending_transactions: Vec<Transaction>,
}

impl AbiHandler {
    pub fn new(storage: Arc<dyn StorageAdapter>, worker_count: usize, config: AbiHandlerConfig) -> Self {
        let validator = ParallelValidator::new(Arc::clone(&storage), worker_count);
        Self {
            storage,
            validator,
            config,
            block: BlockAccumulator::default(),
            pending_transactions: Vec::new(),
        }
    }

    /// `check_tx`: mempool admission. Validates the raw transaction against
    /// committed storage with an empty in-block context and the validator set
    /// currently effective, but does not enqueue it for `deliver_tx` — the
    /// BFT engine's mempool calls this independently of block delivery
    /// (spec §2, §6).
    #[instrument(skip(self, raw))]
    pub fn check_tx(&self, raw: &[u8]) -> LedgerResult<ResponseCode> {
        let tx: Transaction = match serde_json::from_slice(raw) {
            Ok(tx) => tx,
            Err(err) => {
                debug!(%err, "check_tx: malformed transaction bytes");
                return Ok(ResponseCode::REJECTED);
            }
        };
        let validators = self.current_validator_set()?;
        match crate::validation::validate_transaction(&tx, self.storage.as_ref(), &[], &validators) {
            Ok(()) => Ok(ResponseCode::ACCEPTED),
            Err(err) => {
                debug!(tx_id = ?tx.id, %err, "check_tx: rejected");
                Ok(ResponseCode::REJECTED)
            }
        }
    }

    /// `begin_block`: reset the parallel validator and the block accumulator
    /// (§4.F hook 1).
    #[instrument(skip(self))]
    pub fn begin_block(&mut self, height: u64) {
        self.validator.reset();
        self.block = BlockAccumulator { height, submitted: 0 };
    }

    /// `deliver_tx`: submit to the parallel validator and always acknowledge
    /// `OK` — actual accept/reject is deferred to `end_block` because the
    /// validator is asynchronous (§4.F hook 2).
    #[instrument(skip(self, raw))]
    pub fn deliver_tx(&mut self, raw: &[u8]) -> LedgerResult<ResponseCode> {
        let validators = Arc::new(self.current_validator_set()?);
        self.validator.submit(raw, validators);
        self.block.submitted += 1;
        Ok(ResponseCode::ACCEPTED)
    }

    /// `end_block`: harvest results in submission order with a timeout; filter
    /// rejections; compute validator updates; write the pre-commit intent
    /// before returning (§4.F hook 3).
    #[instrument(skip(self))]
    pub fn end_block(&mut self) -> LedgerResult<EndBlockResult> {
        let results = self.validator.harvest(self.block.submitted, self.config.harvest_timeout)?;
        let accepted: Vec<Transaction> = results.into_iter().flatten().collect();

        let validator_updates = self.conclude_elections(&accepted)?;

        let accepted_transaction_ids: Vec<String> =
            accepted.iter().map(|tx| tx.id.clone().expect("accepted txs carry an id")).collect();

        self.storage.store_pre_commit_state(PreCommitState {
            height: self.block.height,
            transaction_ids: accepted_transaction_ids.clone(),
        })?;
        self.pending_transactions = accepted;

        Ok(EndBlockResult { accepted_transaction_ids, validator_updates })
    }

    /// `commit`: durably store the block and its transactions; return a
    /// deterministic `app_hash` (§4.F hook 4). Storage failures here are
    /// fatal — returning success to the BFT engine after a failed
    /// `store_block` would break the pre-commit reconciliation invariant
    /// (§7), so this propagates the error rather than swallowing it.
    #[instrument(skip(self))]
    pub fn commit(&mut self) -> LedgerResult<Vec<u8>> {
        let transactions = std::mem::take(&mut self.pending_transactions);
        let transaction_ids: Vec<String> =
            transactions.iter().map(|tx| tx.id.clone().expect("accepted txs carry an id")).collect();

        if let Err(err) = self.storage.store_transactions(&transactions) {
            error!(%err, "commit: failed to store transactions");
            return Err(err.into());
        }

        for tx in &transactions {
            let spender_id = tx.id.as_deref().expect("accepted txs carry an id");
            for input in &tx.inputs {
                if let Some(link) = &input.fulfills {
                    self.storage.mark_spent(link, spender_id)?;
                }
            }
        }

        let app_hash = compute_app_hash(&transaction_ids);
        let block = Block { height: self.block.height, transaction_ids, app_hash: app_hash.clone() };
        if let Err(err) = self.storage.store_block(block) {
            error!(%err, "commit: failed to store block");
            return Err(err.into());
        }
        info!(height = self.block.height, "block committed");
        Ok(app_hash)
    }

    fn current_validator_set(&self) -> LedgerResult<ValidatorSet> {
        Ok(self.storage.get_validators(self.block.height)?)
    }

    /// Detect a concluding election among this block's accepted votes, apply
    /// its delta, and write the resulting snapshot at `height + 1` (§4.E). An
    /// election initiated in an earlier block can conclude here: this scans
    /// `VALIDATOR_ELECTION_VOTE` transactions (not `VALIDATOR_ELECTION`
    /// transactions — the election itself may have been delivered many
    /// blocks ago), accumulating the running in-block vote tally per election
    /// id as it walks delivered order and fetching each vote's election
    /// transaction by id, the same streaming check
    /// `original_source/bigchaindb/upsert_validator/validator_election.py`'s
    /// `get_validator_update` performs. The election transaction itself may
    /// not yet be committed — an election proposed and voted through within
    /// this same block is still only in `accepted`, not yet in storage — so
    /// the lookup checks committed storage first and falls back to this
    /// block's own `accepted` transactions. Only the first concluding
    /// election in delivered order takes effect; later ones are suppressed
    /// for this block.
    fn conclude_elections(&self, accepted: &[Transaction]) -> LedgerResult<Vec<ValidatorUpdate>> {
        let current_height = self.block.height;
        let current_set = self.storage.get_validators(current_height)?;
        let total_power = current_set.total_power();

        let mut votes_by_election: HashMap<String, Vec<Transaction>> = HashMap::new();

        for tx in accepted {
            if tx.operation != Operation::ValidatorElectionVote {
                continue;
            }
            let Some(election_id) = tx.asset_id().map(str::to_string) else { continue };

            let votes_so_far = votes_by_election.entry(election_id.clone()).or_default();
            votes_so_far.push(tx.clone());

            let election_tx = match self.storage.get_transaction(&election_id)? {
                Some(tx) => tx,
                None => {
                    let Some(tx) = accepted
                        .iter()
                        .find(|tx| tx.operation == Operation::ValidatorElection && tx.id.as_deref() == Some(election_id.as_str()))
                    else {
                        continue;
                    };
                    tx.clone()
                }
            };
            if election_tx.operation != Operation::ValidatorElection {
                continue;
            }
            if !election::election_topology_matches(&election_tx, &current_set) {
                continue;
            }
            let delta = election::delta_from_election_tx(&election_tx)?;

            let already_committed = self.committed_vote_power(&election_id)?;
            let new_votes = self.in_block_vote_power(&election_id, votes_so_far)?;

            let was_short = 3 * u128::from(already_committed) < 2 * u128::from(total_power);
            let now_reached = election::has_supermajority(already_committed + new_votes, total_power);

            if was_short && now_reached {
                let mut new_set = current_set.clone();
                new_set.apply_delta(&delta);
                self.storage.store_validator_set(current_height + 1, new_set, Some(election_id))?;
                info!(node = %delta.node_id, power = delta.power, "validator election concluded");
                return Ok(vec![ValidatorUpdate::from_delta(&delta)]);
            }
        }
        Ok(Vec::new())
    }

    /// Committed voting power already cast for `election_id`, counting only
    /// outputs whose sole recipient is the election's deterministic public
    /// key (spec §4.E — "no multi-key outputs"). Queries committed storage
    /// only; votes accepted in the block currently being finalized are not
    /// yet committed, so they never double-count here.
    fn committed_vote_power(&self, election_id: &str) -> LedgerResult<u64> {
        let election_pk = crypto::election_public_key(election_id)
            .map_err(|e| LedgerError::Config(format!("invalid election id `{election_id}`: {e}")))?;
        let votes = self.storage.get_transactions_by_asset_id(election_id)?;
        Ok(sum_vote_power(&votes, &election_pk))
    }

    /// Voting power cast for `election_id` among this block's accepted votes
    /// seen so far (spec §4.E `new_votes_in_this_block`).
    fn in_block_vote_power(&self, election_id: &str, votes_so_far: &[Transaction]) -> LedgerResult<u64> {
        let election_pk = crypto::election_public_key(election_id)
            .map_err(|e| LedgerError::Config(format!("invalid election id `{election_id}`: {e}")))?;
        Ok(sum_vote_power(votes_so_far, &election_pk))
    }

    /// Query an election's status (spec §4.E "Status query").
    pub fn election_status(&self, election_id: &str) -> LedgerResult<ElectionStatus> {
        if self.storage.get_validators_by_election_id(election_id)?.is_some() {
            return Ok(ElectionStatus::Concluded);
        }
        let election_height = self.storage.get_block_containing_tx(election_id)?;
        let Some(election_height) = election_height else {
            return Ok(ElectionStatus::Ongoing);
        };
        let latest_change_height = self.storage.latest_validator_set_height()?;
        if latest_change_height < election_height {
            Ok(ElectionStatus::Ongoing)
        } else {
            Ok(ElectionStatus::Inconclusive)
        }
    }
}

fn sum_vote_power(votes: &[Transaction], election_pk: &str) -> u64 {
    votes
        .iter()
        .filter(|tx| tx.operation == Operation::ValidatorElectionVote)
        .flat_map(|tx| tx.outputs.iter())
        .filter(|output| output.public_keys == vec![election_pk.to_string()])
        .map(|output| output.amount)
        .sum()
}

/// A deterministic hash chain over the block's accepted transaction ids.
/// Spec §4.F requires only determinism, not a specific shape (Merkle root or
/// hash chain); a chain is the simplest faithful choice and reuses the same
/// SHA3-256 primitive the transaction model hashes with.
fn compute_app_hash(transaction_ids: &[String]) -> Vec<u8> {
    let joined = transaction_ids.join(",");
    hex::decode(crypto::sha3_256_hex(joined.as_bytes())).expect("sha3_256_hex always yields valid hex")
}

/// Crash-recovery reconciliation (§4.F "Recovery", §7).
///
/// Run once at process start, before the ABI loop is served:
/// - no pre-commit record: nothing to do.
/// - `pre_commit.height > latest_block.height`: the node crashed between
///   `end_block` and `commit`; delete the pre-commit's transactions so the
///   BFT engine's re-delivery of that block does not fail on duplicate ids.
/// - otherwise: consistent, no action.
#[instrument(skip(storage))]
pub fn recover(storage: &dyn StorageAdapter) -> LedgerResult<()> {
    let Some(pre_commit) = storage.get_pre_commit_state()? else {
        debug!("recovery: no pre-commit record, nothing to do");
        return Ok(());
    };
    let latest_height = storage.get_latest_block()?.map(|b| b.height);

    let crashed_mid_commit = match latest_height {
        Some(height) => pre_commit.height > height,
        None => true,
    };

    if crashed_mid_commit {
        warn!(
            height = pre_commit.height,
            tx_count = pre_commit.transaction_ids.len(),
            "recovery: pre-commit height exceeds latest committed block; deleting its transactions"
        );
        storage.delete_transactions(&pre_commit.transaction_ids)?;
    } else {
        debug!(
            pre_commit_height = pre_commit.height,
            latest_height = ?latest_height,
            "recovery: pre-commit is consistent with committed state"
        );
    }
    Ok(())
}
