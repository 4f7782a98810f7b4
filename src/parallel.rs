//! Parallel transaction validator (§4.D).
//!
//! A pool of `W` worker threads validates a block's transactions concurrently
//! while preserving submission order in the result and respecting intra-block
//! causal dependencies for the common self-chained case. Workers communicate
//! with the coordinator purely by message passing over bounded
//! `crossbeam_channel`s — no shared mutable state between them, per §5.
//!
//! Routing is by `tx.id` for every operation, per spec §9's closing note that
//! this behavior ("the in-worker context is an optimization; cross-worker
//! dependencies are resolved by falling through to storage-backed checks") is
//! the canonical contract — this crate does not take the alternative of
//! routing TRANSFER/VOTE by `asset.id` instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::election::ValidatorSet;
use crate::error::LedgerError;
use crate::storage::StorageAdapter;
use crate::transaction::Transaction;
use crate::validation;

const WORKER_CHANNEL_CAPACITY: usize = 4096;

enum WorkerMessage {
    Validate { submission_index: u64, tx: Transaction, validators: Arc<ValidatorSet> },
    Reset,
    Stop,
}

/// `worker_index = parse_hex(tx.id) mod worker_count` (spec §4.D), computed
/// digit-by-digit (Horner's method) so arbitrarily long hex ids never overflow
/// a machine integer; non-hex characters contribute zero, which only matters
/// for malformed ids that would already be rejected by `id_is_valid`.
pub fn worker_index_for(tx_id: &str, worker_count: usize) -> usize {
    debug_assert!(worker_count > 0, "a pool must have at least one worker");
    tx_id.chars().fold(0usize, |acc, c| {
        let digit = c.to_digit(16).unwrap_or(0) as usize;
        (acc * 16 + digit) % worker_count.max(1)
    })
}

fn worker_loop(
    receiver: Receiver<WorkerMessage>,
    result_tx: Sender<(u64, Option<Transaction>)>,
    storage: Arc<dyn StorageAdapter>,
) {
    let mut context: HashMap<String, Vec<Transaction>> = HashMap::new();
    loop {
        match receiver.recv() {
            Ok(WorkerMessage::Validate { submission_index, tx, validators }) => {
                let asset_id = tx.asset_id().unwrap_or_default().to_string();
                let local_context = context.get(&asset_id).cloned().unwrap_or_default();
                let outcome = validation::validate_transaction(&tx, storage.as_ref(), &local_context, &validators);
                let accepted = match outcome {
                    Ok(()) => {
                        context.entry(asset_id).or_default().push(tx.clone());
                        Some(tx)
                    }
                    Err(err) => {
                        debug!(tx_id = ?tx.id, submission_index, error = %err, "transaction rejected");
                        None
                    }
                };
                if result_tx.send((submission_index, accepted)).is_err() {
                    break;
                }
            }
            Ok(WorkerMessage::Reset) => context.clear(),
            Ok(WorkerMessage::Stop) | Err(_) => break,
        }
    }
}

/// Fan-out/fan-in validator coordinator (§4.D). Owns a fixed pool of worker
/// threads for its lifetime; `begin_block`/`end_block` drive submission and
/// harvesting per block, `Drop` sends `STOP` and joins the threads.
pub struct ParallelValidator {
    senders: Vec<Sender<WorkerMessage>>,
    result_rx: Receiver<(u64, Option<Transaction>)>,
    result_tx: Sender<(u64, Option<Transaction>)>,
    handles: Vec<JoinHandle<()>>,
    worker_count: usize,
    next_submission_index: u64,
    /// Decode failures resolved locally by the coordinator (malformed raw
    /// bytes never reach a worker, since there is no `tx.id` to route on).
    local_rejections: Vec<(u64, Option<Transaction>)>,
}

impl ParallelValidator {
    pub fn new(storage: Arc<dyn StorageAdapter>, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (result_tx, result_rx) = bounded(WORKER_CHANNEL_CAPACITY * worker_count);
        let mut senders = Vec::with_capacity(worker_count);
        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let (tx, rx) = bounded(WORKER_CHANNEL_CAPACITY);
            let result_tx = result_tx.clone();
            let storage = Arc::clone(&storage);
            handles.push(std::thread::spawn(move || worker_loop(rx, result_tx, storage)));
            senders.push(tx);
        }
        Self {
            senders,
            result_rx,
            result_tx,
            handles,
            worker_count,
            next_submission_index: 0,
            local_rejections: Vec::new(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Reset per-worker context and the submission counter — called at
    /// `begin_block` (§4.F hook 1) and again after harvesting a block's
    /// results (§4.D round boundary); idempotent either way.
    pub fn reset(&mut self) {
        for sender in &self.senders {
            let _ = sender.send(WorkerMessage::Reset);
        }
        self.next_submission_index = 0;
        self.local_rejections.clear();
    }

    /// Decode and route `raw` to a worker, tagging it with the next
    /// monotonically increasing submission index (spec §4.D). Returns the
    /// assigned index.
    pub fn submit(&mut self, raw: &[u8], validators: Arc<ValidatorSet>) -> u64 {
        let submission_index = self.next_submission_index;
        self.next_submission_index += 1;
        match serde_json::from_slice::<Transaction>(raw) {
            Ok(tx) => {
                let worker = worker_index_for(tx.id.as_deref().unwrap_or(""), self.worker_count);
                if self.senders[worker]
                    .send(WorkerMessage::Validate { submission_index, tx, validators })
                    .is_err()
                {
                    warn!("worker channel closed; rejecting submission {submission_index}");
                    self.local_rejections.push((submission_index, None));
                }
            }
            Err(_) => self.local_rejections.push((submission_index, None)),
        }
        submission_index
    }

    /// Harvest exactly `expected` results (the number of calls made to
    /// `submit` since the last reset) in submission order, blocking on the
    /// shared result channel with `timeout` (spec §5). On timeout, returns
    /// `LedgerError::HarvestTimeout` and leaves `reset` uncalled — the caller
    /// (the ABI handler) must not write a pre-commit record in that case.
    pub fn harvest(&mut self, expected: u64, timeout: Duration) -> Result<Vec<Option<Transaction>>, LedgerError> {
        let expected = expected as usize;
        let mut slots: Vec<Option<Transaction>> = vec![None; expected];
        let mut filled = vec![false; expected];

        for (index, tx) in self.local_rejections.drain(..) {
            slots[index as usize] = tx;
            filled[index as usize] = true;
        }

        let remaining = filled.iter().filter(|f| !**f).count();
        let deadline = Instant::now() + timeout;
        for _ in 0..remaining {
            let now = Instant::now();
            if now >= deadline {
                return Err(LedgerError::HarvestTimeout(timeout));
            }
            match self.result_rx.recv_timeout(deadline - now) {
                Ok((index, tx)) => {
                    slots[index as usize] = tx;
                    filled[index as usize] = true;
                }
                Err(_) => return Err(LedgerError::HarvestTimeout(timeout)),
            }
        }

        self.reset();
        Ok(slots)
    }
}

impl Drop for ParallelValidator {
    fn drop(&mut self) {
        for sender in &self.senders {
            let _ = sender.send(WorkerMessage::Stop);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        // `result_tx` is never read again after this; dropping it alongside the
        // senders lets any worker mid-send observe a closed channel and exit.
        let _ = &self.result_tx;
    }
}
