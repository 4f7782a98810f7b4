//! Validator-set elections (spec §4.E).
//!
//! A `VALIDATOR_ELECTION` transaction proposes a single change to the validator
//! topology (add, update, or remove one validator's voting power). Current
//! validators then cast `VALIDATOR_ELECTION_VOTE` transfers to the election's
//! derived public key; once votes carrying more than two thirds of total power
//! have accumulated, the election concludes and its delta is applied at the next
//! block boundary (§4.E, §6).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::error::ValidationError;
use crate::transaction::{Asset, Operation, Transaction};

/// A single validator's identity and voting power.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub public_key: String,
    pub power: u64,
    pub node_id: String,
}

/// The current validator topology, keyed by public key for deterministic
/// iteration order (mirrors the canonical-serialization discipline used for
/// transactions: a `BTreeMap` removes any dependence on insertion order).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    validators: BTreeMap<String, Validator>,
}

impl ValidatorSet {
    pub fn new(validators: Vec<Validator>) -> Self {
        Self { validators: validators.into_iter().map(|v| (v.public_key.clone(), v)).collect() }
    }

    pub fn total_power(&self) -> u64 {
        self.validators.values().map(|v| v.power).sum()
    }

    pub fn contains(&self, public_key: &str) -> bool {
        self.validators.contains_key(public_key)
    }

    pub fn power_of(&self, public_key: &str) -> u64 {
        self.validators.get(public_key).map(|v| v.power).unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Validator> {
        self.validators.values()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Apply a concluded election's delta: insert a new validator, update an
    /// existing one's power, or remove a validator whose power is driven to zero
    /// (§4.E).
    pub fn apply_delta(&mut self, delta: &ValidatorDelta) {
        match delta.power {
            0 => {
                self.validators.remove(&delta.public_key);
            }
            power => {
                self.validators.insert(
                    delta.public_key.clone(),
                    Validator { public_key: delta.public_key.clone(), power, node_id: delta.node_id.clone() },
                );
            }
        }
    }
}

/// The change a `VALIDATOR_ELECTION` proposes: set `public_key`'s power to
/// `power` (zero meaning "remove").
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorDelta {
    pub public_key: String,
    pub power: u64,
    pub node_id: String,
}

/// An election proposal must request a (non-negative) `power` strictly less
/// than one third of total power, reformulated as integer arithmetic to avoid
/// floating-point rounding: `3 * power < total_power` (equivalent to
/// `power < total_power / 3`, spec §4.E, §8 boundary case). This checks the
/// proposed `power` value itself, not its difference from the node's current
/// power — `original_source/`'s `validator_election.py` bounds
/// `asset['data']['power']` directly against `(1/3) * total_power`, with no
/// subtraction of the node's existing power, so a removal (`power = 0`) is
/// always within bound regardless of the validator's current weight.
pub fn validate_election_power_change(
    current_set: &ValidatorSet,
    delta: &ValidatorDelta,
) -> Result<(), ValidationError> {
    let total_power = current_set.total_power();
    if 3 * delta.power >= total_power {
        return Err(ValidationError::InvalidPowerChange { requested: delta.power, total: total_power });
    }
    Ok(())
}

/// A supermajority has been reached once committed voting power is at least
/// two thirds of total power: `3 * committed >= 2 * total` (spec §4.E,
/// `original_source/`'s `votes_commited + votes_current >= (2/3)*total_votes`).
pub fn has_supermajority(committed_power: u64, total_power: u64) -> bool {
    3 * u128::from(committed_power) >= 2 * u128::from(total_power)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElectionStatus {
    Ongoing,
    Concluded,
    Inconclusive,
}

/// Tracks votes cast for one election in progress.
#[derive(Clone, Debug, Default)]
pub struct ElectionTally {
    /// Public keys that have already voted, so a second vote from the same
    /// validator cannot be double-counted.
    voted: BTreeMap<String, u64>,
}

impl ElectionTally {
    pub fn record_vote(&mut self, voter_public_key: String, power: u64) {
        self.voted.entry(voter_public_key).or_insert(power);
    }

    pub fn committed_power(&self) -> u64 {
        self.voted.values().sum()
    }

    pub fn status(&self, total_power: u64) -> ElectionStatus {
        if has_supermajority(self.committed_power(), total_power) {
            ElectionStatus::Concluded
        } else {
            ElectionStatus::Ongoing
        }
    }
}

/// The deterministic public key votes for election `election_id` must transfer
/// to: `base58(hex_decode(election_id))` (spec §4.E, §6).
pub fn election_public_key(election_id: &str) -> Result<String, String> {
    crypto::election_public_key(election_id)
}

/// Whether a `VALIDATOR_ELECTION` transaction's outputs still exactly match
/// `current_set`'s topology — one output per validator, amount equal to its
/// voting power, no other recipients (spec §4.E conclusion rule, condition 1).
/// If the topology has shifted since the election was initiated, it can never
/// conclude and is reported `INCONCLUSIVE` instead.
pub fn election_topology_matches(election_tx: &Transaction, current_set: &ValidatorSet) -> bool {
    if election_tx.outputs.len() != current_set.len() {
        return false;
    }
    current_set.iter().all(|validator| {
        election_tx
            .outputs
            .iter()
            .any(|o| o.amount == validator.power && o.public_keys == vec![validator.public_key.clone()])
    })
}

/// Extract the proposed delta from a `VALIDATOR_ELECTION` transaction's asset
/// data. Schema validation (`Transaction::validate_schema`) already guarantees
/// the required fields are present; this only parses their values.
pub fn delta_from_election_tx(tx: &Transaction) -> Result<ValidatorDelta, ValidationError> {
    debug_assert_eq!(tx.operation, Operation::ValidatorElection);
    let Asset::Data(data) = &tx.asset else {
        return Err(ValidationError::SchemaError("election transaction missing asset.data".into()));
    };
    let public_key = data
        .get("public_key")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ValidationError::SchemaError("election asset.data.public_key missing".into()))?
        .to_string();
    let power = data
        .get("power")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| ValidationError::SchemaError("election asset.data.power missing".into()))?;
    let node_id = data
        .get("node_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ValidationError::SchemaError("election asset.data.node_id missing".into()))?
        .to_string();
    Ok(ValidatorDelta { public_key, power, node_id })
}
