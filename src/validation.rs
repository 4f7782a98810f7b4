//! Single-transaction validation engine (§4.C, §4.E).
//!
//! `validate_transaction` is the sequential ruleset every transaction in a block
//! is run through, whether it executes inline (a worker's local call) or as part
//! of a simulated check (a future `check_tx` mempool path). It never touches a
//! worker channel or a block accumulator; those live in `crate::parallel` and
//! `crate::abi` respectively, the same separation
//! `StatelessTransactionValidator`/`StatefulTransactionValidator` keep from the
//! gateway that drives them.

use crate::election::{self, ValidatorDelta, ValidatorSet};
use crate::error::{ValidationError, ValidationResult};
use crate::storage::StorageAdapter;
use crate::transaction::{Operation, OutputLink, Transaction};

/// Validate `tx` against committed `storage` plus `context` — the transactions
/// of the same block already accepted ahead of it (spec §4.C). `validators` is
/// the validator set effective for the block being validated (fixed for the
/// whole block; election conclusions only take effect at the next height,
/// §4.E).
///
/// Checks run in the order spec §4.C lists them; the first failure short-circuits
/// the rest.
pub fn validate_transaction(
    tx: &Transaction,
    storage: &dyn StorageAdapter,
    context: &[Transaction],
    validators: &ValidatorSet,
) -> ValidationResult<()> {
    tx.validate_schema()?;

    if !tx.id_is_valid() {
        return Err(ValidationError::SchemaError("transaction id does not match its canonical hash".into()));
    }

    let tx_id = tx.id.as_deref().expect("id_is_valid implies id is Some");
    check_not_duplicate(tx_id, storage, context)?;

    for input in &tx.inputs {
        if let Some(link) = &input.fulfills {
            check_input_resolves(link, input.owners_before.as_slice(), storage, context)?;
        }
    }

    tx.verify_fulfillments()?;

    if matches!(tx.operation, Operation::Transfer | Operation::ValidatorElectionVote) {
        check_amount_conservation(tx, storage, context)?;
    }

    if tx.operation == Operation::ValidatorElection {
        validate_election_rules(tx, validators)?;
    }

    Ok(())
}

/// §4.C check 3: absent from committed storage and not present among the
/// transactions already accepted in this block.
fn check_not_duplicate(tx_id: &str, storage: &dyn StorageAdapter, context: &[Transaction]) -> ValidationResult<()> {
    if storage.get_transaction(tx_id)?.is_some() {
        return Err(ValidationError::DuplicateTransaction(tx_id.to_string()));
    }
    if context.iter().any(|t| t.id.as_deref() == Some(tx_id)) {
        return Err(ValidationError::DuplicateTransaction(tx_id.to_string()));
    }
    Ok(())
}

/// §4.C check 4: the referenced output must exist (committed, or produced
/// earlier in this block) and must not already be spent (committed, or
/// consumed by another transaction in this block); the input's declared
/// `owners_before` must match the referenced output's recipients.
fn check_input_resolves(
    link: &OutputLink,
    owners_before: &[String],
    storage: &dyn StorageAdapter,
    context: &[Transaction],
) -> ValidationResult<()> {
    let recipients = resolve_output_recipients(link, storage, context).ok_or_else(|| {
        ValidationError::MissingInput { tx_id: link.transaction_id.clone(), output_index: link.output_index }
    })?;

    let mut expected = recipients.clone();
    let mut actual = owners_before.to_vec();
    expected.sort();
    actual.sort();
    if expected != actual {
        return Err(ValidationError::InvalidSignature);
    }

    if storage.is_spent(link)? {
        return Err(ValidationError::DoubleSpend {
            tx_id: link.transaction_id.clone(),
            output_index: link.output_index,
        });
    }
    let spent_in_context = context.iter().any(|t| {
        t.inputs.iter().any(|i| i.fulfills.as_ref() == Some(link))
    });
    if spent_in_context {
        return Err(ValidationError::DoubleSpend {
            tx_id: link.transaction_id.clone(),
            output_index: link.output_index,
        });
    }
    Ok(())
}

fn resolve_output_recipients(
    link: &OutputLink,
    storage: &dyn StorageAdapter,
    context: &[Transaction],
) -> Option<Vec<String>> {
    if let Some(tx) = context.iter().find(|t| t.id.as_deref() == Some(link.transaction_id.as_str())) {
        return tx.outputs.get(link.output_index as usize).map(|o| o.public_keys.clone());
    }
    storage.get_output_recipients(link).ok().flatten()
}

fn resolve_output_amount(link: &OutputLink, storage: &dyn StorageAdapter, context: &[Transaction]) -> Option<u64> {
    if let Some(tx) = context.iter().find(|t| t.id.as_deref() == Some(link.transaction_id.as_str())) {
        return tx.outputs.get(link.output_index as usize).map(|o| o.amount);
    }
    storage.get_output_amount(link).ok().flatten()
}

/// §4.C check 6: sum of input amounts equals sum of output amounts.
fn check_amount_conservation(
    tx: &Transaction,
    storage: &dyn StorageAdapter,
    context: &[Transaction],
) -> ValidationResult<()> {
    let total_in = tx.total_input_amount(|link| resolve_output_amount(link, storage, context));
    let total_out = tx.total_output_amount();
    if total_in != total_out {
        return Err(ValidationError::AmountMismatch { inputs: total_in, outputs: total_out });
    }
    Ok(())
}

/// §4.E validation rules, applied in addition to the common checks above.
fn validate_election_rules(tx: &Transaction, validators: &ValidatorSet) -> ValidationResult<()> {
    let input = tx.inputs.first().ok_or(ValidationError::MultipleInputsError)?;
    if tx.inputs.len() != 1 || input.owners_before.len() != 1 {
        return Err(ValidationError::MultipleInputsError);
    }
    let proposer = &input.owners_before[0];
    if !validators.contains(proposer) {
        return Err(ValidationError::InvalidProposer);
    }

    let delta: ValidatorDelta = election::delta_from_election_tx(tx)?;
    election::validate_election_power_change(validators, &delta)?;

    if !election::election_topology_matches(tx, validators) {
        return Err(ValidationError::UnequalValidatorSet);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::Validator;
    use crate::storage::InMemoryStorage;
    use crate::transaction::TransactionBuilder;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn keypair() -> (SigningKey, String) {
        let key = SigningKey::generate(&mut OsRng);
        (key.clone(), crate::crypto::encode_public_key(&key.verifying_key()))
    }

    fn create(pk: &str, key: &SigningKey, amount: u64) -> Transaction {
        let mut tx = TransactionBuilder::create(pk.to_string(), serde_json::json!({"n": 1}))
            .with_output(amount, vec![pk.to_string()])
            .build_unsigned();
        tx.sign_input(0, &[key.clone()]).unwrap();
        tx.finalize()
    }

    #[test]
    fn accepts_a_well_formed_create() {
        let storage = InMemoryStorage::new();
        let (key, pk) = keypair();
        let tx = create(&pk, &key, 10);
        let result = validate_transaction(&tx, &storage, &[], &ValidatorSet::default());
        assert!(result.is_ok(), "{result:?}");
    }

    #[test]
    fn rejects_duplicate_against_committed_storage() {
        let storage = InMemoryStorage::new();
        let (key, pk) = keypair();
        let tx = create(&pk, &key, 10);
        storage.store_transactions(&[tx.clone()]).unwrap();
        let result = validate_transaction(&tx, &storage, &[], &ValidatorSet::default());
        assert_eq!(result, Err(ValidationError::DuplicateTransaction(tx.id.clone().unwrap())));
    }

    #[test]
    fn transfer_spending_create_in_same_block_context_is_accepted() {
        let storage = InMemoryStorage::new();
        let (key, pk) = keypair();
        let create_tx = create(&pk, &key, 10);
        let create_id = create_tx.id.clone().unwrap();

        let link = OutputLink { transaction_id: create_id.clone(), output_index: 0 };
        let mut transfer = TransactionBuilder::transfer(
            create_id.clone(),
            vec![crate::transaction::Input::new_unsigned(Some(link), vec![pk.clone()])],
        )
        .with_output(10, vec![pk.clone()])
        .build_unsigned();
        transfer.sign_input(0, &[key.clone()]).unwrap();
        let transfer = transfer.finalize();

        let context = vec![create_tx];
        let result = validate_transaction(&transfer, &storage, &context, &ValidatorSet::default());
        assert!(result.is_ok(), "{result:?}");
    }

    #[test]
    fn double_spend_within_context_is_rejected() {
        let storage = InMemoryStorage::new();
        let (key, pk) = keypair();
        let create_tx = create(&pk, &key, 10);
        let create_id = create_tx.id.clone().unwrap();
        let link = OutputLink { transaction_id: create_id.clone(), output_index: 0 };

        let mut first = TransactionBuilder::transfer(
            create_id.clone(),
            vec![crate::transaction::Input::new_unsigned(Some(link.clone()), vec![pk.clone()])],
        )
        .with_output(10, vec![pk.clone()])
        .build_unsigned();
        first.sign_input(0, &[key.clone()]).unwrap();
        let first = first.finalize();

        let mut second = TransactionBuilder::transfer(
            create_id,
            vec![crate::transaction::Input::new_unsigned(Some(link), vec![pk.clone()])],
        )
        .with_output(10, vec![pk.clone()])
        .build_unsigned();
        second.sign_input(0, &[key]).unwrap();
        let second = second.finalize();

        let context = vec![create_tx, first];
        let result = validate_transaction(&second, &storage, &context, &ValidatorSet::default());
        assert!(matches!(result, Err(ValidationError::DoubleSpend { .. })));
    }

    #[test]
    fn election_rejects_proposer_who_is_not_a_current_validator() {
        let storage = InMemoryStorage::new();
        let (key, pk) = keypair();
        let (_other_key, other_pk) = keypair();
        let validators = ValidatorSet::new(vec![Validator {
            public_key: other_pk,
            power: 10,
            node_id: "n0".into(),
        }]);

        let mut tx = TransactionBuilder::validator_election(
            pk.clone(),
            serde_json::json!({"public_key": "new", "power": 1, "node_id": "n1"}),
        )
        .with_output(10, vec![validators.iter().next().unwrap().public_key.clone()])
        .build_unsigned();
        tx.sign_input(0, &[key]).unwrap();
        let tx = tx.finalize();

        let result = validate_transaction(&tx, &storage, &[], &validators);
        assert_eq!(result, Err(ValidationError::InvalidProposer));
    }
}
