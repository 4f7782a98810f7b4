//! CLI surface (spec §6, §9).
//!
//! The command set (`configure`, `show-config`, `init`, `drop`, `start`,
//! `upsert-validator {new,approve,show}`) is exposed as a typed `clap` enum
//! rather than a string-keyed dispatch table (spec §9 "Dynamic dispatch by
//! string" redesign note). Only `start` and the three `upsert-validator`
//! actions touch the hard core; the others manage the ambient configuration
//! file and the reference storage backend, both external-collaborator
//! concerns per §1.
//!
//! `upsert-validator` constructs and signs election/vote transactions via a
//! "normal client path" (spec §6): since the ABI socket transport is an
//! explicit Non-goal, these subcommands read the state a live client would
//! otherwise fetch over that transport (the current validator set, or the
//! election transaction being voted on) from a JSON file and print the signed
//! transaction to stdout, ready for an external transport to submit.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use ed25519_dalek::SigningKey;
use serde_json::Value;
use tracing::info;

use crate::config::NodeConfig;
use crate::election::{self, ElectionStatus, Validator, ValidatorSet};
use crate::error::{LedgerError, LedgerResult};
use crate::transaction::{Input, OutputLink, Transaction, TransactionBuilder};

#[derive(Debug, Parser)]
#[command(name = "ledger-node", about = "Permissioned BFT-replicated transaction ledger node")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Write a default configuration file.
    Configure(ConfigPathArgs),
    /// Print the effective configuration.
    ShowConfig(ConfigPathArgs),
    /// Initialize the storage backend (a no-op for the in-memory reference
    /// backend, which never outlives the process).
    Init(ConfigPathArgs),
    /// Drop the storage backend (a no-op for the in-memory reference
    /// backend).
    Drop(ConfigPathArgs),
    /// Run crash recovery and start serving the ABI handler.
    Start(ConfigPathArgs),
    /// Construct, sign, and print validator-election transactions.
    UpsertValidator {
        #[command(subcommand)]
        action: UpsertValidatorAction,
    },
}

#[derive(Debug, Args)]
pub struct ConfigPathArgs {
    /// Path to the node's TOML configuration file.
    #[arg(long, default_value = "ledger-node.toml")]
    pub config: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum UpsertValidatorAction {
    /// Propose a validator-set change.
    New {
        /// Hex-encoded 32-byte Ed25519 seed for the initiating validator.
        #[arg(long)]
        signing_key_file: PathBuf,
        /// JSON array of `{public_key, power, node_id}` describing the
        /// validator set currently in effect.
        #[arg(long)]
        validators_file: PathBuf,
        /// Public key of the node whose power is being changed.
        #[arg(long)]
        candidate_public_key: String,
        /// Requested new voting power (0 removes the node).
        #[arg(long)]
        power: u64,
        #[arg(long)]
        node_id: String,
    },
    /// Cast a vote on an in-progress election.
    Approve {
        /// Hex-encoded 32-byte Ed25519 seed for the voting validator.
        #[arg(long)]
        signing_key_file: PathBuf,
        /// Path to the JSON-serialized `VALIDATOR_ELECTION` transaction being
        /// voted on.
        #[arg(long)]
        election_tx_file: PathBuf,
    },
    /// Report an election's status given a local snapshot of its votes and
    /// the validator set effective when it was initiated.
    Show {
        #[arg(long)]
        election_tx_file: PathBuf,
        /// JSON array of `VALIDATOR_ELECTION_VOTE` transactions committed so
        /// far against this election.
        #[arg(long)]
        votes_file: PathBuf,
        #[arg(long)]
        validators_file: PathBuf,
    },
}

fn load_signing_key(path: &Path) -> LedgerResult<SigningKey> {
    let hex_seed = fs::read_to_string(path)
        .map_err(|e| LedgerError::Config(format!("failed to read {}: {e}", path.display())))?;
    let bytes = hex::decode(hex_seed.trim())
        .map_err(|e| LedgerError::Config(format!("{} is not valid hex: {e}", path.display())))?;
    let seed: [u8; 32] = bytes
        .try_into()
        .map_err(|_| LedgerError::Config(format!("{} must contain a 32-byte seed", path.display())))?;
    Ok(SigningKey::from_bytes(&seed))
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> LedgerResult<T> {
    let contents = fs::read_to_string(path)
        .map_err(|e| LedgerError::Config(format!("failed to read {}: {e}", path.display())))?;
    serde_json::from_str(&contents)
        .map_err(|e| LedgerError::Config(format!("failed to parse {}: {e}", path.display())))
}

fn print_transaction(label: &str, tx: &Transaction) -> LedgerResult<()> {
    let rendered = serde_json::to_string_pretty(tx)
        .map_err(|e| LedgerError::Config(format!("failed to render transaction: {e}")))?;
    println!("{rendered}");
    info!(tx_id = ?tx.id, "{label} ready for submission");
    Ok(())
}

pub fn configure(args: &ConfigPathArgs) -> LedgerResult<()> {
    let rendered = toml::to_string_pretty(&NodeConfig::default())
        .map_err(|e| LedgerError::Config(format!("failed to render default config: {e}")))?;
    fs::write(&args.config, rendered)
        .map_err(|e| LedgerError::Config(format!("failed to write {}: {e}", args.config.display())))?;
    info!(path = %args.config.display(), "wrote default configuration");
    Ok(())
}

pub fn show_config(args: &ConfigPathArgs) -> LedgerResult<()> {
    let config = NodeConfig::load(&args.config)?;
    let rendered = toml::to_string_pretty(&config)
        .map_err(|e| LedgerError::Config(format!("failed to render config: {e}")))?;
    println!("{rendered}");
    Ok(())
}

pub fn init(_args: &ConfigPathArgs) -> LedgerResult<()> {
    info!("the in-memory reference storage backend has nothing to initialize on disk");
    Ok(())
}

pub fn drop_storage(_args: &ConfigPathArgs) -> LedgerResult<()> {
    info!("the in-memory reference storage backend has nothing to drop on disk");
    Ok(())
}

/// `upsert-validator new` (spec §4.E "Initiating an election"). Builds the
/// voter topology — one output per current validator, `amount = power` — and
/// signs the initiator's single input.
pub fn upsert_validator_new(
    signing_key_file: &Path,
    validators_file: &Path,
    candidate_public_key: &str,
    power: u64,
    node_id: &str,
) -> LedgerResult<()> {
    let key = load_signing_key(signing_key_file)?;
    let initiator_public_key = crate::crypto::encode_public_key(&key.verifying_key());
    let validators: Vec<Validator> = load_json(validators_file)?;
    let validator_set = ValidatorSet::new(validators);

    let delta = election::ValidatorDelta {
        public_key: candidate_public_key.to_string(),
        power,
        node_id: node_id.to_string(),
    };
    election::validate_election_power_change(&validator_set, &delta)
        .map_err(|e| LedgerError::Config(format!("election rejected: {e}")))?;
    if !validator_set.contains(&initiator_public_key) {
        return Err(LedgerError::Config(
            "initiator is not a member of the current validator set".into(),
        ));
    }

    let asset_data: Value =
        serde_json::json!({"public_key": candidate_public_key, "power": power, "node_id": node_id});
    let mut builder = TransactionBuilder::validator_election(initiator_public_key, asset_data);
    for validator in validator_set.iter() {
        builder = builder.with_output(validator.power, vec![validator.public_key.clone()]);
    }
    let mut tx = builder.build_unsigned();
    tx.sign_input(0, &[key])
        .map_err(|e| LedgerError::Config(format!("failed to sign election transaction: {e}")))?;
    print_transaction("election", &tx.finalize())
}

/// `upsert-validator approve` (spec §4.E "Voting"). Spends the voter's own
/// election-topology output, directing it to the deterministic election
/// public key.
pub fn upsert_validator_approve(signing_key_file: &Path, election_tx_file: &Path) -> LedgerResult<()> {
    let key = load_signing_key(signing_key_file)?;
    let voter_public_key = crate::crypto::encode_public_key(&key.verifying_key());
    let election_tx: Transaction = load_json(election_tx_file)?;
    let election_id = election_tx
        .id
        .clone()
        .ok_or_else(|| LedgerError::Config("election transaction file has no id".into()))?;

    let output_index = election_tx
        .outputs
        .iter()
        .position(|o| o.public_keys == vec![voter_public_key.clone()])
        .ok_or_else(|| LedgerError::Config("voter has no output in this election's topology".into()))?;
    let output = &election_tx.outputs[output_index];

    let election_pk = election::election_public_key(&election_id)
        .map_err(|e| LedgerError::Config(format!("invalid election id: {e}")))?;

    let link = OutputLink { transaction_id: election_id.clone(), output_index: output_index as u32 };
    let input = Input::new_unsigned(Some(link), vec![voter_public_key]);
    let mut tx = TransactionBuilder::validator_election_vote(election_id, vec![input])
        .with_output(output.amount, vec![election_pk])
        .build_unsigned();
    tx.sign_input(0, &[key])
        .map_err(|e| LedgerError::Config(format!("failed to sign vote transaction: {e}")))?;
    print_transaction("vote", &tx.finalize())
}

/// `upsert-validator show` (spec §4.E "Status query"), computed purely from a
/// locally supplied snapshot rather than a live query, since the ABI
/// transport is out of scope (spec §1, §6).
pub fn upsert_validator_show(
    election_tx_file: &Path,
    votes_file: &Path,
    validators_file: &Path,
) -> LedgerResult<()> {
    let election_tx: Transaction = load_json(election_tx_file)?;
    let votes: Vec<Transaction> = load_json(votes_file)?;
    let validators: Vec<Validator> = load_json(validators_file)?;
    let validator_set = ValidatorSet::new(validators);

    let election_id = election_tx
        .id
        .clone()
        .ok_or_else(|| LedgerError::Config("election transaction file has no id".into()))?;
    let election_pk = election::election_public_key(&election_id)
        .map_err(|e| LedgerError::Config(format!("invalid election id: {e}")))?;

    let status = if !election::election_topology_matches(&election_tx, &validator_set) {
        ElectionStatus::Inconclusive
    } else {
        let mut tally = election::ElectionTally::default();
        for vote in &votes {
            let Some(voter) = vote.inputs.first().and_then(|i| i.owners_before.first()) else { continue };
            let power: u64 = vote
                .outputs
                .iter()
                .filter(|o| o.public_keys == vec![election_pk.clone()])
                .map(|o| o.amount)
                .sum();
            tally.record_vote(voter.clone(), power);
        }
        tally.status(validator_set.total_power())
    };

    println!("{status:?}");
    Ok(())
}

pub fn run(cli: Cli) -> LedgerResult<()> {
    match cli.command {
        Commands::Configure(args) => configure(&args),
        Commands::ShowConfig(args) => show_config(&args),
        Commands::Init(args) => init(&args),
        Commands::Drop(args) => drop_storage(&args),
        Commands::Start(args) => crate::start_node(&args.config).map(|_handler| ()),
        Commands::UpsertValidator { action } => match action {
            UpsertValidatorAction::New {
                signing_key_file,
                validators_file,
                candidate_public_key,
                power,
                node_id,
            } => upsert_validator_new(&signing_key_file, &validators_file, &candidate_public_key, power, &node_id),
            UpsertValidatorAction::Approve { signing_key_file, election_tx_file } => {
                upsert_validator_approve(&signing_key_file, &election_tx_file)
            }
            UpsertValidatorAction::Show { election_tx_file, votes_file, validators_file } => {
                upsert_validator_show(&election_tx_file, &votes_file, &validators_file)
            }
        },
    }
}
