//! Error kinds for the ledger node, following the flat-enum-per-concern style
//! of `apollo_gateway::errors`.

use thiserror::Error;

/// Errors raised by the storage adapter (§4.A). The real backend is an external
/// collaborator; this enum covers the narrow surface the core depends on.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("transaction `{0}` not found")]
    TransactionNotFound(String),
    #[error("block at height {0} not found")]
    BlockNotFound(u64),
    #[error("no validator set recorded at or before height {0}")]
    NoValidatorSet(u64),
    #[error("backing store I/O failure: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Single-transaction validation errors (§4.C, §4.E, §7).
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ValidationError {
    #[error("transaction failed schema validation: {0}")]
    SchemaError(String),
    #[error("fulfillment does not verify against the referenced condition")]
    InvalidSignature,
    #[error("output {tx_id}:{output_index} has already been spent")]
    DoubleSpend { tx_id: String, output_index: u32 },
    #[error("sum of input amounts ({inputs}) does not equal sum of output amounts ({outputs})")]
    AmountMismatch { inputs: u128, outputs: u128 },
    #[error("transaction `{0}` already exists")]
    DuplicateTransaction(String),
    #[error("election proposer must be a single current validator")]
    InvalidProposer,
    #[error("transaction must have exactly one input with exactly one owner")]
    MultipleInputsError,
    #[error("election outputs must exactly match the current validator topology")]
    UnequalValidatorSet,
    #[error("requested power {requested} is not strictly less than one third of total power {total}")]
    InvalidPowerChange { requested: u64, total: u64 },
    #[error("referenced output {tx_id}:{output_index} does not exist")]
    MissingInput { tx_id: String, output_index: u32 },
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Top-level error union consumed by the ABI handler and CLI.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("harvesting validation results timed out after {0:?}")]
    HarvestTimeout(std::time::Duration),
    #[error("database already exists at `{0}`")]
    DatabaseAlreadyExists(String),
    #[error("database does not exist at `{0}`")]
    DatabaseDoesNotExist(String),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
