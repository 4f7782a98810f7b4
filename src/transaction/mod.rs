//! Transaction model (§4.B).
//!
//! The canonical transaction structure, its id derivation, and schema validation
//! live here. Validation *against storage* (duplicate detection, double-spend,
//! amount conservation, election rules) lives in `crate::validation`.

mod model;

pub use model::{
    Asset,
    Input,
    Operation,
    Output,
    OutputLink,
    Transaction,
    TransactionBuilder,
};
