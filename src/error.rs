//! Error handling for the settlement engine
//!
//! Domain failures are `SettlementError` variants; every fallible function
//! returns the crate-wide anyhow `Result`, so callers can attach context while
//! still matching on the kind with `downcast_ref`.

use rust_decimal::Decimal;
use thiserror::Error;

/// Settlement failures. All of them abort the invoice being processed.
#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("unknown tax code: {0}")]
    UnknownTaxCode(String),

    #[error("tax {code} cannot be computed at {scope} scope")]
    TaxNotApplicable { code: String, scope: String },

    #[error("invoice fee {0} is required but missing")]
    MissingInvoiceFee(String),

    #[error("insufficient lot balance for {security}: selling {requested} but only {available} open")]
    InsufficientLotBalance {
        security: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("negative position for {security}: selling {requested} but only {held} held")]
    NegativePositionQuantity {
        security: String,
        requested: Decimal,
        held: Decimal,
    },

    #[error("invoice {0} was already processed")]
    DuplicateInvoice(String),

    #[error("tax group {group} has no {code} instance")]
    MissingTaxGroupInstance { group: i64, code: String },

    #[error("lot ledger for {security} holds {lots} but position holds {position}")]
    LedgerMismatch {
        security: String,
        lots: Decimal,
        position: Decimal,
    },

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("database error: {0}")]
    DbError(String),

    #[error("parse error: {0}")]
    ParseError(String),
}

/// Result type alias for settlement operations
pub type Result<T> = anyhow::Result<T>;

/// Returns the settlement error at the root of an anyhow chain, if any.
pub fn settlement_error(err: &anyhow::Error) -> Option<&SettlementError> {
    err.chain().find_map(|cause| cause.downcast_ref::<SettlementError>())
}
