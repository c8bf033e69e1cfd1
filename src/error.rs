//! Error surface for the reconciliation engine.
//!
//! Two layers: [`EngineError`] is what entrypoints return when a whole batch
//! fails (bad configuration, cancellation, unsupported feature), while
//! [`CellError`] describes a recoverable failure inside a single cell's
//! transformation or formula evaluation. Cell errors are recorded in step
//! results and the pipeline continues with the pre-step value; only
//! [`CellError::ExcludeRow`] escalates to dropping the row.

use thiserror::Error;

/// Batch-level failure returned by engine entrypoints.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The configuration was rejected before any row was processed.
    #[error("invalid configuration: {reason}")]
    ConfigInvalid { reason: String },

    /// A row could not be preprocessed and the failure was not recoverable.
    #[error("preprocessing failed at row {row_index}, step '{step_id}': {kind}")]
    PreprocessFailed {
        row_index: usize,
        step_id: String,
        kind: CellError,
    },

    /// The caller's cancellation signal fired; partial results were discarded.
    #[error("reconciliation cancelled")]
    Cancelled,

    /// A requested feature is not available in this build.
    #[error("unsupported: {feature}")]
    Unsupported { feature: String },
}

impl EngineError {
    pub fn config(reason: impl Into<String>) -> Self {
        EngineError::ConfigInvalid {
            reason: reason.into(),
        }
    }

    pub fn unsupported(feature: impl Into<String>) -> Self {
        EngineError::Unsupported {
            feature: feature.into(),
        }
    }
}

/// Recoverable per-cell failure kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CellError {
    /// A referenced column was absent from the row.
    #[error("missing field '{0}'")]
    MissingField(String),

    /// The value could not be used with the requested operation.
    #[error("type error: {0}")]
    TypeError(String),

    /// Division by zero inside a formula.
    #[error("division by zero")]
    DivisionByZero,

    /// Arithmetic produced a non-finite result.
    #[error("non-finite arithmetic result")]
    NonFinite,

    /// The value could not be parsed as a date.
    #[error("unparseable date '{0}'")]
    BadDate(String),

    /// No exchange rate was available for the requested currency pair.
    #[error("no exchange rate for {from}->{to}")]
    MissingRate { from: String, to: String },

    /// The row should be excluded from reconciliation entirely.
    #[error("row excluded by null threshold")]
    ExcludeRow,
}

pub type CellResult<T> = Result<T, CellError>;
