//! Unified error type for the ledger core.
//!
//! Variants are grouped by how a caller is expected to react: bad input,
//! missing rows, conflicts with the current stored state, and storage
//! failures. [`Error::kind`] collapses them into an [`ErrorKind`] so the
//! transport layer can pick a response class without matching every variant.

use thiserror::Error;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or out-of-range input, caught before any write.
    Validation,
    /// A referenced row is absent or belongs to another workspace.
    NotFound,
    /// The request conflicts with the current state of stored rows.
    Conflict,
    /// A bulk write touched fewer rows than requested.
    Atomicity,
    /// Storage, configuration or I/O failure.
    Internal,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Invalid amount: {amount}. Amount must be a positive, finite number")]
    InvalidAmount { amount: f64 },

    #[error("Invalid interest rate: {rate}. Rate must be between 0 and 100")]
    InvalidInterestRate { rate: f64 },

    #[error("Invalid cutoff day: {day}. Day must be between 1 and 31")]
    InvalidCutoffDay { day: u32 },

    #[error("Invalid month: {year}-{month}")]
    InvalidMonth { year: i32, month: u32 },

    // Carries no workspace information
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Entry {id} is not a CC transaction")]
    NotCreditCardEntry { id: i64 },

    #[error("Invalid CC state transition for entry {id}: {from} -> {to}")]
    InvalidCcTransition {
        id: i64,
        from: String,
        to: String,
    },

    #[error("No entries given to settle")]
    EmptySettlement,

    #[error("Source account {id} is a credit card account")]
    SourceIsCreditCard { id: i64 },

    #[error("Target account {id} is not a credit card account")]
    TargetNotCreditCard { id: i64 },

    #[error("Requested {requested} entries but only {found} were found")]
    EntryCountMismatch { requested: usize, found: usize },

    #[error("Entry {id} is not billed")]
    NotBilled { id: i64 },

    #[error("Entry {id} does not have deferred settlement intent")]
    NotDeferred { id: i64 },

    #[error("Entry {id} does not belong to card account {account_id}")]
    EntryAccountMismatch { id: i64, account_id: i64 },

    #[error("Cannot change the provider of loan {loan_id}: payments already exist")]
    ProviderChangeAfterPayment { loan_id: i64 },

    #[error("No outstanding entries for loan {loan_id} in {year}-{month:02}")]
    NothingOutstanding { loan_id: i64, year: i32, month: u32 },

    #[error("Entry {id} has deferred intent and must be paid through settlement")]
    DeferredEntryRequiresSettlement { id: i64 },

    #[error("Entry {id} is already paid")]
    AlreadyPaid { id: i64 },

    #[error("Bulk update affected {affected} rows, expected {expected}")]
    AtomicityFailure { expected: u64, affected: u64 },

    #[error("Entry {id} has inconsistent credit card columns: {reason}")]
    CorruptEntry { id: i64, reason: String },

    #[error("Projection sync failed for {} of {total} templates", .failures.len())]
    SyncIncomplete {
        total: usize,
        entries_created: usize,
        failures: Vec<SyncFailure>,
    },
}

/// One template that could not be synchronized by the daily job.
#[derive(Debug)]
pub struct SyncFailure {
    pub workspace_id: i64,
    pub template_id: i64,
    pub error: Box<Error>,
}

impl Error {
    /// Shorthand for a [`Error::Validation`] with a formatted message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. }
            | Self::InvalidAmount { .. }
            | Self::InvalidInterestRate { .. }
            | Self::InvalidCutoffDay { .. }
            | Self::InvalidMonth { .. }
            | Self::EmptySettlement => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::NotCreditCardEntry { .. }
            | Self::InvalidCcTransition { .. }
            | Self::SourceIsCreditCard { .. }
            | Self::TargetNotCreditCard { .. }
            | Self::EntryCountMismatch { .. }
            | Self::NotBilled { .. }
            | Self::NotDeferred { .. }
            | Self::EntryAccountMismatch { .. }
            | Self::ProviderChangeAfterPayment { .. }
            | Self::NothingOutstanding { .. }
            | Self::DeferredEntryRequiresSettlement { .. }
            | Self::AlreadyPaid { .. } => ErrorKind::Conflict,
            Self::AtomicityFailure { .. } => ErrorKind::Atomicity,
            Self::Config { .. }
            | Self::Database(_)
            | Self::Io(_)
            | Self::CorruptEntry { .. }
            | Self::SyncIncomplete { .. } => ErrorKind::Internal,
        }
    }
}

// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
