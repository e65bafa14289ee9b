//! Error types for the wallet engine.
//!
//! Every component owns a narrow error enum; [`WalletError`] is the closed
//! union the facade returns. [`ErrorKind`] sorts each variant into the
//! handling class callers act on: validation and funds errors are final,
//! network errors may be retried, conflicts are usage errors.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::codec::CodecError;
use crate::history::LogError;
use crate::invoice::InvoiceError;
use crate::ledger::LedgerError;
use crate::mint::MintError;
use crate::registry::RegistryError;
use crate::selection::SelectionError;
use crate::store::StoreError;
use crate::token::{MintUrl, MintUrlError};
use crate::wallet::{ReceiveReceipt, WalletStatus};

/// Handling class of a [`WalletError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input. Rejected synchronously, never retried.
    Validation,
    /// Not enough balance or tokens.
    Funds,
    /// A mint could not be reached.
    Network,
    /// The request contradicts current wallet state.
    Conflict,
    /// The wallet is not in a state that accepts the operation.
    State,
    /// Persistence failed; nothing was applied.
    Storage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Funds => "funds",
            Self::Network => "network",
            Self::Conflict => "conflict",
            Self::State => "state",
            Self::Storage => "storage",
        };
        f.write_str(s)
    }
}

/// Errors returned by [`Wallet`](crate::wallet::Wallet) operations.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error(transparent)]
    InvalidMintUrl(#[from] MintUrlError),

    #[error("invalid invoice: {0}")]
    InvalidInvoice(#[from] InvoiceError),

    #[error("invalid token: {0}")]
    InvalidToken(#[from] CodecError),

    /// Zero or otherwise unusable amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Balance does not cover amount plus fee reserve.
    #[error("insufficient balance: available {available}, required {required}")]
    InsufficientBalance {
        /// Spendable balance.
        available: u64,
        /// Amount plus fee reserve.
        required: u64,
    },

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Mint(#[from] MintError),

    /// Invoices awaiting settlement still reference the mint.
    #[error("mint {url} has {count} pending invoice(s)")]
    MintHasPendingInvoices {
        /// The mint being removed.
        url: MintUrl,
        /// Pending invoices at that mint.
        count: usize,
    },

    /// No mint is registered to issue an invoice from.
    #[error("no mint configured")]
    NoMints,

    /// The wallet is not `Ready`.
    #[error("wallet is not ready (status: {0})")]
    NotReady(WalletStatus),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Part of a bundle was redeemed and applied; the rest was not.
    #[error("received {} sat, {unredeemed} sat not redeemed: {source}", .receipt.amount)]
    PartialReceive {
        /// What was applied.
        receipt: ReceiveReceipt,
        unredeemed: u64,
        /// The unredeemed entries as a bundle that can be received again.
        remainder: String,
        /// First failure among the unredeemed entries.
        source: Box<WalletError>,
    },
}

impl WalletError {
    /// Handling class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidMintUrl(_)
            | Self::InvalidInvoice(_)
            | Self::InvalidToken(_)
            | Self::InvalidAmount(_) => ErrorKind::Validation,

            Self::InsufficientBalance { .. } | Self::Selection(_) => ErrorKind::Funds,

            Self::Ledger(e) => match e {
                LedgerError::InvalidToken { .. } | LedgerError::Overflow { .. } => {
                    ErrorKind::Validation
                }
                LedgerError::DuplicateToken(_) | LedgerError::TokenNotFound(_) => {
                    ErrorKind::Conflict
                }
            },

            Self::Registry(e) => match e {
                RegistryError::InvalidUrl(_) => ErrorKind::Validation,
                RegistryError::UnknownMint(_) | RegistryError::MintHasTokens { .. } => {
                    ErrorKind::Conflict
                }
            },

            Self::Mint(e) => match e {
                MintError::Unreachable(_) | MintError::Network(_) => ErrorKind::Network,
                MintError::InvalidSignature | MintError::Rejected(_) => ErrorKind::Validation,
                MintError::InsufficientInputs { .. } => ErrorKind::Funds,
                MintError::TokenAlreadySpent | MintError::QuoteNotFound(_) => ErrorKind::Conflict,
                MintError::QuoteNotPaid(_) => ErrorKind::State,
            },

            Self::Log(_) | Self::MintHasPendingInvoices { .. } => ErrorKind::Conflict,
            Self::NoMints | Self::NotReady(_) => ErrorKind::State,
            Self::Storage(_) => ErrorKind::Storage,
            Self::PartialReceive { source, .. } => source.kind(),
        }
    }

    /// `true` if the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Network
    }
}

/// Result alias used across the facade.
pub type WalletResult<T> = Result<T, WalletError>;
