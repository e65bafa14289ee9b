//! # Wallet Book
//!
//! Everything a wallet persists, in one value: the token ledger, the
//! transaction log, the mint registry and the invoices awaiting settlement.
//! A book is saved as a unit, which is what makes a ledger change and its
//! log entry land together or not at all.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::BOOK_VERSION;
use crate::history::TransactionLog;
use crate::ledger::TokenLedger;
use crate::registry::MintRegistry;
use crate::settlement::PendingInvoice;
use crate::token::MintUrl;

/// Persisted wallet contents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBook {
    pub version: u32,
    pub ledger: TokenLedger,
    pub log: TransactionLog,
    pub mints: MintRegistry,
    /// Invoices awaiting settlement, keyed by quote id.
    pub pending: BTreeMap<String, PendingInvoice>,
}

impl Default for WalletBook {
    fn default() -> Self {
        Self {
            version: BOOK_VERSION,
            ledger: TokenLedger::new(),
            log: TransactionLog::new(),
            mints: MintRegistry::new(),
            pending: BTreeMap::new(),
        }
    }
}

impl WalletBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derived balances and counts.
    pub fn state(&self) -> WalletState {
        WalletState {
            balance: self.ledger.balance(),
            per_mint: self.ledger.balances_by_mint(),
            token_count: self.ledger.len(),
            pending_invoices: self.pending.len(),
        }
    }

    /// Pending invoices issued by `mint`.
    pub fn pending_at<'a>(&'a self, mint: &'a MintUrl) -> impl Iterator<Item = &'a PendingInvoice> {
        self.pending.values().filter(move |p| &p.mint == mint)
    }
}

/// Balances derived from the ledger. Never stored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WalletState {
    /// Sum over every held token.
    pub balance: u64,
    /// Sum per mint, for mints holding tokens.
    pub per_mint: BTreeMap<MintUrl, u64>,
    pub token_count: usize,
    pub pending_invoices: usize,
}
